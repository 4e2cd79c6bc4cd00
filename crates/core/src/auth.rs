use serde::{Deserialize, Serialize};

const SYSTEM_PRINCIPAL_ID: &str = "system";

/// Identity of the principal calling into the engine, as asserted by the fronting gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    principal_id: String,
    display_name: String,
    mfa_satisfied: bool,
    is_system: bool,
}

impl CallerIdentity {
    /// Creates a caller identity for an authenticated principal.
    #[must_use]
    pub fn new(principal_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            display_name: display_name.into(),
            mfa_satisfied: false,
            is_system: false,
        }
    }

    /// Returns the identity with the multi-factor flag set.
    #[must_use]
    pub fn with_mfa(mut self, mfa_satisfied: bool) -> Self {
        self.mfa_satisfied = mfa_satisfied;
        self
    }

    /// Internal actor used by the ticker, seeding and other engine-owned writes.
    #[must_use]
    pub fn system() -> Self {
        Self {
            principal_id: SYSTEM_PRINCIPAL_ID.to_owned(),
            display_name: "Warden system".to_owned(),
            mfa_satisfied: true,
            is_system: true,
        }
    }

    /// Returns the directory id of the calling principal.
    #[must_use]
    pub fn principal_id(&self) -> &str {
        self.principal_id.as_str()
    }

    /// Returns the display name for the caller.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_str()
    }

    /// Returns whether the caller authenticated with a second factor.
    #[must_use]
    pub fn mfa_satisfied(&self) -> bool {
        self.mfa_satisfied
    }

    /// Returns whether this is the engine's own actor.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.is_system
    }
}
