use serde::{Deserialize, Serialize};
use warden_core::{AppError, AppResult, RbacProvider};

use crate::principal::{ROOT_DIRECTORY_SCOPE, directory_scope_object_id};

/// Where a role applies: exactly one of a directory scope or an app scope.
///
/// Serializes as the `directoryScopeId`/`appScopeId` property pair, with the
/// unused member rendered as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ScopeProperties", into = "ScopeProperties")]
pub enum RoleScope {
    /// Directory tree scope (`/`, `/administrativeUnits/{id}` or `/{objectId}`).
    Directory(String),
    /// Application-defined scope.
    App(String),
}

impl RoleScope {
    /// Builds a scope from the two optional wire properties; exactly one must be set.
    pub fn from_parts(
        directory_scope_id: Option<String>,
        app_scope_id: Option<String>,
    ) -> AppResult<Self> {
        let directory_scope_id = directory_scope_id.filter(|value| !value.trim().is_empty());
        let app_scope_id = app_scope_id.filter(|value| !value.trim().is_empty());

        match (directory_scope_id, app_scope_id) {
            (Some(directory_scope_id), None) => {
                directory_scope_object_id(directory_scope_id.as_str())?;
                Ok(Self::Directory(directory_scope_id))
            }
            (None, Some(app_scope_id)) => Ok(Self::App(app_scope_id)),
            (Some(_), Some(_)) => Err(AppError::Validation(
                "exactly one of directoryScopeId or appScopeId must be set, not both".to_owned(),
            )),
            (None, None) => Err(AppError::Validation(
                "exactly one of directoryScopeId or appScopeId must be set".to_owned(),
            )),
        }
    }

    /// Tenant root directory scope.
    #[must_use]
    pub fn root() -> Self {
        Self::Directory(ROOT_DIRECTORY_SCOPE.to_owned())
    }

    /// Returns the directory scope id when this is a directory scope.
    #[must_use]
    pub fn directory_scope_id(&self) -> Option<&str> {
        match self {
            Self::Directory(value) => Some(value.as_str()),
            Self::App(_) => None,
        }
    }

    /// Returns the app scope id when this is an app scope.
    #[must_use]
    pub fn app_scope_id(&self) -> Option<&str> {
        match self {
            Self::Directory(_) => None,
            Self::App(value) => Some(value.as_str()),
        }
    }

    /// Returns whether this is the tenant root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Directory(value) if value == ROOT_DIRECTORY_SCOPE)
    }

    /// Stable storage key distinguishing the two scope kinds.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::Directory(value) => format!("directory:{value}"),
            Self::App(value) => format!("app:{value}"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopeProperties {
    #[serde(default)]
    directory_scope_id: Option<String>,
    #[serde(default)]
    app_scope_id: Option<String>,
}

impl TryFrom<ScopeProperties> for RoleScope {
    type Error = AppError;

    fn try_from(value: ScopeProperties) -> Result<Self, Self::Error> {
        Self::from_parts(value.directory_scope_id, value.app_scope_id)
    }
}

impl From<RoleScope> for ScopeProperties {
    fn from(value: RoleScope) -> Self {
        match value {
            RoleScope::Directory(directory_scope_id) => Self {
                directory_scope_id: Some(directory_scope_id),
                app_scope_id: None,
            },
            RoleScope::App(app_scope_id) => Self {
                directory_scope_id: None,
                app_scope_id: Some(app_scope_id),
            },
        }
    }
}

/// The `(principal, roleDefinition, scope)` triple that all mutations serialize on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssignmentTriple {
    /// Principal holding the role.
    pub principal_id: String,
    /// Role definition id.
    pub role_definition_id: String,
    /// Scope of the holding.
    pub scope: RoleScope,
}

impl AssignmentTriple {
    /// Creates a triple from its parts.
    #[must_use]
    pub fn new(
        principal_id: impl Into<String>,
        role_definition_id: impl Into<String>,
        scope: RoleScope,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            role_definition_id: role_definition_id.into(),
            scope,
        }
    }

    /// Returns the key used by the controller's per-triple lock.
    #[must_use]
    pub fn lock_key(&self, provider: RbacProvider) -> String {
        format!(
            "{}|{}|{}|{}",
            provider.as_str(),
            self.principal_id,
            self.role_definition_id,
            self.scope.storage_key()
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::RoleScope;

    #[test]
    fn scope_requires_exactly_one_kind() {
        assert!(RoleScope::from_parts(Some("/".to_owned()), Some("app-1".to_owned())).is_err());
        assert!(RoleScope::from_parts(None, None).is_err());
        assert!(RoleScope::from_parts(Some(String::new()), Some("app-1".to_owned())).is_ok());
    }

    #[test]
    fn scope_serializes_as_property_pair() {
        let value = serde_json::to_value(RoleScope::root()).unwrap_or_default();
        assert_eq!(value, json!({"directoryScopeId": "/", "appScopeId": null}));

        let parsed: Result<RoleScope, _> =
            serde_json::from_value(json!({"directoryScopeId": "/", "appScopeId": "x"}));
        assert!(parsed.is_err());
    }
}
