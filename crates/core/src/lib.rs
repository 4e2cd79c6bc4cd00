//! Shared primitives for all Rust crates in Warden.

#![forbid(unsafe_code)]

/// Caller identity primitives shared across services.
pub mod auth;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use auth::CallerIdentity;

/// Result type used across Warden crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// RBAC provider used as the partition key for every persisted role-management resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RbacProvider {
    /// Directory roles (`/roleManagement/directory`).
    Directory,
    /// Entitlement-management roles (`/roleManagement/entitlementManagement`).
    EntitlementManagement,
}

impl RbacProvider {
    /// Returns the stable path segment for this provider.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::EntitlementManagement => "entitlementManagement",
        }
    }

    /// Returns all providers.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[RbacProvider] = &[RbacProvider::Directory, RbacProvider::EntitlementManagement];

        ALL
    }
}

impl Display for RbacProvider {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for RbacProvider {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "directory" => Ok(Self::Directory),
            "entitlementManagement" => Ok(Self::EntitlementManagement),
            _ => Err(AppError::NotFound(format!(
                "unknown rbac provider '{value}'"
            ))),
        }
    }
}

/// Common application error categories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// Malformed input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing or concurrently serialized state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller is not authenticated.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is authenticated but lacks scope authorization.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Role inheritance closure would become cyclic.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// Delete is blocked by a live referent.
    #[error("in use: {0}")]
    InUse(String),

    /// Role-management policy rejected the request.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// Operation is not defined for the addressed resource.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A bounded wait elapsed.
    #[error("timed out: {0}")]
    TimedOut(String),

    /// Retriable failure of an underlying collaborator.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Non-retriable invariant violation or unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the stable domain error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalidInput",
            Self::NotFound(_) => "notFound",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::CycleDetected(_) => "cycleDetected",
            Self::InUse(_) => "inUse",
            Self::PolicyDenied(_) => "policyDenied",
            Self::NotSupported(_) => "notSupported",
            Self::TimedOut(_) => "timedOut",
            Self::Transient(_) => "transient",
            Self::Internal(_) => "fatal",
        }
    }

    /// Returns whether the caller may resubmit with the same idempotency id.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::Transient(_))
    }

    /// Returns the human readable detail without the category prefix.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Validation(detail)
            | Self::NotFound(detail)
            | Self::Conflict(detail)
            | Self::Unauthorized(detail)
            | Self::Forbidden(detail)
            | Self::CycleDetected(detail)
            | Self::InUse(detail)
            | Self::PolicyDenied(detail)
            | Self::NotSupported(detail)
            | Self::TimedOut(detail)
            | Self::Transient(detail)
            | Self::Internal(detail) => detail.as_str(),
        }
    }
}
