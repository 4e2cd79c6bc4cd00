use std::str::FromStr;

use serde::{Deserialize, Serialize};
use warden_core::{AppError, AppResult, NonEmptyString};

/// Directory scope id of the tenant root.
pub const ROOT_DIRECTORY_SCOPE: &str = "/";

const ADMINISTRATIVE_UNIT_PREFIX: &str = "/administrativeUnits/";

/// Kind of security principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrincipalKind {
    /// Human user account.
    User,
    /// Security group; members inherit its role holdings.
    Group,
    /// Application identity.
    ServicePrincipal,
}

impl PrincipalKind {
    /// Returns a stable storage value for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::ServicePrincipal => "servicePrincipal",
        }
    }
}

impl FromStr for PrincipalKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "group" => Ok(Self::Group),
            "servicePrincipal" => Ok(Self::ServicePrincipal),
            _ => Err(AppError::Validation(format!(
                "unknown principal kind '{value}'"
            ))),
        }
    }
}

/// Security principal that can hold role assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Directory object id of the principal.
    pub id: String,
    /// Principal kind.
    pub kind: PrincipalKind,
    /// Display name.
    pub display_name: String,
}

impl Principal {
    /// Creates a validated principal.
    pub fn new(
        id: impl Into<String>,
        kind: PrincipalKind,
        display_name: impl Into<String>,
    ) -> AppResult<Self> {
        let id = NonEmptyString::new(id)?;
        Ok(Self {
            id: id.into(),
            kind,
            display_name: display_name.into(),
        })
    }
}

/// Node in the directory tree that a directory scope can point at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryObject {
    /// Object id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Object type such as `administrativeUnit`, `user` or `group`.
    pub object_type: String,
    /// Containing object; `None` means the object hangs off the tenant root.
    pub parent_id: Option<String>,
}

/// Application-defined scope opaque to the engine; compared by id only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppScope {
    /// App scope id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Application-specific scope type.
    #[serde(rename = "type")]
    pub scope_type: String,
}

/// Returns the directory object addressed by a directory scope id, or `None` for the tenant root.
pub fn directory_scope_object_id(scope_id: &str) -> AppResult<Option<&str>> {
    if scope_id == ROOT_DIRECTORY_SCOPE {
        return Ok(None);
    }

    let object_id = scope_id
        .strip_prefix(ADMINISTRATIVE_UNIT_PREFIX)
        .or_else(|| scope_id.strip_prefix('/'))
        .ok_or_else(|| {
            AppError::Validation(format!(
                "directory scope id '{scope_id}' must start with '/'"
            ))
        })?;

    if object_id.is_empty() || object_id.contains('/') {
        return Err(AppError::Validation(format!(
            "directory scope id '{scope_id}' is not a tenant, administrative unit or object scope"
        )));
    }

    Ok(Some(object_id))
}

#[cfg(test)]
mod tests {
    use super::directory_scope_object_id;

    #[test]
    fn directory_scope_ids_resolve_to_objects() {
        assert_eq!(directory_scope_object_id("/").ok(), Some(None));
        assert_eq!(
            directory_scope_object_id("/administrativeUnits/au-1").ok(),
            Some(Some("au-1"))
        );
        assert_eq!(directory_scope_object_id("/obj-7").ok(), Some(Some("obj-7")));
    }

    #[test]
    fn malformed_directory_scope_ids_are_rejected() {
        assert!(directory_scope_object_id("tenant").is_err());
        assert!(directory_scope_object_id("/a/b/c").is_err());
        assert!(directory_scope_object_id("/administrativeUnits/").is_err());
    }
}
