use serde::{Deserialize, Serialize};
use warden_core::{AppError, AppResult, NonEmptyString, RbacProvider};

/// Namespace grouping resource actions, such as `microsoft.directory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNamespace {
    /// Namespace id; equal to its name.
    pub id: String,
    /// Namespace name.
    pub name: String,
}

impl ResourceNamespace {
    /// Creates a validated namespace whose id is its name.
    pub fn new(name: impl Into<String>) -> AppResult<Self> {
        let name = String::from(NonEmptyString::new(name)?);
        if name.contains('/') || name.contains('*') {
            return Err(AppError::Validation(format!(
                "resource namespace '{name}' must not contain '/' or '*'"
            )));
        }

        Ok(Self {
            id: name.clone(),
            name,
        })
    }
}

/// Operation on a resource that role permissions can allow or exclude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAction {
    /// Action id.
    pub id: String,
    /// Owning namespace id.
    pub resource_namespace_id: String,
    /// Full action name, e.g. `microsoft.directory/users/create`.
    pub name: String,
    /// Description.
    pub description: String,
    /// Whether holding this action is privileged.
    pub is_privileged: bool,
}

impl ResourceAction {
    /// Creates an action; the name must live inside the namespace.
    pub fn new(
        id: impl Into<String>,
        namespace: &ResourceNamespace,
        name: impl Into<String>,
        description: impl Into<String>,
        is_privileged: bool,
    ) -> AppResult<Self> {
        let name = String::from(NonEmptyString::new(name)?);
        let prefix = format!("{}/", namespace.name);
        if !name.starts_with(prefix.as_str()) || name.len() == prefix.len() {
            return Err(AppError::Validation(format!(
                "resource action '{name}' must start with '{prefix}'"
            )));
        }
        if name.contains('*') {
            return Err(AppError::Validation(format!(
                "resource action '{name}' must not contain wildcards"
            )));
        }

        Ok(Self {
            id: String::from(NonEmptyString::new(id)?),
            resource_namespace_id: namespace.id.clone(),
            name,
            description: description.into(),
            is_privileged,
        })
    }
}

/// Returns whether an allowed/excluded action pattern matches a concrete action.
///
/// Patterns compare case-insensitively; a trailing `*` matches any suffix.
#[must_use]
pub fn action_matches(pattern: &str, action: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let action = action.to_ascii_lowercase();
    match pattern.strip_suffix('*') {
        Some(prefix) => action.starts_with(prefix),
        None => pattern == action,
    }
}

/// Action that grants management of role assignments and schedules for a provider.
#[must_use]
pub fn role_management_action(provider: RbacProvider) -> &'static str {
    match provider {
        RbacProvider::Directory => "microsoft.directory/roleManagement/allProperties/allTasks",
        RbacProvider::EntitlementManagement => {
            "microsoft.entitlementManagement/roleManagement/allProperties/allTasks"
        }
    }
}

/// Action that grants read access to role-management state for a provider.
#[must_use]
pub fn role_management_read_action(provider: RbacProvider) -> &'static str {
    match provider {
        RbacProvider::Directory => "microsoft.directory/roleManagement/standard/read",
        RbacProvider::EntitlementManagement => {
            "microsoft.entitlementManagement/roleManagement/standard/read"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ResourceAction, ResourceNamespace, action_matches};

    #[test]
    fn wildcard_patterns_match_prefixes_case_insensitively() {
        assert!(action_matches(
            "microsoft.directory/*",
            "microsoft.directory/users/create"
        ));
        assert!(action_matches(
            "Microsoft.Directory/Users/Create",
            "microsoft.directory/users/create"
        ));
        assert!(!action_matches(
            "microsoft.directory/groups/*",
            "microsoft.directory/users/create"
        ));
    }

    #[test]
    fn actions_must_live_in_their_namespace() {
        let namespace = ResourceNamespace::new("microsoft.directory");
        assert!(namespace.is_ok());
        let Ok(namespace) = namespace else {
            return;
        };

        assert!(ResourceAction::new("a1", &namespace, "microsoft.directory/users/read", "", false).is_ok());
        assert!(ResourceAction::new("a2", &namespace, "microsoft.exchange/mailbox/read", "", false).is_err());
        assert!(ResourceAction::new("a3", &namespace, "microsoft.directory/*", "", false).is_err());
    }
}
