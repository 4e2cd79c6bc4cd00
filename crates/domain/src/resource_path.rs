use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use warden_core::{AppError, AppResult, RbacProvider};

use crate::schedule::ScheduleKind;

/// Addressable collection below `/roleManagement/{provider}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleManagementCollection {
    /// `roleDefinitions`
    RoleDefinitions,
    /// `roleAssignments`
    RoleAssignments,
    /// `roleAssignmentSchedules` / `roleEligibilitySchedules`
    Schedules(ScheduleKind),
    /// `roleAssignmentScheduleInstances` / `roleEligibilityScheduleInstances`
    Instances(ScheduleKind),
    /// `roleAssignmentScheduleRequests` / `roleEligibilityScheduleRequests`
    Requests(ScheduleKind),
    /// `roleAssignmentApprovals`
    Approvals,
    /// `resourceNamespaces`
    ResourceNamespaces,
}

impl RoleManagementCollection {
    /// Returns the path segment of the collection.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleDefinitions => "roleDefinitions",
            Self::RoleAssignments => "roleAssignments",
            Self::Schedules(ScheduleKind::Assignment) => "roleAssignmentSchedules",
            Self::Schedules(ScheduleKind::Eligibility) => "roleEligibilitySchedules",
            Self::Instances(ScheduleKind::Assignment) => "roleAssignmentScheduleInstances",
            Self::Instances(ScheduleKind::Eligibility) => "roleEligibilityScheduleInstances",
            Self::Requests(ScheduleKind::Assignment) => "roleAssignmentScheduleRequests",
            Self::Requests(ScheduleKind::Eligibility) => "roleEligibilityScheduleRequests",
            Self::Approvals => "roleAssignmentApprovals",
            Self::ResourceNamespaces => "resourceNamespaces",
        }
    }

    /// Schedule kind of schedule, instance and request collections.
    #[must_use]
    pub fn schedule_kind(&self) -> Option<ScheduleKind> {
        match self {
            Self::Schedules(kind) | Self::Instances(kind) | Self::Requests(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl FromStr for RoleManagementCollection {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "roleDefinitions" => Ok(Self::RoleDefinitions),
            "roleAssignments" => Ok(Self::RoleAssignments),
            "roleAssignmentSchedules" => Ok(Self::Schedules(ScheduleKind::Assignment)),
            "roleEligibilitySchedules" => Ok(Self::Schedules(ScheduleKind::Eligibility)),
            "roleAssignmentScheduleInstances" => Ok(Self::Instances(ScheduleKind::Assignment)),
            "roleEligibilityScheduleInstances" => Ok(Self::Instances(ScheduleKind::Eligibility)),
            "roleAssignmentScheduleRequests" => Ok(Self::Requests(ScheduleKind::Assignment)),
            "roleEligibilityScheduleRequests" => Ok(Self::Requests(ScheduleKind::Eligibility)),
            "roleAssignmentApprovals" => Ok(Self::Approvals),
            "resourceNamespaces" => Ok(Self::ResourceNamespaces),
            _ => Err(AppError::NotFound(format!(
                "unknown role-management collection '{value}'"
            ))),
        }
    }
}

/// Path template plus the parameters bound into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
    template: String,
    parameters: BTreeMap<String, String>,
}

impl ResourceAddress {
    /// Creates an address from a `{name}`-parameterised template.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Binds a parameter.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameters.insert(name.to_owned(), value.into());
        self
    }

    /// Appends a segment, which may itself hold placeholders.
    #[must_use]
    pub fn join(mut self, segment: &str) -> Self {
        self.template.push('/');
        self.template.push_str(segment);
        self
    }

    /// Returns a bound parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Returns the template.
    #[must_use]
    pub fn template(&self) -> &str {
        self.template.as_str()
    }

    /// Expands the template; every placeholder must be bound.
    pub fn to_path(&self) -> AppResult<String> {
        let mut path = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            path.push_str(&rest[..open]);
            let Some(close) = rest[open..].find('}') else {
                return Err(AppError::Internal(format!(
                    "unterminated placeholder in template '{}'",
                    self.template
                )));
            };
            let name = &rest[open + 1..open + close];
            let value = self.parameter(name).ok_or_else(|| {
                AppError::Internal(format!(
                    "missing parameter '{name}' for template '{}'",
                    self.template
                ))
            })?;
            encode_segment(&mut path, value);
            rest = &rest[open + close + 1..];
        }
        path.push_str(rest);

        Ok(path)
    }

    /// `@odata.context` value of the address.
    pub fn odata_context(&self) -> AppResult<String> {
        let path = self.to_path()?;
        Ok(format!("$metadata#{}", path.trim_start_matches('/')))
    }
}

fn encode_segment(path: &mut String, value: &str) {
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            path.push(char::from(byte));
        } else {
            let _ = write!(path, "%{byte:02X}");
        }
    }
}

/// Typed addressing of role-management resources of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleManagementAddress {
    provider: RbacProvider,
}

impl RoleManagementAddress {
    /// Creates the address root of a provider.
    #[must_use]
    pub fn new(provider: RbacProvider) -> Self {
        Self { provider }
    }

    fn root(&self) -> ResourceAddress {
        ResourceAddress::new("/roleManagement/{provider}").with("provider", self.provider.as_str())
    }

    /// Collection address.
    #[must_use]
    pub fn collection(&self, collection: RoleManagementCollection) -> ResourceAddress {
        self.root().join(collection.as_str())
    }

    /// Entity address inside a collection.
    #[must_use]
    pub fn entity(&self, collection: RoleManagementCollection, id: &str) -> ResourceAddress {
        self.collection(collection).join("{id}").with("id", id)
    }

    /// `roleDefinitions/{id}`
    #[must_use]
    pub fn role_definition(&self, id: &str) -> ResourceAddress {
        self.entity(RoleManagementCollection::RoleDefinitions, id)
    }

    /// `roleDefinitions/{id}/inheritsPermissionsFrom`
    #[must_use]
    pub fn inherits_permissions_from(&self, id: &str) -> ResourceAddress {
        self.role_definition(id).join("inheritsPermissionsFrom")
    }

    /// `roleAssignments/{id}`
    #[must_use]
    pub fn role_assignment(&self, id: &str) -> ResourceAddress {
        self.entity(RoleManagementCollection::RoleAssignments, id)
    }

    /// `role{Assignment|Eligibility}Schedules/{id}`
    #[must_use]
    pub fn schedule(&self, kind: ScheduleKind, id: &str) -> ResourceAddress {
        self.entity(RoleManagementCollection::Schedules(kind), id)
    }

    /// `role{Assignment|Eligibility}ScheduleInstances/{id}`
    #[must_use]
    pub fn instance(&self, kind: ScheduleKind, id: &str) -> ResourceAddress {
        self.entity(RoleManagementCollection::Instances(kind), id)
    }

    /// `role{Assignment|Eligibility}ScheduleRequests/{id}`
    #[must_use]
    pub fn request(&self, kind: ScheduleKind, id: &str) -> ResourceAddress {
        self.entity(RoleManagementCollection::Requests(kind), id)
    }

    /// `roleAssignmentApprovals/{id}`
    #[must_use]
    pub fn approval(&self, id: &str) -> ResourceAddress {
        self.entity(RoleManagementCollection::Approvals, id)
    }

    /// `resourceNamespaces/{namespaceId}/resourceActions/{actionId}`
    #[must_use]
    pub fn resource_action(&self, namespace_id: &str, action_id: &str) -> ResourceAddress {
        self.entity(RoleManagementCollection::ResourceNamespaces, namespace_id)
            .join("resourceActions/{actionId}")
            .with("actionId", action_id)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use warden_core::RbacProvider;

    use super::{ResourceAddress, RoleManagementAddress, RoleManagementCollection};
    use crate::schedule::ScheduleKind;

    #[test]
    fn typed_accessors_expand_templates() {
        let address = RoleManagementAddress::new(RbacProvider::EntitlementManagement);

        let request = address.request(ScheduleKind::Eligibility, "r-1");
        let action = address.resource_action("microsoft.directory", "users/read");

        assert_eq!(
            request.to_path().ok().as_deref(),
            Some("/roleManagement/entitlementManagement/roleEligibilityScheduleRequests/r-1")
        );
        assert_eq!(request.parameter("id"), Some("r-1"));
        assert_eq!(
            action.to_path().ok().as_deref(),
            Some("/roleManagement/entitlementManagement/resourceNamespaces/microsoft.directory/resourceActions/users%2Fread")
        );
    }

    #[test]
    fn context_and_missing_parameters() {
        let address = RoleManagementAddress::new(RbacProvider::Directory)
            .collection(RoleManagementCollection::RoleDefinitions);
        assert_eq!(
            address.odata_context().ok().as_deref(),
            Some("$metadata#roleManagement/directory/roleDefinitions")
        );

        assert!(ResourceAddress::new("/roleDefinitions/{id}").to_path().is_err());
    }

    #[test]
    fn collection_names_round_trip() {
        for name in ["roleAssignmentScheduleInstances", "roleEligibilitySchedules", "roleAssignmentApprovals"] {
            let collection = RoleManagementCollection::from_str(name);
            assert_eq!(collection.map(|value| value.as_str()).ok(), Some(name));
        }
        assert!(RoleManagementCollection::from_str("roleThings").is_err());
    }
}
