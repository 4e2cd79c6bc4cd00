use serde::{Deserialize, Serialize};

/// Stable audit actions emitted by role-management use-cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A schedule request changed status.
    RequestTransitioned,
    /// Justification or ticket metadata of a request was corrected.
    RequestMetadataCorrected,
    /// A schedule reached its expiry.
    ScheduleExpired,
    /// A schedule was revoked.
    ScheduleRevoked,
    /// An activation was shortened to fit its eligibility.
    ScheduleClipped,
    /// A role definition was created.
    RoleDefinitionCreated,
    /// A role definition was updated.
    RoleDefinitionUpdated,
    /// A role definition was deleted.
    RoleDefinitionDeleted,
    /// A persistent role assignment was created.
    RoleAssignmentCreated,
    /// A persistent role assignment was deleted.
    RoleAssignmentDeleted,
    /// A resource namespace or action was added to the catalog.
    ResourceCatalogChanged,
}

impl AuditAction {
    /// Returns a stable storage value for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestTransitioned => "request.transitioned",
            Self::RequestMetadataCorrected => "request.metadata_corrected",
            Self::ScheduleExpired => "schedule.expired",
            Self::ScheduleRevoked => "schedule.revoked",
            Self::ScheduleClipped => "schedule.clipped",
            Self::RoleDefinitionCreated => "role_definition.created",
            Self::RoleDefinitionUpdated => "role_definition.updated",
            Self::RoleDefinitionDeleted => "role_definition.deleted",
            Self::RoleAssignmentCreated => "role_assignment.created",
            Self::RoleAssignmentDeleted => "role_assignment.deleted",
            Self::ResourceCatalogChanged => "resource_catalog.changed",
        }
    }

    /// Parses a stored action value.
    #[must_use]
    pub fn from_storage(value: &str) -> Option<Self> {
        const ALL: &[AuditAction] = &[
            AuditAction::RequestTransitioned,
            AuditAction::RequestMetadataCorrected,
            AuditAction::ScheduleExpired,
            AuditAction::ScheduleRevoked,
            AuditAction::ScheduleClipped,
            AuditAction::RoleDefinitionCreated,
            AuditAction::RoleDefinitionUpdated,
            AuditAction::RoleDefinitionDeleted,
            AuditAction::RoleAssignmentCreated,
            AuditAction::RoleAssignmentDeleted,
            AuditAction::ResourceCatalogChanged,
        ];

        ALL.iter().copied().find(|action| action.as_str() == value)
    }
}
