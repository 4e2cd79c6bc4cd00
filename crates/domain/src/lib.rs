//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod audit;
mod duration;
mod materialize;
mod policy;
mod principal;
pub mod query;
mod request;
mod resource_action;
mod resource_path;
mod role_definition;
mod schedule;
mod schedule_info;
mod scope;

pub use audit::AuditAction;
pub use duration::IsoDuration;
pub use materialize::{InstanceWindow, MAX_OCCURRENCES, materialize};
pub use policy::{
    Approval, ApprovalDecision, ApprovalStatus, ApproverKind, ApproverRef, DecisionOutcome,
    ReviewResult, RoleManagementPolicy,
};
pub use principal::{
    AppScope, DirectoryObject, Principal, PrincipalKind, ROOT_DIRECTORY_SCOPE,
    directory_scope_object_id,
};
pub use query::{ExpandItem, FilterExpression, OrderBy, QueryOptions, QueryPage};
pub use request::{
    RequestAction, RequestEvent, RequestStatus, ScheduleRequest, StatusDetail, TicketInfo,
    next_status,
};
pub use resource_action::{
    ResourceAction, ResourceNamespace, action_matches, role_management_action,
    role_management_read_action,
};
pub use resource_path::{ResourceAddress, RoleManagementAddress, RoleManagementCollection};
pub use role_definition::{
    EffectivePermissions, RoleDefinition, RoleDefinitionInput, RolePermission,
    effective_permissions, ensure_acyclic,
};
pub use schedule::{
    AssignmentType, MemberType, RoleAssignment, RoleSchedule, ScheduleInstance, ScheduleKind,
    ScheduleStatus, instance_id,
};
pub use schedule_info::{
    DayOfWeek, Expiration, ExpirationType, Recurrence, RecurrencePattern, RecurrencePatternType,
    RecurrenceRange, RecurrenceRangeType, ScheduleInfo, add_clamped, truncate_to_minute,
};
pub use scope::{AssignmentTriple, RoleScope};
