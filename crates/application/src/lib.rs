//! Application services and ports.

#![forbid(unsafe_code)]

mod approval_service;
mod audit_trail;
mod authorization_service;
mod directory_service;
mod keyed_lock;
mod query_service;
mod role_assignment_service;
mod role_definition_registry;
mod role_definition_service;
mod role_management_ports;
mod schedule_controller;
mod schedule_request_service;
mod schedule_ticker;

#[cfg(test)]
mod test_support;

pub use approval_service::{ApprovalService, evaluate_policy};
pub use audit_trail::AuditTrail;
pub use authorization_service::{AuthorizationService, Holding};
pub use directory_service::DirectoryService;
pub use keyed_lock::{KeyedLock, KeyedLockGuard};
pub use query_service::{CurrentUserRole, QueryService};
pub use role_assignment_service::{CreateRoleAssignmentInput, RoleAssignmentService};
pub use role_definition_registry::RoleDefinitionRegistry;
pub use role_definition_service::{CreateResourceActionInput, RoleDefinitionService};
pub use role_management_ports::{
    ApprovalNotification, ApprovalNotifier, AssignmentWrite, AuditEvent, AuditRecord,
    AuditRepository, DirectoryRepository, EngineSettings, PolicyRepository,
    RoleAssignmentRepository, RoleDefinitionRepository, ScheduleCommit, ScheduleRepository,
    ScheduleWrite, TickReport, TickerLease, TickerLeaseCoordinator, TickerShard, TimeSource,
};
pub use schedule_controller::{EligibilityCoverage, GrantedRequest, ScheduleController};
pub use schedule_request_service::{ScheduleRequestService, SubmitScheduleRequestInput};
pub use schedule_ticker::ScheduleTicker;
