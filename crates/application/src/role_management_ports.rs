mod approvals;
mod assignments;
mod audit;
mod catalog;
mod directory;
mod runtime;
mod schedules;

pub use approvals::{ApprovalNotification, ApprovalNotifier, PolicyRepository};
pub use assignments::RoleAssignmentRepository;
pub use audit::{AuditEvent, AuditRecord, AuditRepository};
pub use catalog::RoleDefinitionRepository;
pub use directory::DirectoryRepository;
pub use runtime::{
    EngineSettings, TickReport, TickerLease, TickerLeaseCoordinator, TickerShard, TimeSource,
};
pub use schedules::{AssignmentWrite, ScheduleCommit, ScheduleRepository, ScheduleWrite};
