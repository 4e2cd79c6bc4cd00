//! Infrastructure adapters for the role-management ports.

#![forbid(unsafe_code)]

mod http_approval_notifier;
mod in_memory_role_management_store;
mod postgres_role_management_store;
mod redis_ticker_lease_coordinator;
mod system_time_source;
mod tracing_approval_notifier;

pub use http_approval_notifier::HttpApprovalNotifier;
pub use in_memory_role_management_store::InMemoryRoleManagementStore;
pub use postgres_role_management_store::PostgresRoleManagementStore;
pub use redis_ticker_lease_coordinator::RedisTickerLeaseCoordinator;
pub use system_time_source::{ManualTimeSource, SystemTimeSource};
pub use tracing_approval_notifier::TracingApprovalNotifier;
