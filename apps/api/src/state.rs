use std::sync::Arc;

use sqlx::PgPool;
use warden_application::{
    ApprovalService, DirectoryService, QueryService, RoleAssignmentService, RoleDefinitionService,
    ScheduleRequestService, ScheduleTicker,
};

use crate::api_services::StorePorts;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub directory: DirectoryService,
    pub role_definitions: RoleDefinitionService,
    pub role_assignments: RoleAssignmentService,
    pub approvals: ApprovalService,
    pub schedule_requests: ScheduleRequestService,
    pub queries: QueryService,
    pub ticker: ScheduleTicker,
    pub ports: StorePorts,
    pub gateway_shared_secret: Arc<str>,
    pub postgres_pool: Option<PgPool>,
    pub redis_client: Option<redis::Client>,
}
