use std::sync::Arc;

use sqlx::PgPool;
use warden_application::{
    ApprovalNotifier, ApprovalService, AuditRepository, AuditTrail, AuthorizationService,
    DirectoryRepository, DirectoryService, EngineSettings, PolicyRepository, QueryService,
    RoleAssignmentRepository, RoleAssignmentService, RoleDefinitionRegistry,
    RoleDefinitionRepository, RoleDefinitionService, ScheduleController, ScheduleRepository,
    ScheduleRequestService, ScheduleTicker, TimeSource,
};
use warden_core::AppError;
use warden_infrastructure::{HttpApprovalNotifier, SystemTimeSource, TracingApprovalNotifier};

use crate::api_config::{ApiConfig, NotifierConfig};
use crate::state::AppState;

use super::redis::build_redis_client;

const WEBHOOK_MAX_ATTEMPTS: u8 = 3;
const WEBHOOK_RETRY_BACKOFF_MS: u64 = 200;

/// Every repository port, backed by one store.
#[derive(Clone)]
pub struct StorePorts {
    pub directory: Arc<dyn DirectoryRepository>,
    pub definitions: Arc<dyn RoleDefinitionRepository>,
    pub policies: Arc<dyn PolicyRepository>,
    pub assignments: Arc<dyn RoleAssignmentRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub audit: Arc<dyn AuditRepository>,
}

impl StorePorts {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: DirectoryRepository
            + RoleDefinitionRepository
            + PolicyRepository
            + RoleAssignmentRepository
            + ScheduleRepository
            + AuditRepository
            + 'static,
    {
        Self {
            directory: store.clone(),
            definitions: store.clone(),
            policies: store.clone(),
            assignments: store.clone(),
            schedules: store.clone(),
            audit: store,
        }
    }
}

pub fn build_app_state(
    ports: StorePorts,
    config: &ApiConfig,
    postgres_pool: Option<PgPool>,
) -> Result<AppState, AppError> {
    let redis_client = config
        .redis_url
        .as_deref()
        .map(build_redis_client)
        .transpose()?;
    let notifier = build_approval_notifier(config)?;

    let mut state = wire_services(
        ports,
        Arc::new(SystemTimeSource),
        notifier,
        config.engine.clone(),
        config.gateway_shared_secret.as_str(),
    );
    state.postgres_pool = postgres_pool;
    state.redis_client = redis_client;

    Ok(state)
}

fn build_approval_notifier(config: &ApiConfig) -> Result<Arc<dyn ApprovalNotifier>, AppError> {
    match &config.notifier {
        NotifierConfig::Log => Ok(Arc::new(TracingApprovalNotifier::new())),
        NotifierConfig::Webhook { url } => {
            let http_client = reqwest::Client::builder()
                .timeout(config.engine.notify_timeout)
                .build()
                .map_err(|error| {
                    AppError::Internal(format!("failed to build webhook http client: {error}"))
                })?;
            Ok(Arc::new(HttpApprovalNotifier::new(
                http_client,
                url.as_str(),
                WEBHOOK_MAX_ATTEMPTS,
                WEBHOOK_RETRY_BACKOFF_MS,
            )))
        }
    }
}

/// Wires the role-management services over a set of ports.
pub(crate) fn wire_services(
    ports: StorePorts,
    clock: Arc<dyn TimeSource>,
    notifier: Arc<dyn ApprovalNotifier>,
    settings: EngineSettings,
    gateway_shared_secret: &str,
) -> AppState {
    let directory = DirectoryService::new(ports.directory.clone());
    let registry = RoleDefinitionRegistry::new(ports.definitions.clone());
    let audit = AuditTrail::new(ports.audit.clone());
    let authorization = AuthorizationService::new(
        registry.clone(),
        directory.clone(),
        ports.assignments.clone(),
        ports.schedules.clone(),
        clock.clone(),
    );
    let role_definitions = RoleDefinitionService::new(
        registry.clone(),
        authorization.clone(),
        ports.assignments.clone(),
        ports.schedules.clone(),
        audit.clone(),
        clock.clone(),
    );
    let approvals = ApprovalService::new(
        ports.policies.clone(),
        notifier,
        registry.clone(),
        directory.clone(),
        authorization.clone(),
        settings.clone(),
    );
    let controller = ScheduleController::new(
        ports.schedules.clone(),
        audit.clone(),
        clock.clone(),
        settings.clone(),
    );
    let schedule_requests = ScheduleRequestService::new(
        ports.schedules.clone(),
        registry.clone(),
        directory.clone(),
        authorization.clone(),
        approvals.clone(),
        controller.clone(),
        clock.clone(),
    );
    let ticker = ScheduleTicker::new(controller, schedule_requests.clone());
    let queries = QueryService::new(
        registry.clone(),
        directory.clone(),
        authorization.clone(),
        ports.assignments.clone(),
        ports.schedules.clone(),
        settings,
    );
    let role_assignments = RoleAssignmentService::new(
        ports.assignments.clone(),
        ports.schedules.clone(),
        registry,
        directory.clone(),
        authorization,
        audit,
        clock,
    );

    AppState {
        directory,
        role_definitions,
        role_assignments,
        approvals,
        schedule_requests,
        queries,
        ticker,
        ports,
        gateway_shared_secret: Arc::from(gateway_shared_secret),
        postgres_pool: None,
        redis_client: None,
    }
}
