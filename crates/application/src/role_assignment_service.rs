use std::sync::Arc;

use warden_core::{AppError, AppResult, CallerIdentity, RbacProvider};
use warden_domain::{AuditAction, RoleAssignment, RoleScope, ScheduleKind};

use crate::audit_trail::AuditTrail;
use crate::authorization_service::AuthorizationService;
use crate::directory_service::DirectoryService;
use crate::role_definition_registry::RoleDefinitionRegistry;
use crate::role_management_ports::{
    AuditEvent, RoleAssignmentRepository, ScheduleRepository, TimeSource,
};

/// Payload for a persistent role assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRoleAssignmentInput {
    /// Principal receiving the role.
    pub principal_id: String,
    /// Assigned role.
    pub role_definition_id: String,
    /// Scope of the assignment.
    pub scope: RoleScope,
    /// Optional condition carried through unchanged.
    pub condition: Option<String>,
}

/// Persistent (non-scheduled) role assignments.
#[derive(Clone)]
pub struct RoleAssignmentService {
    repository: Arc<dyn RoleAssignmentRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    registry: RoleDefinitionRegistry,
    directory: DirectoryService,
    authorization: AuthorizationService,
    audit: AuditTrail,
    clock: Arc<dyn TimeSource>,
}

impl RoleAssignmentService {
    /// Creates a role assignment service.
    #[must_use]
    pub fn new(
        repository: Arc<dyn RoleAssignmentRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        registry: RoleDefinitionRegistry,
        directory: DirectoryService,
        authorization: AuthorizationService,
        audit: AuditTrail,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            repository,
            schedules,
            registry,
            directory,
            authorization,
            audit,
            clock,
        }
    }

    /// Creates an assignment; repeating it for the same triple returns the stored row.
    pub async fn create_role_assignment(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        input: CreateRoleAssignmentInput,
    ) -> AppResult<RoleAssignment> {
        self.authorization
            .require_role_management(provider, caller, &input.scope)
            .await?;
        self.directory.principal(input.principal_id.as_str()).await?;
        self.directory.resolve_scope(&input.scope).await?;
        let definition = self
            .registry
            .find(provider, input.role_definition_id.as_str())
            .await?;
        if !definition.is_enabled {
            return Err(AppError::Validation(format!(
                "role definition '{}' is disabled",
                definition.id
            )));
        }

        let candidate = RoleAssignment {
            id: uuid::Uuid::new_v4().to_string(),
            principal_id: input.principal_id,
            role_definition_id: input.role_definition_id,
            scope: input.scope,
            condition: input.condition,
            created_date_time: self.clock.now(),
            schedule_id: None,
        };
        let stored = self
            .repository
            .insert_role_assignment(provider, candidate.clone())
            .await?;

        if stored.id == candidate.id {
            self.audit
                .record(AuditEvent::new(
                    provider,
                    self.clock.now(),
                    caller.principal_id(),
                    AuditAction::RoleAssignmentCreated,
                    "role_assignment",
                    stored.id.as_str(),
                ))
                .await;
        }

        Ok(stored)
    }

    /// Returns one assignment or `NotFound`.
    pub async fn get_role_assignment(
        &self,
        provider: RbacProvider,
        id: &str,
    ) -> AppResult<RoleAssignment> {
        self.repository
            .find_role_assignment(provider, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("role assignment '{id}' does not exist")))
    }

    /// Deletes an assignment unless a live schedule still backs it with an active instance.
    pub async fn delete_role_assignment(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        id: &str,
    ) -> AppResult<()> {
        let assignment = self.get_role_assignment(provider, id).await?;
        self.authorization
            .require_role_management(provider, caller, &assignment.scope)
            .await?;

        if let Some(schedule_id) = assignment.schedule_id.as_deref() {
            let schedule = self
                .schedules
                .find_schedule(provider, ScheduleKind::Assignment, schedule_id)
                .await?;
            if let Some(schedule) = schedule.filter(|schedule| schedule.status.is_live()) {
                let now = self.clock.now();
                let active = self
                    .schedules
                    .list_instances_for_schedule(
                        provider,
                        ScheduleKind::Assignment,
                        schedule.id.as_str(),
                    )
                    .await?
                    .iter()
                    .any(|instance| instance.is_active_at(now));
                if active {
                    return Err(AppError::InUse(format!(
                        "role assignment '{id}' is provisioned by active schedule '{}'; \
                         remove it with an adminRemove request",
                        schedule.id
                    )));
                }
            }
        }

        self.repository.delete_role_assignment(provider, id).await?;
        self.audit
            .record(AuditEvent::new(
                provider,
                self.clock.now(),
                caller.principal_id(),
                AuditAction::RoleAssignmentDeleted,
                "role_assignment",
                id,
            ))
            .await;

        Ok(())
    }
}
