use std::collections::HashMap;
use std::sync::Arc;

use warden_core::{AppError, AppResult, CallerIdentity, RbacProvider};
use warden_domain::{
    AuditAction, EffectivePermissions, ResourceAction, RoleDefinition, RoleDefinitionInput,
    RoleScope, action_matches, ensure_acyclic,
};

use crate::audit_trail::AuditTrail;
use crate::authorization_service::AuthorizationService;
use crate::keyed_lock::{KeyedLock, KeyedLockGuard};
use crate::role_definition_registry::RoleDefinitionRegistry;
use crate::role_management_ports::{
    AuditEvent, RoleAssignmentRepository, ScheduleRepository, TimeSource,
};

mod catalog;
mod inheritance;

pub use catalog::CreateResourceActionInput;

/// Role definition registry: CRUD, inheritance reads and the resource action catalog.
///
/// Definition writes of one provider run one at a time in this process; the store's
/// revision check turns a write racing another process into a `Conflict`.
#[derive(Clone)]
pub struct RoleDefinitionService {
    registry: RoleDefinitionRegistry,
    writes: KeyedLock,
    authorization: AuthorizationService,
    assignments: Arc<dyn RoleAssignmentRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    audit: AuditTrail,
    clock: Arc<dyn TimeSource>,
}

impl RoleDefinitionService {
    /// Creates a role definition service.
    #[must_use]
    pub fn new(
        registry: RoleDefinitionRegistry,
        authorization: AuthorizationService,
        assignments: Arc<dyn RoleAssignmentRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        audit: AuditTrail,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            registry,
            writes: KeyedLock::new(),
            authorization,
            assignments,
            schedules,
            audit,
            clock,
        }
    }

    /// Returns one role definition; any authenticated caller may read definitions.
    pub async fn get_role_definition(
        &self,
        provider: RbacProvider,
        id: &str,
    ) -> AppResult<RoleDefinition> {
        self.registry.find(provider, id).await
    }

    /// Lists role definitions.
    pub async fn list_role_definitions(
        &self,
        provider: RbacProvider,
    ) -> AppResult<Vec<RoleDefinition>> {
        self.registry.list(provider).await
    }

    /// Flattened permissions of the role and its transitive parents.
    pub async fn effective_permissions(
        &self,
        provider: RbacProvider,
        id: &str,
    ) -> AppResult<Arc<EffectivePermissions>> {
        self.registry.effective_permissions(provider, id).await
    }

    /// Creates a custom role definition.
    pub async fn create_role_definition(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        input: RoleDefinitionInput,
    ) -> AppResult<RoleDefinition> {
        self.authorization
            .require_role_management(provider, caller, &RoleScope::root())
            .await?;

        let definition = RoleDefinition::new(
            uuid::Uuid::new_v4().to_string(),
            input,
            false,
            self.clock.now(),
        )?;
        let _guard = self.lock_writes(provider).await;
        let revision = self.registry.revision(provider).await?;
        let definitions = self.registry.definitions(provider).await?;
        self.validate_definition(provider, &definition, &definitions)
            .await?;

        self.save(caller, provider, definition, revision, AuditAction::RoleDefinitionCreated)
            .await
    }

    /// Creates or replaces a built-in role definition; reserved for seeding and bootstrap.
    pub async fn register_built_in(
        &self,
        provider: RbacProvider,
        id: &str,
        input: RoleDefinitionInput,
    ) -> AppResult<RoleDefinition> {
        let now = self.clock.now();
        let _guard = self.lock_writes(provider).await;
        let revision = self.registry.revision(provider).await?;
        let definitions = self.registry.definitions(provider).await?;
        let definition = match definitions.get(id) {
            Some(existing) if existing.is_built_in => existing.updated(input, now)?,
            Some(_) => {
                return Err(AppError::Conflict(format!(
                    "role definition '{id}' already exists as a custom role"
                )));
            }
            None => RoleDefinition::new(id, input, true, now)?,
        };
        self.validate_definition(provider, &definition, &definitions)
            .await?;

        let action = if definitions.contains_key(id) {
            AuditAction::RoleDefinitionUpdated
        } else {
            AuditAction::RoleDefinitionCreated
        };
        self.save(&CallerIdentity::system(), provider, definition, revision, action)
            .await
    }

    /// Replaces the mutable attributes of a role definition and bumps its version.
    pub async fn update_role_definition(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        id: &str,
        input: RoleDefinitionInput,
    ) -> AppResult<RoleDefinition> {
        self.authorization
            .require_role_management(provider, caller, &RoleScope::root())
            .await?;

        let _guard = self.lock_writes(provider).await;
        let revision = self.registry.revision(provider).await?;
        let definitions = self.registry.definitions(provider).await?;
        let existing = definitions
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("role definition '{id}' does not exist")))?;
        let definition = existing.updated(input, self.clock.now())?;
        self.validate_definition(provider, &definition, &definitions)
            .await?;

        self.save(caller, provider, definition, revision, AuditAction::RoleDefinitionUpdated)
            .await
    }

    /// Deletes a custom role definition that nothing references.
    pub async fn delete_role_definition(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        id: &str,
    ) -> AppResult<()> {
        self.authorization
            .require_role_management(provider, caller, &RoleScope::root())
            .await?;

        let _guard = self.lock_writes(provider).await;
        let revision = self.registry.revision(provider).await?;
        let definitions = self.registry.definitions(provider).await?;
        let definition = definitions
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("role definition '{id}' does not exist")))?;
        if definition.is_built_in {
            return Err(AppError::NotSupported(format!(
                "built-in role definition '{id}' cannot be deleted"
            )));
        }

        let references = self
            .schedules
            .count_role_definition_references(provider, id)
            .await?;
        let assignments = self
            .assignments
            .list_role_assignments(provider)
            .await?
            .into_iter()
            .filter(|assignment| assignment.role_definition_id == id)
            .count();
        let inheritors = definitions
            .values()
            .filter(|candidate| candidate.inherits_permissions_from.contains(id))
            .count();
        if references > 0 || assignments > 0 || inheritors > 0 {
            return Err(AppError::InUse(format!(
                "role definition '{id}' is referenced by {references} schedules or requests, \
                 {assignments} assignments and {inheritors} inheriting roles"
            )));
        }

        self.registry
            .repository()
            .delete_role_definition(provider, id, revision)
            .await?;
        self.registry.invalidate(provider).await;
        self.audit
            .record(AuditEvent::new(
                provider,
                self.clock.now(),
                caller.principal_id(),
                AuditAction::RoleDefinitionDeleted,
                "role_definition",
                id,
            ))
            .await;

        Ok(())
    }

    async fn lock_writes(&self, provider: RbacProvider) -> KeyedLockGuard {
        self.writes
            .acquire(format!("role-definitions|{provider}"))
            .await
    }

    async fn validate_definition(
        &self,
        provider: RbacProvider,
        definition: &RoleDefinition,
        definitions: &HashMap<String, RoleDefinition>,
    ) -> AppResult<()> {
        let actions = self
            .registry
            .repository()
            .list_resource_actions(provider, None)
            .await?;
        ensure_known_actions(definition, &actions)?;

        if !definition.is_built_in
            && let Some(duplicate) = definitions.values().find(|candidate| {
                !candidate.is_built_in
                    && candidate.id != definition.id
                    && candidate.template_id == definition.template_id
            })
        {
            return Err(AppError::Conflict(format!(
                "templateId '{}' is already used by role definition '{}'",
                definition.template_id, duplicate.id
            )));
        }

        for parent_id in &definition.inherits_permissions_from {
            if !definitions.contains_key(parent_id) {
                return Err(AppError::NotFound(format!(
                    "parent role definition '{parent_id}' does not exist"
                )));
            }
        }
        ensure_acyclic(
            definition.id.as_str(),
            &definition.inherits_permissions_from,
            definitions,
        )
    }

    async fn save(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        definition: RoleDefinition,
        revision: u64,
        action: AuditAction,
    ) -> AppResult<RoleDefinition> {
        self.registry
            .repository()
            .save_role_definition(provider, definition.clone(), revision)
            .await?;
        self.registry.invalidate(provider).await;
        self.audit
            .record(
                AuditEvent::new(
                    provider,
                    self.clock.now(),
                    caller.principal_id(),
                    action,
                    "role_definition",
                    definition.id.as_str(),
                )
                .with_detail(format!("version {}", definition.version)),
            )
            .await;

        Ok(definition)
    }
}

/// Every allowed or excluded pattern must match at least one catalog action.
fn ensure_known_actions(definition: &RoleDefinition, actions: &[ResourceAction]) -> AppResult<()> {
    for pattern in definition
        .role_permissions
        .iter()
        .flat_map(|block| block.patterns())
    {
        if !actions
            .iter()
            .any(|action| action_matches(pattern, action.name.as_str()))
        {
            return Err(AppError::Validation(format!(
                "resource action '{pattern}' is not in the catalog"
            )));
        }
    }

    Ok(())
}
