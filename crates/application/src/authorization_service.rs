use std::collections::BTreeSet;
use std::sync::Arc;

use warden_core::{AppError, AppResult, CallerIdentity, RbacProvider};
use warden_domain::{
    PrincipalKind, RoleScope, ScheduleKind, role_management_action, role_management_read_action,
};

use crate::directory_service::DirectoryService;
use crate::role_definition_registry::RoleDefinitionRegistry;
use crate::role_management_ports::{RoleAssignmentRepository, ScheduleRepository, TimeSource};

/// Role currently held by a principal, directly or through a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holding {
    /// Principal or group the role is bound to.
    pub holder_id: String,
    /// Held role.
    pub role_definition_id: String,
    /// Scope of the holding.
    pub scope: RoleScope,
}

/// Scope authorization over persistent assignments and active assignment instances.
#[derive(Clone)]
pub struct AuthorizationService {
    registry: RoleDefinitionRegistry,
    directory: DirectoryService,
    assignments: Arc<dyn RoleAssignmentRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    clock: Arc<dyn TimeSource>,
}

impl AuthorizationService {
    /// Creates an authorization service.
    #[must_use]
    pub fn new(
        registry: RoleDefinitionRegistry,
        directory: DirectoryService,
        assignments: Arc<dyn RoleAssignmentRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            registry,
            directory,
            assignments,
            schedules,
            clock,
        }
    }

    /// Roles the principal holds right now, including through its groups.
    pub async fn holdings(
        &self,
        provider: RbacProvider,
        principal_id: &str,
    ) -> AppResult<Vec<Holding>> {
        let principal_ids = self.directory.principal_and_group_ids(principal_id).await?;
        let now = self.clock.now();

        let persistent = self
            .assignments
            .list_role_assignments_for_principals(provider, &principal_ids)
            .await?
            .into_iter()
            .map(|assignment| Holding {
                holder_id: assignment.principal_id,
                role_definition_id: assignment.role_definition_id,
                scope: assignment.scope,
            });
        let active = self
            .schedules
            .list_active_assignment_instances(provider, &principal_ids, now)
            .await?
            .into_iter()
            .map(|instance| Holding {
                holder_id: instance.principal_id,
                role_definition_id: instance.role_definition_id,
                scope: instance.scope,
            });

        Ok(persistent.chain(active).collect())
    }

    /// Returns whether the caller may perform the action at the target scope.
    pub async fn is_permitted(
        &self,
        provider: RbacProvider,
        caller: &CallerIdentity,
        action: &str,
        target: &RoleScope,
    ) -> AppResult<bool> {
        if caller.is_system() {
            return Ok(true);
        }

        for holding in self.holdings(provider, caller.principal_id()).await? {
            if self.holding_grants(provider, &holding, action, target).await? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn holding_grants(
        &self,
        provider: RbacProvider,
        holding: &Holding,
        action: &str,
        target: &RoleScope,
    ) -> AppResult<bool> {
        let definition = match self
            .registry
            .find(provider, holding.role_definition_id.as_str())
            .await
        {
            Ok(definition) => definition,
            Err(AppError::NotFound(_)) => return Ok(false),
            Err(error) => return Err(error),
        };
        if !definition.is_enabled {
            return Ok(false);
        }

        let permissions = self
            .registry
            .effective_permissions(provider, definition.id.as_str())
            .await?;
        if !permissions.allows(action) {
            return Ok(false);
        }

        self.directory.scope_covers(&holding.scope, target).await
    }

    /// Requires role-management permission over the scope.
    pub async fn require_role_management(
        &self,
        provider: RbacProvider,
        caller: &CallerIdentity,
        scope: &RoleScope,
    ) -> AppResult<()> {
        if self
            .is_permitted(provider, caller, role_management_action(provider), scope)
            .await?
        {
            return Ok(());
        }

        Err(AppError::Forbidden(format!(
            "principal '{}' may not manage roles at scope '{}'",
            caller.principal_id(),
            scope.storage_key()
        )))
    }

    /// Returns whether the caller may read role-management state at the scope.
    pub async fn can_read_scope(
        &self,
        provider: RbacProvider,
        caller: &CallerIdentity,
        scope: &RoleScope,
    ) -> AppResult<bool> {
        Ok(self
            .is_permitted(provider, caller, role_management_read_action(provider), scope)
            .await?
            || self
                .is_permitted(provider, caller, role_management_action(provider), scope)
                .await?)
    }

    /// Requires read access at the scope.
    pub async fn require_scope_read(
        &self,
        provider: RbacProvider,
        caller: &CallerIdentity,
        scope: &RoleScope,
    ) -> AppResult<()> {
        if self.can_read_scope(provider, caller, scope).await? {
            return Ok(());
        }

        Err(AppError::Forbidden(format!(
            "principal '{}' may not read role management state at scope '{}'",
            caller.principal_id(),
            scope.storage_key()
        )))
    }

    /// Non-group principals that currently hold role-management permission over the scope.
    pub async fn list_role_managers(
        &self,
        provider: RbacProvider,
        scope: &RoleScope,
    ) -> AppResult<BTreeSet<String>> {
        let now = self.clock.now();
        let mut holdings: Vec<Holding> = self
            .assignments
            .list_role_assignments(provider)
            .await?
            .into_iter()
            .map(|assignment| Holding {
                holder_id: assignment.principal_id,
                role_definition_id: assignment.role_definition_id,
                scope: assignment.scope,
            })
            .collect();
        holdings.extend(
            self.schedules
                .list_instances(provider, ScheduleKind::Assignment)
                .await?
                .into_iter()
                .filter(|instance| instance.is_active_at(now))
                .map(|instance| Holding {
                    holder_id: instance.principal_id,
                    role_definition_id: instance.role_definition_id,
                    scope: instance.scope,
                }),
        );

        let action = role_management_action(provider);
        let mut managers = BTreeSet::new();
        for holding in holdings {
            if !self.holding_grants(provider, &holding, action, scope).await? {
                continue;
            }
            let holder = self.directory.principal(holding.holder_id.as_str()).await;
            match holder {
                Ok(holder) if holder.kind == PrincipalKind::Group => {
                    managers.extend(self.directory.expand_members(holder.id.as_str()).await?);
                }
                Ok(holder) => {
                    managers.insert(holder.id);
                }
                Err(AppError::NotFound(_)) => {}
                Err(error) => return Err(error),
            }
        }

        Ok(managers)
    }
}

#[cfg(test)]
mod tests;
