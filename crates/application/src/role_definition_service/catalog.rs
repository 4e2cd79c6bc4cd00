use warden_core::{AppError, AppResult, CallerIdentity, RbacProvider};
use warden_domain::{AuditAction, ResourceAction, ResourceNamespace, RoleScope};

use super::RoleDefinitionService;
use crate::role_management_ports::AuditEvent;

/// Payload for adding an action to a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateResourceActionInput {
    /// Explicit id; a random id is generated when absent.
    pub id: Option<String>,
    /// Full action name inside the namespace.
    pub name: String,
    /// Description.
    pub description: String,
    /// Whether the action is privileged.
    pub is_privileged: bool,
}

impl RoleDefinitionService {
    /// Adds a namespace to the catalog.
    pub async fn create_resource_namespace(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        name: &str,
    ) -> AppResult<ResourceNamespace> {
        self.authorization
            .require_role_management(provider, caller, &RoleScope::root())
            .await?;

        let namespace = ResourceNamespace::new(name)?;
        self.registry
            .repository()
            .create_resource_namespace(provider, namespace.clone())
            .await?;
        self.audit
            .record(
                AuditEvent::new(
                    provider,
                    self.clock.now(),
                    caller.principal_id(),
                    AuditAction::ResourceCatalogChanged,
                    "resource_namespace",
                    namespace.id.as_str(),
                )
                .with_detail("namespace created"),
            )
            .await;

        Ok(namespace)
    }

    /// Lists namespaces.
    pub async fn list_resource_namespaces(
        &self,
        provider: RbacProvider,
    ) -> AppResult<Vec<ResourceNamespace>> {
        self.registry
            .repository()
            .list_resource_namespaces(provider)
            .await
    }

    /// Returns one namespace or `NotFound`.
    pub async fn get_resource_namespace(
        &self,
        provider: RbacProvider,
        namespace_id: &str,
    ) -> AppResult<ResourceNamespace> {
        self.registry
            .repository()
            .find_resource_namespace(provider, namespace_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("resource namespace '{namespace_id}' does not exist"))
            })
    }

    /// Adds an action to an existing namespace.
    pub async fn create_resource_action(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        namespace_id: &str,
        input: CreateResourceActionInput,
    ) -> AppResult<ResourceAction> {
        self.authorization
            .require_role_management(provider, caller, &RoleScope::root())
            .await?;

        let namespace = self.get_resource_namespace(provider, namespace_id).await?;
        let id = input
            .id
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let action = ResourceAction::new(
            id,
            &namespace,
            input.name,
            input.description,
            input.is_privileged,
        )?;
        self.registry
            .repository()
            .create_resource_action(provider, action.clone())
            .await?;
        self.audit
            .record(
                AuditEvent::new(
                    provider,
                    self.clock.now(),
                    caller.principal_id(),
                    AuditAction::ResourceCatalogChanged,
                    "resource_action",
                    action.id.as_str(),
                )
                .with_detail(format!("action '{}' created", action.name)),
            )
            .await;

        Ok(action)
    }

    /// Lists the actions of one namespace.
    pub async fn list_resource_actions(
        &self,
        provider: RbacProvider,
        namespace_id: &str,
    ) -> AppResult<Vec<ResourceAction>> {
        self.get_resource_namespace(provider, namespace_id).await?;
        self.registry
            .repository()
            .list_resource_actions(provider, Some(namespace_id))
            .await
    }

    /// Returns one action of a namespace or `NotFound`.
    pub async fn get_resource_action(
        &self,
        provider: RbacProvider,
        namespace_id: &str,
        action_id: &str,
    ) -> AppResult<ResourceAction> {
        self.list_resource_actions(provider, namespace_id)
            .await?
            .into_iter()
            .find(|action| action.id == action_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "resource action '{action_id}' does not exist in '{namespace_id}'"
                ))
            })
    }
}
