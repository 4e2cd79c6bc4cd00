use async_trait::async_trait;
use warden_core::{AppResult, RbacProvider};
use warden_domain::{ResourceAction, ResourceNamespace, RoleDefinition};

/// Repository port for role definitions, their inheritance edges and the action catalog.
#[async_trait]
pub trait RoleDefinitionRepository: Send + Sync {
    /// Lists role definitions with their `inheritsPermissionsFrom` edges.
    async fn list_role_definitions(&self, provider: RbacProvider)
    -> AppResult<Vec<RoleDefinition>>;

    /// Finds one role definition with its edges.
    async fn find_role_definition(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
    ) -> AppResult<Option<RoleDefinition>>;

    /// Counter bumped by every definition write of the provider; starts at zero.
    async fn role_definitions_revision(&self, provider: RbacProvider) -> AppResult<u64>;

    /// Inserts or replaces a role definition and its inheritance edges.
    ///
    /// Fails with `Conflict` unless the provider is still at `expected_revision`;
    /// returns the bumped revision.
    async fn save_role_definition(
        &self,
        provider: RbacProvider,
        definition: RoleDefinition,
        expected_revision: u64,
    ) -> AppResult<u64>;

    /// Deletes a role definition and its outgoing edges under the same revision check.
    async fn delete_role_definition(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
        expected_revision: u64,
    ) -> AppResult<u64>;

    /// Inserts a namespace; duplicates are conflicts.
    async fn create_resource_namespace(
        &self,
        provider: RbacProvider,
        namespace: ResourceNamespace,
    ) -> AppResult<()>;

    /// Lists namespaces.
    async fn list_resource_namespaces(
        &self,
        provider: RbacProvider,
    ) -> AppResult<Vec<ResourceNamespace>>;

    /// Finds one namespace.
    async fn find_resource_namespace(
        &self,
        provider: RbacProvider,
        namespace_id: &str,
    ) -> AppResult<Option<ResourceNamespace>>;

    /// Inserts an action; duplicate ids or names are conflicts.
    async fn create_resource_action(
        &self,
        provider: RbacProvider,
        action: ResourceAction,
    ) -> AppResult<()>;

    /// Lists actions, optionally restricted to one namespace.
    async fn list_resource_actions(
        &self,
        provider: RbacProvider,
        namespace_id: Option<&str>,
    ) -> AppResult<Vec<ResourceAction>>;
}
