use async_trait::async_trait;
use warden_application::{PolicyRepository, RoleDefinitionRepository};
use warden_core::{AppError, AppResult, RbacProvider};
use warden_domain::{ResourceAction, ResourceNamespace, RoleDefinition, RoleManagementPolicy};

use super::{CatalogState, InMemoryRoleManagementStore, key, of_provider};

fn bump_revision(
    catalog: &mut CatalogState,
    provider: RbacProvider,
    expected_revision: u64,
) -> AppResult<u64> {
    let revision = catalog.definition_revisions.entry(provider).or_default();
    if *revision != expected_revision {
        return Err(AppError::Conflict(format!(
            "role definitions of '{provider}' changed concurrently; retry the write"
        )));
    }
    *revision += 1;
    Ok(*revision)
}

#[async_trait]
impl RoleDefinitionRepository for InMemoryRoleManagementStore {
    async fn list_role_definitions(
        &self,
        provider: RbacProvider,
    ) -> AppResult<Vec<RoleDefinition>> {
        let catalog = self.catalog.read().await;
        Ok(of_provider(&catalog.definitions, provider, |stored| stored.0)
            .cloned()
            .collect())
    }

    async fn find_role_definition(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
    ) -> AppResult<Option<RoleDefinition>> {
        Ok(self
            .catalog
            .read()
            .await
            .definitions
            .get(&key(provider, role_definition_id))
            .cloned())
    }

    async fn role_definitions_revision(&self, provider: RbacProvider) -> AppResult<u64> {
        Ok(self
            .catalog
            .read()
            .await
            .definition_revisions
            .get(&provider)
            .copied()
            .unwrap_or_default())
    }

    async fn save_role_definition(
        &self,
        provider: RbacProvider,
        definition: RoleDefinition,
        expected_revision: u64,
    ) -> AppResult<u64> {
        let mut catalog = self.catalog.write().await;
        let revision = bump_revision(&mut catalog, provider, expected_revision)?;
        catalog
            .definitions
            .insert(key(provider, definition.id.as_str()), definition);
        Ok(revision)
    }

    async fn delete_role_definition(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
        expected_revision: u64,
    ) -> AppResult<u64> {
        let mut catalog = self.catalog.write().await;
        let revision = bump_revision(&mut catalog, provider, expected_revision)?;
        catalog.definitions.remove(&key(provider, role_definition_id));
        Ok(revision)
    }

    async fn create_resource_namespace(
        &self,
        provider: RbacProvider,
        namespace: ResourceNamespace,
    ) -> AppResult<()> {
        let mut catalog = self.catalog.write().await;
        let namespace_key = key(provider, namespace.id.as_str());
        if catalog.namespaces.contains_key(&namespace_key) {
            return Err(AppError::Conflict(format!(
                "resource namespace '{}' already exists",
                namespace.id
            )));
        }

        catalog.namespaces.insert(namespace_key, namespace);
        Ok(())
    }

    async fn list_resource_namespaces(
        &self,
        provider: RbacProvider,
    ) -> AppResult<Vec<ResourceNamespace>> {
        let catalog = self.catalog.read().await;
        Ok(of_provider(&catalog.namespaces, provider, |stored| stored.0)
            .cloned()
            .collect())
    }

    async fn find_resource_namespace(
        &self,
        provider: RbacProvider,
        namespace_id: &str,
    ) -> AppResult<Option<ResourceNamespace>> {
        Ok(self
            .catalog
            .read()
            .await
            .namespaces
            .get(&key(provider, namespace_id))
            .cloned())
    }

    async fn create_resource_action(
        &self,
        provider: RbacProvider,
        action: ResourceAction,
    ) -> AppResult<()> {
        let mut catalog = self.catalog.write().await;
        let duplicate = of_provider(&catalog.actions, provider, |stored| stored.0)
            .any(|existing| existing.id == action.id || existing.name.eq_ignore_ascii_case(&action.name));
        if duplicate {
            return Err(AppError::Conflict(format!(
                "resource action '{}' already exists",
                action.name
            )));
        }

        catalog
            .actions
            .insert(key(provider, action.id.as_str()), action);
        Ok(())
    }

    async fn list_resource_actions(
        &self,
        provider: RbacProvider,
        namespace_id: Option<&str>,
    ) -> AppResult<Vec<ResourceAction>> {
        let catalog = self.catalog.read().await;
        Ok(of_provider(&catalog.actions, provider, |stored| stored.0)
            .filter(|action| {
                namespace_id.is_none_or(|namespace_id| action.resource_namespace_id == namespace_id)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PolicyRepository for InMemoryRoleManagementStore {
    async fn find_policy(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
    ) -> AppResult<Option<RoleManagementPolicy>> {
        Ok(self
            .catalog
            .read()
            .await
            .policies
            .get(&key(provider, role_definition_id))
            .cloned())
    }

    async fn save_policy(
        &self,
        provider: RbacProvider,
        policy: RoleManagementPolicy,
    ) -> AppResult<()> {
        self.catalog
            .write()
            .await
            .policies
            .insert(key(provider, policy.role_definition_id.as_str()), policy);
        Ok(())
    }
}
