use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use warden_core::{AppError, AppResult, RbacProvider};
use warden_domain::{EffectivePermissions, RoleDefinition, effective_permissions};

use crate::role_management_ports::RoleDefinitionRepository;

/// Closures memoized per provider, valid only at the store revision they were built from.
#[derive(Default)]
struct ClosureCache {
    revisions: HashMap<RbacProvider, u64>,
    entries: HashMap<(RbacProvider, String), Arc<EffectivePermissions>>,
}

impl ClosureCache {
    /// Drops the provider's closures when they were built at another revision.
    fn align(&mut self, provider: RbacProvider, revision: u64) {
        if self.revisions.get(&provider) != Some(&revision) {
            self.entries
                .retain(|(cached_provider, _), _| *cached_provider != provider);
            self.revisions.insert(provider, revision);
        }
    }
}

/// Read side of role definitions with a memoized permission closure.
///
/// The memo is checked against the store's definition revision on every read, so writes
/// made by other processes sharing the store are picked up.
#[derive(Clone)]
pub struct RoleDefinitionRegistry {
    repository: Arc<dyn RoleDefinitionRepository>,
    closures: Arc<RwLock<ClosureCache>>,
}

impl RoleDefinitionRegistry {
    /// Creates a registry over the repository.
    #[must_use]
    pub fn new(repository: Arc<dyn RoleDefinitionRepository>) -> Self {
        Self {
            repository,
            closures: Arc::new(RwLock::new(ClosureCache::default())),
        }
    }

    pub(crate) fn repository(&self) -> &Arc<dyn RoleDefinitionRepository> {
        &self.repository
    }

    /// Current definition revision of the provider.
    pub async fn revision(&self, provider: RbacProvider) -> AppResult<u64> {
        self.repository.role_definitions_revision(provider).await
    }

    /// Returns a role definition or `NotFound`.
    pub async fn find(&self, provider: RbacProvider, id: &str) -> AppResult<RoleDefinition> {
        self.repository
            .find_role_definition(provider, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("role definition '{id}' does not exist")))
    }

    /// Lists role definitions.
    pub async fn list(&self, provider: RbacProvider) -> AppResult<Vec<RoleDefinition>> {
        self.repository.list_role_definitions(provider).await
    }

    /// Role definitions keyed by id.
    pub async fn definitions(
        &self,
        provider: RbacProvider,
    ) -> AppResult<HashMap<String, RoleDefinition>> {
        Ok(self
            .list(provider)
            .await?
            .into_iter()
            .map(|definition| (definition.id.clone(), definition))
            .collect())
    }

    /// Flattened permissions of `{id} ∪ transitive inheritsPermissionsFrom(id)`.
    pub async fn effective_permissions(
        &self,
        provider: RbacProvider,
        id: &str,
    ) -> AppResult<Arc<EffectivePermissions>> {
        let key = (provider, id.to_owned());
        let revision = self.revision(provider).await?;
        {
            let cache = self.closures.read().await;
            if cache.revisions.get(&provider) == Some(&revision)
                && let Some(cached) = cache.entries.get(&key)
            {
                return Ok(Arc::clone(cached));
            }
        }

        let definitions = self.definitions(provider).await?;
        let computed = Arc::new(effective_permissions(id, &definitions)?);

        // Only a closure read entirely at one revision is memoized.
        if self.revision(provider).await? == revision {
            let mut cache = self.closures.write().await;
            cache.align(provider, revision);
            cache.entries.insert(key, Arc::clone(&computed));
        }

        Ok(computed)
    }

    /// Drops memoized closures of the provider after a role-definition write.
    pub async fn invalidate(&self, provider: RbacProvider) {
        let mut cache = self.closures.write().await;
        cache.revisions.remove(&provider);
        cache
            .entries
            .retain(|(cached_provider, _), _| *cached_provider != provider);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use warden_domain::{RoleDefinition, RoleDefinitionInput, RolePermission};

    use super::RoleDefinitionRegistry;
    use crate::role_management_ports::RoleDefinitionRepository;
    use crate::test_support::{FakeStore, PROVIDER, USERS_READ, epoch};

    const GROUPS_READ: &str = "microsoft.directory/groups/read";

    fn reader(action: &str) -> RoleDefinition {
        RoleDefinition::new(
            "reader",
            RoleDefinitionInput {
                display_name: "Reader".to_owned(),
                description: String::new(),
                is_enabled: true,
                template_id: None,
                role_permissions: vec![RolePermission::new([action], Vec::<String>::new())],
                inherits_permissions_from: BTreeSet::new(),
            },
            true,
            epoch(),
        )
        .unwrap_or_else(|error| panic!("{error}"))
    }

    #[tokio::test]
    async fn writes_through_another_registry_refresh_the_memo() {
        let store = Arc::new(FakeStore::default());
        let saved = store.save_role_definition(PROVIDER, reader(USERS_READ), 0).await;
        assert!(matches!(saved, Ok(1)));

        // Two registries over one store stand in for two processes.
        let local = RoleDefinitionRegistry::new(store.clone());
        let remote = RoleDefinitionRegistry::new(store.clone());
        let before = local
            .effective_permissions(PROVIDER, "reader")
            .await
            .unwrap_or_else(|error| panic!("{error}"));
        assert!(before.allows(USERS_READ));

        let revision = remote
            .revision(PROVIDER)
            .await
            .unwrap_or_else(|error| panic!("{error}"));
        let replaced = remote
            .repository()
            .save_role_definition(PROVIDER, reader(GROUPS_READ), revision)
            .await;
        assert!(matches!(replaced, Ok(2)));

        let after = local
            .effective_permissions(PROVIDER, "reader")
            .await
            .unwrap_or_else(|error| panic!("{error}"));
        assert!(!after.allows(USERS_READ));
        assert!(after.allows(GROUPS_READ));
    }

    #[tokio::test]
    async fn repeated_reads_at_one_revision_share_the_memo() {
        let store = Arc::new(FakeStore::default());
        let saved = store.save_role_definition(PROVIDER, reader(USERS_READ), 0).await;
        assert!(saved.is_ok());
        let registry = RoleDefinitionRegistry::new(store);

        let first = registry.effective_permissions(PROVIDER, "reader").await;
        let second = registry.effective_permissions(PROVIDER, "reader").await;

        match (first, second) {
            (Ok(first), Ok(second)) => assert!(Arc::ptr_eq(&first, &second)),
            other => panic!("closures should resolve: {other:?}"),
        }
    }
}
