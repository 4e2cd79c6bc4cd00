use async_trait::async_trait;
use warden_application::DirectoryRepository;
use warden_core::AppResult;
use warden_domain::{AppScope, DirectoryObject, Principal};

use super::InMemoryRoleManagementStore;

#[async_trait]
impl DirectoryRepository for InMemoryRoleManagementStore {
    async fn save_principal(&self, principal: Principal) -> AppResult<()> {
        self.directory
            .write()
            .await
            .principals
            .insert(principal.id.clone(), principal);
        Ok(())
    }

    async fn find_principal(&self, principal_id: &str) -> AppResult<Option<Principal>> {
        Ok(self.directory.read().await.principals.get(principal_id).cloned())
    }

    async fn save_directory_object(&self, object: DirectoryObject) -> AppResult<()> {
        self.directory
            .write()
            .await
            .objects
            .insert(object.id.clone(), object);
        Ok(())
    }

    async fn find_directory_object(&self, object_id: &str) -> AppResult<Option<DirectoryObject>> {
        Ok(self.directory.read().await.objects.get(object_id).cloned())
    }

    async fn save_app_scope(&self, app_scope: AppScope) -> AppResult<()> {
        self.directory
            .write()
            .await
            .app_scopes
            .insert(app_scope.id.clone(), app_scope);
        Ok(())
    }

    async fn find_app_scope(&self, app_scope_id: &str) -> AppResult<Option<AppScope>> {
        Ok(self.directory.read().await.app_scopes.get(app_scope_id).cloned())
    }

    async fn add_group_member(&self, group_id: &str, member_id: &str) -> AppResult<()> {
        self.directory
            .write()
            .await
            .memberships
            .insert((group_id.to_owned(), member_id.to_owned()));
        Ok(())
    }

    async fn list_direct_group_ids(&self, member_id: &str) -> AppResult<Vec<String>> {
        Ok(self
            .directory
            .read()
            .await
            .memberships
            .iter()
            .filter(|(_, member)| member == member_id)
            .map(|(group, _)| group.clone())
            .collect())
    }

    async fn list_group_member_ids(&self, group_id: &str) -> AppResult<Vec<String>> {
        Ok(self
            .directory
            .read()
            .await
            .memberships
            .iter()
            .filter(|(group, _)| group == group_id)
            .map(|(_, member)| member.clone())
            .collect())
    }
}
