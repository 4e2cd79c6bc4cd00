use async_trait::async_trait;
use warden_core::AppResult;
use warden_domain::{AppScope, DirectoryObject, Principal};

/// Repository port for the identity and scope catalog shared by every provider.
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    /// Inserts or replaces a principal.
    async fn save_principal(&self, principal: Principal) -> AppResult<()>;

    /// Finds one principal.
    async fn find_principal(&self, principal_id: &str) -> AppResult<Option<Principal>>;

    /// Inserts or replaces a directory object.
    async fn save_directory_object(&self, object: DirectoryObject) -> AppResult<()>;

    /// Finds one directory object.
    async fn find_directory_object(&self, object_id: &str) -> AppResult<Option<DirectoryObject>>;

    /// Inserts or replaces an app scope.
    async fn save_app_scope(&self, app_scope: AppScope) -> AppResult<()>;

    /// Finds one app scope.
    async fn find_app_scope(&self, app_scope_id: &str) -> AppResult<Option<AppScope>>;

    /// Adds a direct group membership; repeated calls are no-ops.
    async fn add_group_member(&self, group_id: &str, member_id: &str) -> AppResult<()>;

    /// Lists groups the member belongs to directly.
    async fn list_direct_group_ids(&self, member_id: &str) -> AppResult<Vec<String>>;

    /// Lists direct members of a group.
    async fn list_group_member_ids(&self, group_id: &str) -> AppResult<Vec<String>>;
}
