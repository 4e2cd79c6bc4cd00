use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use warden_core::{AppError, AppResult};
use warden_domain::{
    AppScope, DirectoryObject, Principal, PrincipalKind, RoleScope, directory_scope_object_id,
};

use crate::role_management_ports::DirectoryRepository;

/// Identity and scope catalog: principals, directory objects, app scopes and groups.
#[derive(Clone)]
pub struct DirectoryService {
    repository: Arc<dyn DirectoryRepository>,
}

impl DirectoryService {
    /// Creates a directory service.
    #[must_use]
    pub fn new(repository: Arc<dyn DirectoryRepository>) -> Self {
        Self { repository }
    }

    /// Registers or replaces a principal.
    pub async fn register_principal(&self, principal: Principal) -> AppResult<()> {
        self.repository.save_principal(principal).await
    }

    /// Registers or replaces a directory object; its parent must exist.
    pub async fn register_directory_object(&self, object: DirectoryObject) -> AppResult<()> {
        if let Some(parent_id) = object.parent_id.as_deref() {
            self.lookup_directory_object(parent_id).await?;
        }
        self.repository.save_directory_object(object).await
    }

    /// Registers or replaces an app scope.
    pub async fn register_app_scope(&self, app_scope: AppScope) -> AppResult<()> {
        self.repository.save_app_scope(app_scope).await
    }

    /// Adds a member to a group.
    pub async fn add_group_member(&self, group_id: &str, member_id: &str) -> AppResult<()> {
        let group = self.principal(group_id).await?;
        if group.kind != PrincipalKind::Group {
            return Err(AppError::Validation(format!(
                "principal '{group_id}' is not a group"
            )));
        }
        self.principal(member_id).await?;
        if group_id == member_id || self.group_ids_for(group_id).await?.contains(member_id) {
            return Err(AppError::CycleDetected(format!(
                "adding '{member_id}' to group '{group_id}' would nest the group in itself"
            )));
        }

        self.repository.add_group_member(group_id, member_id).await
    }

    /// Returns a principal.
    pub async fn principal(&self, principal_id: &str) -> AppResult<Principal> {
        self.repository
            .find_principal(principal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("principal '{principal_id}' does not exist")))
    }

    /// Returns a directory object.
    pub async fn lookup_directory_object(&self, object_id: &str) -> AppResult<DirectoryObject> {
        self.repository
            .find_directory_object(object_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("directory object '{object_id}' does not exist"))
            })
    }

    /// Returns an app scope.
    pub async fn app_scope(&self, app_scope_id: &str) -> AppResult<AppScope> {
        self.repository
            .find_app_scope(app_scope_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("app scope '{app_scope_id}' does not exist")))
    }

    /// Groups the principal belongs to, directly or through nested groups.
    pub async fn group_ids_for(&self, principal_id: &str) -> AppResult<BTreeSet<String>> {
        let mut groups = BTreeSet::new();
        let mut queue = VecDeque::from([principal_id.to_owned()]);

        while let Some(current) = queue.pop_front() {
            for group_id in self.repository.list_direct_group_ids(current.as_str()).await? {
                if groups.insert(group_id.clone()) {
                    queue.push_back(group_id);
                }
            }
        }

        Ok(groups)
    }

    /// The principal followed by every group it belongs to.
    pub async fn principal_and_group_ids(&self, principal_id: &str) -> AppResult<Vec<String>> {
        let mut ids = vec![principal_id.to_owned()];
        ids.extend(self.group_ids_for(principal_id).await?);
        Ok(ids)
    }

    /// Non-group principals reachable from a group through nested memberships.
    pub async fn expand_members(&self, group_id: &str) -> AppResult<BTreeSet<String>> {
        let mut members = BTreeSet::new();
        let mut visited = HashSet::from([group_id.to_owned()]);
        let mut queue = VecDeque::from([group_id.to_owned()]);

        while let Some(current) = queue.pop_front() {
            for member_id in self.repository.list_group_member_ids(current.as_str()).await? {
                let is_group = self
                    .repository
                    .find_principal(member_id.as_str())
                    .await?
                    .is_some_and(|member| member.kind == PrincipalKind::Group);
                if is_group {
                    if visited.insert(member_id.clone()) {
                        queue.push_back(member_id);
                    }
                } else {
                    members.insert(member_id);
                }
            }
        }

        Ok(members)
    }

    /// Verifies that the scope addresses an existing referent.
    pub async fn resolve_scope(&self, scope: &RoleScope) -> AppResult<()> {
        match scope {
            RoleScope::Directory(scope_id) => match directory_scope_object_id(scope_id)? {
                None => Ok(()),
                Some(object_id) => {
                    if self.repository.find_directory_object(object_id).await?.is_some()
                        || self.repository.find_principal(object_id).await?.is_some()
                    {
                        Ok(())
                    } else {
                        Err(AppError::NotFound(format!(
                            "directory scope '{scope_id}' does not exist"
                        )))
                    }
                }
            },
            RoleScope::App(app_scope_id) => self.app_scope(app_scope_id).await.map(|_| ()),
        }
    }

    /// Returns whether a holding at `holder` applies to `target`.
    ///
    /// The tenant root covers everything; a directory scope also covers every object
    /// below it in the directory tree; app scopes cover only themselves.
    pub async fn scope_covers(&self, holder: &RoleScope, target: &RoleScope) -> AppResult<bool> {
        if holder.is_root() || holder == target {
            return Ok(true);
        }

        let (RoleScope::Directory(holder_id), RoleScope::Directory(target_id)) = (holder, target)
        else {
            return Ok(false);
        };
        let (Some(holder_object), Some(target_object)) = (
            directory_scope_object_id(holder_id)?,
            directory_scope_object_id(target_id)?,
        ) else {
            return Ok(false);
        };
        if holder_object == target_object {
            return Ok(true);
        }

        let mut visited = HashSet::new();
        let mut current = self
            .repository
            .find_directory_object(target_object)
            .await?
            .and_then(|object| object.parent_id);
        while let Some(parent_id) = current {
            if parent_id == holder_object {
                return Ok(true);
            }
            if !visited.insert(parent_id.clone()) {
                break;
            }
            current = self
                .repository
                .find_directory_object(parent_id.as_str())
                .await?
                .and_then(|object| object.parent_id);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use warden_core::{AppError, AppResult};
    use warden_domain::{AppScope, DirectoryObject, Principal, PrincipalKind, RoleScope};

    use super::DirectoryService;
    use crate::role_management_ports::DirectoryRepository;

    #[derive(Default)]
    struct FakeDirectoryRepository {
        principals: Mutex<HashMap<String, Principal>>,
        objects: Mutex<HashMap<String, DirectoryObject>>,
        app_scopes: Mutex<HashMap<String, AppScope>>,
        memberships: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl DirectoryRepository for FakeDirectoryRepository {
        async fn save_principal(&self, principal: Principal) -> AppResult<()> {
            self.principals
                .lock()
                .await
                .insert(principal.id.clone(), principal);
            Ok(())
        }

        async fn find_principal(&self, principal_id: &str) -> AppResult<Option<Principal>> {
            Ok(self.principals.lock().await.get(principal_id).cloned())
        }

        async fn save_directory_object(&self, object: DirectoryObject) -> AppResult<()> {
            self.objects.lock().await.insert(object.id.clone(), object);
            Ok(())
        }

        async fn find_directory_object(
            &self,
            object_id: &str,
        ) -> AppResult<Option<DirectoryObject>> {
            Ok(self.objects.lock().await.get(object_id).cloned())
        }

        async fn save_app_scope(&self, app_scope: AppScope) -> AppResult<()> {
            self.app_scopes
                .lock()
                .await
                .insert(app_scope.id.clone(), app_scope);
            Ok(())
        }

        async fn find_app_scope(&self, app_scope_id: &str) -> AppResult<Option<AppScope>> {
            Ok(self.app_scopes.lock().await.get(app_scope_id).cloned())
        }

        async fn add_group_member(&self, group_id: &str, member_id: &str) -> AppResult<()> {
            let mut memberships = self.memberships.lock().await;
            let membership = (group_id.to_owned(), member_id.to_owned());
            if !memberships.contains(&membership) {
                memberships.push(membership);
            }
            Ok(())
        }

        async fn list_direct_group_ids(&self, member_id: &str) -> AppResult<Vec<String>> {
            Ok(self
                .memberships
                .lock()
                .await
                .iter()
                .filter(|(_, member)| member == member_id)
                .map(|(group, _)| group.clone())
                .collect())
        }

        async fn list_group_member_ids(&self, group_id: &str) -> AppResult<Vec<String>> {
            Ok(self
                .memberships
                .lock()
                .await
                .iter()
                .filter(|(group, _)| group == group_id)
                .map(|(_, member)| member.clone())
                .collect())
        }
    }

    fn principal(id: &str, kind: PrincipalKind) -> Principal {
        Principal::new(id, kind, id).unwrap_or_else(|error| panic!("invalid principal: {error}"))
    }

    fn object(id: &str, parent_id: Option<&str>) -> DirectoryObject {
        DirectoryObject {
            id: id.to_owned(),
            display_name: id.to_owned(),
            object_type: "administrativeUnit".to_owned(),
            parent_id: parent_id.map(str::to_owned),
        }
    }

    async fn service() -> DirectoryService {
        let service = DirectoryService::new(Arc::new(FakeDirectoryRepository::default()));
        for (id, kind) in [
            ("alice", PrincipalKind::User),
            ("bob", PrincipalKind::User),
            ("admins", PrincipalKind::Group),
            ("ops", PrincipalKind::Group),
        ] {
            let _ = service.register_principal(principal(id, kind)).await;
        }
        let _ = service.register_directory_object(object("emea", None)).await;
        let _ = service
            .register_directory_object(object("berlin", Some("emea")))
            .await;
        service
    }

    #[tokio::test]
    async fn groups_resolve_transitively() {
        let service = service().await;
        assert!(service.add_group_member("ops", "alice").await.is_ok());
        assert!(service.add_group_member("admins", "ops").await.is_ok());

        let groups = service.group_ids_for("alice").await.unwrap_or_default();
        let members = service.expand_members("admins").await.unwrap_or_default();

        assert_eq!(groups.into_iter().collect::<Vec<_>>(), vec!["admins", "ops"]);
        assert_eq!(members.into_iter().collect::<Vec<_>>(), vec!["alice"]);
    }

    #[tokio::test]
    async fn nesting_a_group_in_itself_is_rejected() {
        let service = service().await;
        assert!(service.add_group_member("admins", "ops").await.is_ok());

        let result = service.add_group_member("ops", "admins").await;

        assert!(matches!(result, Err(AppError::CycleDetected(_))));
        assert!(matches!(
            service.add_group_member("alice", "bob").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn scope_coverage_follows_the_directory_tree() {
        let service = service().await;
        let emea = RoleScope::Directory("/administrativeUnits/emea".to_owned());
        let berlin = RoleScope::Directory("/berlin".to_owned());
        let app = RoleScope::App("app-1".to_owned());

        assert_eq!(service.scope_covers(&RoleScope::root(), &app).await.ok(), Some(true));
        assert_eq!(service.scope_covers(&emea, &berlin).await.ok(), Some(true));
        assert_eq!(service.scope_covers(&berlin, &emea).await.ok(), Some(false));
        assert_eq!(service.scope_covers(&app, &RoleScope::root()).await.ok(), Some(false));
    }

    #[tokio::test]
    async fn resolving_unknown_scopes_fails() {
        let service = service().await;

        assert!(service.resolve_scope(&RoleScope::root()).await.is_ok());
        assert!(service
            .resolve_scope(&RoleScope::Directory("/alice".to_owned()))
            .await
            .is_ok());
        assert!(matches!(
            service
                .resolve_scope(&RoleScope::Directory("/missing".to_owned()))
                .await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            service.resolve_scope(&RoleScope::App("nope".to_owned())).await,
            Err(AppError::NotFound(_))
        ));
    }
}
