use warden_core::{AppError, AppResult, RbacProvider};
use warden_domain::RoleDefinition;

use super::RoleDefinitionService;

impl RoleDefinitionService {
    /// First-level parents of a built-in role definition.
    ///
    /// Custom roles cannot inherit, so the navigation is not supported for them.
    pub async fn list_inherits_permissions_from(
        &self,
        provider: RbacProvider,
        id: &str,
    ) -> AppResult<Vec<RoleDefinition>> {
        let definitions = self.registry.definitions(provider).await?;
        let definition = definitions
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("role definition '{id}' does not exist")))?;
        if !definition.is_built_in {
            return Err(AppError::NotSupported(format!(
                "custom role definition '{id}' does not inherit permissions"
            )));
        }

        Ok(definition
            .inherits_permissions_from
            .iter()
            .filter_map(|parent_id| definitions.get(parent_id).cloned())
            .collect())
    }

    /// Number of first-level parents.
    pub async fn count_inherits_permissions_from(
        &self,
        provider: RbacProvider,
        id: &str,
    ) -> AppResult<usize> {
        Ok(self.list_inherits_permissions_from(provider, id).await?.len())
    }

    /// One first-level parent; `NotFound` when the edge does not exist.
    pub async fn get_inherits_permissions_from(
        &self,
        provider: RbacProvider,
        id: &str,
        parent_id: &str,
    ) -> AppResult<RoleDefinition> {
        self.list_inherits_permissions_from(provider, id)
            .await?
            .into_iter()
            .find(|parent| parent.id == parent_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "role definition '{id}' does not inherit from '{parent_id}'"
                ))
            })
    }
}
