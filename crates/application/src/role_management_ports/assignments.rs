use async_trait::async_trait;
use warden_core::{AppResult, RbacProvider};
use warden_domain::RoleAssignment;

/// Repository port for persistent role assignments.
#[async_trait]
pub trait RoleAssignmentRepository: Send + Sync {
    /// Inserts an assignment unless one exists for the same triple, and returns the stored row.
    async fn insert_role_assignment(
        &self,
        provider: RbacProvider,
        assignment: RoleAssignment,
    ) -> AppResult<RoleAssignment>;

    /// Finds one assignment.
    async fn find_role_assignment(
        &self,
        provider: RbacProvider,
        assignment_id: &str,
    ) -> AppResult<Option<RoleAssignment>>;

    /// Lists assignments.
    async fn list_role_assignments(&self, provider: RbacProvider)
    -> AppResult<Vec<RoleAssignment>>;

    /// Lists assignments held directly by any of the principals.
    async fn list_role_assignments_for_principals(
        &self,
        provider: RbacProvider,
        principal_ids: &[String],
    ) -> AppResult<Vec<RoleAssignment>>;

    /// Deletes one assignment.
    async fn delete_role_assignment(
        &self,
        provider: RbacProvider,
        assignment_id: &str,
    ) -> AppResult<()>;
}
