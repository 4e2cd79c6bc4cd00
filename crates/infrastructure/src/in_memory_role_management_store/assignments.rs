use async_trait::async_trait;
use warden_application::{AuditEvent, AuditRecord, AuditRepository, RoleAssignmentRepository};
use warden_core::{AppResult, RbacProvider};
use warden_domain::RoleAssignment;

use super::{InMemoryRoleManagementStore, ScheduleState, key, of_provider};

impl ScheduleState {
    /// Inserts the assignment unless its triple is already held; returns the stored row.
    pub(super) fn upsert_assignment(
        &mut self,
        provider: RbacProvider,
        assignment: RoleAssignment,
    ) -> RoleAssignment {
        let triple = assignment.triple();
        if let Some(existing) = of_provider(&self.assignments, provider, |stored| stored.0)
            .find(|existing| existing.triple() == triple)
        {
            return existing.clone();
        }

        self.assignments
            .insert(key(provider, assignment.id.as_str()), assignment.clone());
        assignment
    }
}

#[async_trait]
impl RoleAssignmentRepository for InMemoryRoleManagementStore {
    async fn insert_role_assignment(
        &self,
        provider: RbacProvider,
        assignment: RoleAssignment,
    ) -> AppResult<RoleAssignment> {
        Ok(self
            .state
            .write()
            .await
            .upsert_assignment(provider, assignment))
    }

    async fn find_role_assignment(
        &self,
        provider: RbacProvider,
        assignment_id: &str,
    ) -> AppResult<Option<RoleAssignment>> {
        Ok(self
            .state
            .read()
            .await
            .assignments
            .get(&key(provider, assignment_id))
            .cloned())
    }

    async fn list_role_assignments(
        &self,
        provider: RbacProvider,
    ) -> AppResult<Vec<RoleAssignment>> {
        let state = self.state.read().await;
        Ok(of_provider(&state.assignments, provider, |stored| stored.0)
            .cloned()
            .collect())
    }

    async fn list_role_assignments_for_principals(
        &self,
        provider: RbacProvider,
        principal_ids: &[String],
    ) -> AppResult<Vec<RoleAssignment>> {
        let state = self.state.read().await;
        Ok(of_provider(&state.assignments, provider, |stored| stored.0)
            .filter(|assignment| principal_ids.contains(&assignment.principal_id))
            .cloned()
            .collect())
    }

    async fn delete_role_assignment(
        &self,
        provider: RbacProvider,
        assignment_id: &str,
    ) -> AppResult<()> {
        self.state
            .write()
            .await
            .assignments
            .remove(&key(provider, assignment_id));
        Ok(())
    }
}

#[async_trait]
impl AuditRepository for InMemoryRoleManagementStore {
    async fn append_event(&self, event: AuditEvent) -> AppResult<u64> {
        let mut audit = self.audit.write().await;
        let sequence = audit.last().map_or(1, |record| record.sequence + 1);
        audit.push(AuditRecord { sequence, event });
        Ok(sequence)
    }

    async fn list_events(&self, provider: RbacProvider) -> AppResult<Vec<AuditRecord>> {
        Ok(self
            .audit
            .read()
            .await
            .iter()
            .filter(|record| record.event.provider == provider)
            .cloned()
            .collect())
    }
}
