use async_trait::async_trait;
use chrono::{DateTime, Utc};
use warden_application::{AssignmentWrite, ScheduleCommit, ScheduleRepository};
use warden_core::{AppError, AppResult, RbacProvider};
use warden_domain::{
    Approval, AssignmentTriple, RequestStatus, RoleSchedule, ScheduleInstance, ScheduleKind,
    ScheduleRequest,
};

use super::{InMemoryRoleManagementStore, ScheduleState, key, kind_key, of_provider};

impl ScheduleState {
    fn ensure_client_ids_free(&self, provider: RbacProvider, commit: &ScheduleCommit) -> AppResult<()> {
        for request in &commit.requests {
            let Some(client_id) = request.client_request_id.as_deref() else {
                continue;
            };
            if let Some((_, owner)) = self.client_request_ids.get(&key(provider, client_id))
                && *owner != request.id
            {
                return Err(AppError::Conflict(format!(
                    "client request id '{client_id}' is already used by request '{owner}'"
                )));
            }
        }

        Ok(())
    }

    fn apply(&mut self, provider: RbacProvider, commit: ScheduleCommit) {
        for request in commit.requests {
            let request_key = kind_key(provider, request.kind, request.id.as_str());
            if let Some(previous) = self.requests.get(&request_key)
                && let Some(previous_client_id) = previous.client_request_id.as_deref()
                && request.client_request_id.as_deref() != Some(previous_client_id)
            {
                self.client_request_ids
                    .remove(&key(provider, previous_client_id));
            }
            if let Some(client_id) = request.client_request_id.as_deref() {
                self.client_request_ids.insert(
                    key(provider, client_id),
                    (request.kind, request.id.clone()),
                );
            }
            self.requests.insert(request_key, request);
        }

        for approval in commit.approvals {
            self.approvals
                .insert(key(provider, approval.id.as_str()), approval);
        }

        for write in commit.schedules {
            let schedule = write.schedule;
            if let Some(instances) = write.instances {
                self.instances.retain(|(stored, kind, _), instance| {
                    !(*stored == provider
                        && *kind == schedule.kind
                        && instance.role_assignment_origin_id == schedule.id)
                });
                for instance in instances {
                    self.instances.insert(
                        kind_key(provider, instance.kind, instance.id.as_str()),
                        instance,
                    );
                }
            }
            self.schedules.insert(
                kind_key(provider, schedule.kind, schedule.id.as_str()),
                schedule,
            );
        }

        for write in commit.assignments {
            match write {
                AssignmentWrite::Upsert(assignment) => {
                    self.upsert_assignment(provider, assignment);
                }
                AssignmentWrite::DeleteForSchedule(schedule_id) => {
                    self.assignments.retain(|(stored, _), assignment| {
                        !(*stored == provider
                            && assignment.schedule_id.as_deref() == Some(schedule_id.as_str()))
                    });
                }
            }
        }
    }
}

impl InMemoryRoleManagementStore {
    async fn schedules_where(
        &self,
        provider: RbacProvider,
        predicate: impl Fn(&RoleSchedule) -> bool,
    ) -> Vec<RoleSchedule> {
        let state = self.state.read().await;
        of_provider(&state.schedules, provider, |stored| stored.0)
            .filter(|schedule| predicate(schedule))
            .cloned()
            .collect()
    }

    async fn instances_where(
        &self,
        provider: RbacProvider,
        predicate: impl Fn(&ScheduleInstance) -> bool,
    ) -> Vec<ScheduleInstance> {
        let state = self.state.read().await;
        of_provider(&state.instances, provider, |stored| stored.0)
            .filter(|instance| predicate(instance))
            .cloned()
            .collect()
    }

    async fn requests_where(
        &self,
        provider: RbacProvider,
        predicate: impl Fn(&ScheduleRequest) -> bool,
    ) -> Vec<ScheduleRequest> {
        let state = self.state.read().await;
        of_provider(&state.requests, provider, |stored| stored.0)
            .filter(|request| predicate(request))
            .cloned()
            .collect()
    }

    async fn approvals_where(
        &self,
        provider: RbacProvider,
        predicate: impl Fn(&Approval) -> bool,
    ) -> Vec<Approval> {
        let state = self.state.read().await;
        of_provider(&state.approvals, provider, |stored| stored.0)
            .filter(|approval| predicate(approval))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryRoleManagementStore {
    async fn commit(&self, provider: RbacProvider, commit: ScheduleCommit) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.ensure_client_ids_free(provider, &commit)?;
        state.apply(provider, commit);
        Ok(())
    }

    async fn find_schedule(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        schedule_id: &str,
    ) -> AppResult<Option<RoleSchedule>> {
        Ok(self
            .state
            .read()
            .await
            .schedules
            .get(&kind_key(provider, kind, schedule_id))
            .cloned())
    }

    async fn list_schedules(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
    ) -> AppResult<Vec<RoleSchedule>> {
        Ok(self
            .schedules_where(provider, |schedule| schedule.kind == kind)
            .await)
    }

    async fn list_schedules_for_triple(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        triple: &AssignmentTriple,
    ) -> AppResult<Vec<RoleSchedule>> {
        Ok(self
            .schedules_where(provider, |schedule| {
                schedule.kind == kind && schedule.triple() == *triple
            })
            .await)
    }

    async fn list_live_schedules(&self, provider: RbacProvider) -> AppResult<Vec<RoleSchedule>> {
        Ok(self
            .schedules_where(provider, |schedule| schedule.status.is_live())
            .await)
    }

    async fn list_schedules_activated_using(
        &self,
        provider: RbacProvider,
        eligibility_schedule_id: &str,
    ) -> AppResult<Vec<RoleSchedule>> {
        Ok(self
            .schedules_where(provider, |schedule| {
                schedule.kind == ScheduleKind::Assignment
                    && schedule.activated_using_id.as_deref() == Some(eligibility_schedule_id)
            })
            .await)
    }

    async fn find_instance(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        instance_id: &str,
    ) -> AppResult<Option<ScheduleInstance>> {
        Ok(self
            .state
            .read()
            .await
            .instances
            .get(&kind_key(provider, kind, instance_id))
            .cloned())
    }

    async fn list_instances(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
    ) -> AppResult<Vec<ScheduleInstance>> {
        Ok(self
            .instances_where(provider, |instance| instance.kind == kind)
            .await)
    }

    async fn list_instances_for_schedule(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        schedule_id: &str,
    ) -> AppResult<Vec<ScheduleInstance>> {
        let mut instances = self
            .instances_where(provider, |instance| {
                instance.kind == kind && instance.role_assignment_origin_id == schedule_id
            })
            .await;
        instances.sort_by_key(|instance| instance.start_date_time);
        Ok(instances)
    }

    async fn list_active_assignment_instances(
        &self,
        provider: RbacProvider,
        principal_ids: &[String],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<ScheduleInstance>> {
        Ok(self
            .instances_where(provider, |instance| {
                instance.kind == ScheduleKind::Assignment
                    && principal_ids.contains(&instance.principal_id)
                    && instance.is_active_at(now)
            })
            .await)
    }

    async fn delete_instances_ended_by(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        schedule_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let before = state.instances.len();
        state.instances.retain(|(stored, _, _), instance| {
            !(*stored == provider
                && instance.kind == kind
                && instance.role_assignment_origin_id == schedule_id
                && instance.end_date_time.is_some_and(|end| end <= now))
        });
        Ok(u64::try_from(before - state.instances.len()).unwrap_or(u64::MAX))
    }

    async fn find_request(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        request_id: &str,
    ) -> AppResult<Option<ScheduleRequest>> {
        Ok(self
            .state
            .read()
            .await
            .requests
            .get(&kind_key(provider, kind, request_id))
            .cloned())
    }

    async fn find_request_by_client_id(
        &self,
        provider: RbacProvider,
        client_request_id: &str,
    ) -> AppResult<Option<ScheduleRequest>> {
        let state = self.state.read().await;
        Ok(state
            .client_request_ids
            .get(&key(provider, client_request_id))
            .and_then(|(kind, request_id)| {
                state
                    .requests
                    .get(&kind_key(provider, *kind, request_id.as_str()))
            })
            .cloned())
    }

    async fn list_requests(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
    ) -> AppResult<Vec<ScheduleRequest>> {
        Ok(self
            .requests_where(provider, |request| request.kind == kind)
            .await)
    }

    async fn list_requests_for_triple(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        triple: &AssignmentTriple,
    ) -> AppResult<Vec<ScheduleRequest>> {
        Ok(self
            .requests_where(provider, |request| {
                request.kind == kind && request.triple() == *triple
            })
            .await)
    }

    async fn count_role_definition_references(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
    ) -> AppResult<u64> {
        let state = self.state.read().await;
        let schedules = of_provider(&state.schedules, provider, |stored| stored.0)
            .filter(|schedule| {
                schedule.role_definition_id == role_definition_id && schedule.status.is_live()
            })
            .count();
        let requests = of_provider(&state.requests, provider, |stored| stored.0)
            .filter(|request| {
                request.role_definition_id == role_definition_id
                    && (request.status.is_open() || request.status == RequestStatus::Provisioned)
            })
            .count();

        Ok(u64::try_from(schedules + requests).unwrap_or(u64::MAX))
    }

    async fn find_approval(
        &self,
        provider: RbacProvider,
        approval_id: &str,
    ) -> AppResult<Option<Approval>> {
        Ok(self
            .state
            .read()
            .await
            .approvals
            .get(&key(provider, approval_id))
            .cloned())
    }

    async fn list_approvals(&self, provider: RbacProvider) -> AppResult<Vec<Approval>> {
        Ok(self.approvals_where(provider, |_| true).await)
    }

    async fn list_approvals_for_approver(
        &self,
        provider: RbacProvider,
        approver_id: &str,
    ) -> AppResult<Vec<Approval>> {
        Ok(self
            .approvals_where(provider, |approval| approval.is_approver(approver_id))
            .await)
    }

    async fn list_expired_pending_approvals(
        &self,
        provider: RbacProvider,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Approval>> {
        Ok(self
            .approvals_where(provider, |approval| approval.is_expired_at(now))
            .await)
    }
}
