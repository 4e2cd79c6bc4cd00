//! In-memory fakes and a wired engine shared by the service tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tokio::sync::Mutex;
use warden_core::{AppError, AppResult, CallerIdentity, RbacProvider};
use warden_domain::{
    AppScope, Approval, AssignmentTriple, DirectoryObject, Principal, PrincipalKind,
    Expiration, IsoDuration, RequestAction, RequestStatus, ResourceAction, ResourceNamespace,
    RoleAssignment, RoleDefinition, RoleDefinitionInput, RoleManagementPolicy, RolePermission,
    RoleSchedule, RoleScope, ScheduleInfo, ScheduleInstance, ScheduleKind, ScheduleRequest,
    role_management_action, role_management_read_action,
};

use crate::approval_service::ApprovalService;
use crate::audit_trail::AuditTrail;
use crate::authorization_service::AuthorizationService;
use crate::directory_service::DirectoryService;
use crate::query_service::QueryService;
use crate::role_assignment_service::RoleAssignmentService;
use crate::role_definition_registry::RoleDefinitionRegistry;
use crate::role_definition_service::RoleDefinitionService;
use crate::role_management_ports::{
    ApprovalNotification, ApprovalNotifier, AssignmentWrite, AuditEvent, AuditRecord,
    AuditRepository, DirectoryRepository, EngineSettings, PolicyRepository,
    RoleAssignmentRepository, RoleDefinitionRepository, ScheduleCommit, ScheduleRepository,
    TimeSource,
};
use crate::schedule_controller::ScheduleController;
use crate::schedule_request_service::{ScheduleRequestService, SubmitScheduleRequestInput};
use crate::schedule_ticker::ScheduleTicker;

pub(crate) const PROVIDER: RbacProvider = RbacProvider::Directory;
pub(crate) const GLOBAL_ADMIN: &str = "global-admin";
pub(crate) const ROLE_READER: &str = "role-reader";
pub(crate) const USER_READER: &str = "user-reader";
pub(crate) const ADMIN: &str = "admin";
pub(crate) const ALICE: &str = "alice";
pub(crate) const BOB: &str = "bob";
pub(crate) const CAROL: &str = "carol";
pub(crate) const OPS_GROUP: &str = "ops";
pub(crate) const SALES_UNIT: &str = "sales";
pub(crate) const USERS_READ: &str = "microsoft.directory/users/read";

/// Clock advanced explicitly by tests.
pub(crate) struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub(crate) fn at(now: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub(crate) fn advance(&self, delta: TimeDelta) {
        self.millis
            .fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

pub(crate) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .unwrap_or_default()
}

#[derive(Default)]
struct FakeState {
    principals: Vec<Principal>,
    objects: Vec<DirectoryObject>,
    app_scopes: Vec<AppScope>,
    memberships: BTreeSet<(String, String)>,
    definitions: Vec<(RbacProvider, RoleDefinition)>,
    definition_revisions: HashMap<RbacProvider, u64>,
    namespaces: Vec<(RbacProvider, ResourceNamespace)>,
    actions: Vec<(RbacProvider, ResourceAction)>,
    policies: Vec<(RbacProvider, RoleManagementPolicy)>,
    assignments: Vec<(RbacProvider, RoleAssignment)>,
    schedules: Vec<(RbacProvider, RoleSchedule)>,
    instances: Vec<(RbacProvider, ScheduleInstance)>,
    requests: Vec<(RbacProvider, ScheduleRequest)>,
    approvals: Vec<(RbacProvider, Approval)>,
}

impl FakeState {
    fn bump_revision(&mut self, provider: RbacProvider, expected_revision: u64) -> AppResult<u64> {
        let revision = self.definition_revisions.entry(provider).or_default();
        if *revision != expected_revision {
            return Err(AppError::Conflict(format!(
                "role definitions of '{provider}' moved past revision {expected_revision}"
            )));
        }
        *revision += 1;
        Ok(*revision)
    }
}

/// Single fake backing every port.
#[derive(Default)]
pub(crate) struct FakeStore {
    state: Mutex<FakeState>,
    events: Mutex<Vec<AuditRecord>>,
    notifications: Mutex<Vec<ApprovalNotification>>,
    failing_commits: AtomicU32,
    failing_notifications: AtomicBool,
}

impl FakeStore {
    /// Makes the next `count` commits fail with a transient error.
    pub(crate) fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_notifications(&self, failing: bool) {
        self.failing_notifications.store(failing, Ordering::SeqCst);
    }

    pub(crate) async fn notifications(&self) -> Vec<ApprovalNotification> {
        self.notifications.lock().await.clone()
    }

    pub(crate) async fn events(&self) -> Vec<AuditRecord> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl DirectoryRepository for FakeStore {
    async fn save_principal(&self, principal: Principal) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.principals.retain(|stored| stored.id != principal.id);
        state.principals.push(principal);
        Ok(())
    }

    async fn find_principal(&self, principal_id: &str) -> AppResult<Option<Principal>> {
        let state = self.state.lock().await;
        Ok(state
            .principals
            .iter()
            .find(|principal| principal.id == principal_id)
            .cloned())
    }

    async fn save_directory_object(&self, object: DirectoryObject) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.objects.retain(|stored| stored.id != object.id);
        state.objects.push(object);
        Ok(())
    }

    async fn find_directory_object(&self, object_id: &str) -> AppResult<Option<DirectoryObject>> {
        let state = self.state.lock().await;
        Ok(state
            .objects
            .iter()
            .find(|object| object.id == object_id)
            .cloned())
    }

    async fn save_app_scope(&self, app_scope: AppScope) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.app_scopes.retain(|stored| stored.id != app_scope.id);
        state.app_scopes.push(app_scope);
        Ok(())
    }

    async fn find_app_scope(&self, app_scope_id: &str) -> AppResult<Option<AppScope>> {
        let state = self.state.lock().await;
        Ok(state
            .app_scopes
            .iter()
            .find(|app_scope| app_scope.id == app_scope_id)
            .cloned())
    }

    async fn add_group_member(&self, group_id: &str, member_id: &str) -> AppResult<()> {
        self.state
            .lock()
            .await
            .memberships
            .insert((group_id.to_owned(), member_id.to_owned()));
        Ok(())
    }

    async fn list_direct_group_ids(&self, member_id: &str) -> AppResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .memberships
            .iter()
            .filter(|(_, member)| member == member_id)
            .map(|(group, _)| group.clone())
            .collect())
    }

    async fn list_group_member_ids(&self, group_id: &str) -> AppResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .memberships
            .iter()
            .filter(|(group, _)| group == group_id)
            .map(|(_, member)| member.clone())
            .collect())
    }
}

#[async_trait]
impl RoleDefinitionRepository for FakeStore {
    async fn list_role_definitions(
        &self,
        provider: RbacProvider,
    ) -> AppResult<Vec<RoleDefinition>> {
        let state = self.state.lock().await;
        Ok(state
            .definitions
            .iter()
            .filter(|(stored, _)| *stored == provider)
            .map(|(_, definition)| definition.clone())
            .collect())
    }

    async fn find_role_definition(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
    ) -> AppResult<Option<RoleDefinition>> {
        let state = self.state.lock().await;
        Ok(state
            .definitions
            .iter()
            .find(|(stored, definition)| *stored == provider && definition.id == role_definition_id)
            .map(|(_, definition)| definition.clone()))
    }

    async fn role_definitions_revision(&self, provider: RbacProvider) -> AppResult<u64> {
        let state = self.state.lock().await;
        Ok(state
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
        let mut state = self.state.lock().await;
        let revision = state.bump_revision(provider, expected_revision)?;
        state
            .definitions
            .retain(|(stored, existing)| !(*stored == provider && existing.id == definition.id));
        state.definitions.push((provider, definition));
        Ok(revision)
    }

    async fn delete_role_definition(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
        expected_revision: u64,
    ) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        let revision = state.bump_revision(provider, expected_revision)?;
        state
            .definitions
            .retain(|(stored, existing)| !(*stored == provider && existing.id == role_definition_id));
        Ok(revision)
    }

    async fn create_resource_namespace(
        &self,
        provider: RbacProvider,
        namespace: ResourceNamespace,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state
            .namespaces
            .iter()
            .any(|(stored, existing)| *stored == provider && existing.id == namespace.id)
        {
            return Err(AppError::Conflict(format!(
                "resource namespace '{}' already exists",
                namespace.id
            )));
        }
        state.namespaces.push((provider, namespace));
        Ok(())
    }

    async fn list_resource_namespaces(
        &self,
        provider: RbacProvider,
    ) -> AppResult<Vec<ResourceNamespace>> {
        let state = self.state.lock().await;
        Ok(state
            .namespaces
            .iter()
            .filter(|(stored, _)| *stored == provider)
            .map(|(_, namespace)| namespace.clone())
            .collect())
    }

    async fn find_resource_namespace(
        &self,
        provider: RbacProvider,
        namespace_id: &str,
    ) -> AppResult<Option<ResourceNamespace>> {
        let state = self.state.lock().await;
        Ok(state
            .namespaces
            .iter()
            .find(|(stored, namespace)| *stored == provider && namespace.id == namespace_id)
            .map(|(_, namespace)| namespace.clone()))
    }

    async fn create_resource_action(
        &self,
        provider: RbacProvider,
        action: ResourceAction,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.actions.iter().any(|(stored, existing)| {
            *stored == provider && (existing.id == action.id || existing.name == action.name)
        }) {
            return Err(AppError::Conflict(format!(
                "resource action '{}' already exists",
                action.name
            )));
        }
        state.actions.push((provider, action));
        Ok(())
    }

    async fn list_resource_actions(
        &self,
        provider: RbacProvider,
        namespace_id: Option<&str>,
    ) -> AppResult<Vec<ResourceAction>> {
        let state = self.state.lock().await;
        Ok(state
            .actions
            .iter()
            .filter(|(stored, action)| {
                *stored == provider
                    && namespace_id.is_none_or(|namespace_id| {
                        action.resource_namespace_id == namespace_id
                    })
            })
            .map(|(_, action)| action.clone())
            .collect())
    }
}

#[async_trait]
impl PolicyRepository for FakeStore {
    async fn find_policy(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
    ) -> AppResult<Option<RoleManagementPolicy>> {
        let state = self.state.lock().await;
        Ok(state
            .policies
            .iter()
            .find(|(stored, policy)| *stored == provider && policy.role_definition_id == role_definition_id)
            .map(|(_, policy)| policy.clone()))
    }

    async fn save_policy(
        &self,
        provider: RbacProvider,
        policy: RoleManagementPolicy,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.policies.retain(|(stored, existing)| {
            !(*stored == provider && existing.role_definition_id == policy.role_definition_id)
        });
        state.policies.push((provider, policy));
        Ok(())
    }
}

#[async_trait]
impl ApprovalNotifier for FakeStore {
    async fn notify_approvers(&self, notification: &ApprovalNotification) -> AppResult<()> {
        if self.failing_notifications.load(Ordering::SeqCst) {
            return Err(AppError::Transient("notification channel is down".to_owned()));
        }
        self.notifications.lock().await.push(notification.clone());
        Ok(())
    }
}

#[async_trait]
impl AuditRepository for FakeStore {
    async fn append_event(&self, event: AuditEvent) -> AppResult<u64> {
        let mut events = self.events.lock().await;
        let sequence = events.last().map_or(1, |record| record.sequence + 1);
        events.push(AuditRecord { sequence, event });
        Ok(sequence)
    }

    async fn list_events(&self, provider: RbacProvider) -> AppResult<Vec<AuditRecord>> {
        Ok(self
            .events
            .lock()
            .await
            .iter()
            .filter(|record| record.event.provider == provider)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RoleAssignmentRepository for FakeStore {
    async fn insert_role_assignment(
        &self,
        provider: RbacProvider,
        assignment: RoleAssignment,
    ) -> AppResult<RoleAssignment> {
        let mut state = self.state.lock().await;
        Ok(upsert_assignment(&mut state, provider, assignment))
    }

    async fn find_role_assignment(
        &self,
        provider: RbacProvider,
        assignment_id: &str,
    ) -> AppResult<Option<RoleAssignment>> {
        let state = self.state.lock().await;
        Ok(state
            .assignments
            .iter()
            .find(|(stored, assignment)| *stored == provider && assignment.id == assignment_id)
            .map(|(_, assignment)| assignment.clone()))
    }

    async fn list_role_assignments(
        &self,
        provider: RbacProvider,
    ) -> AppResult<Vec<RoleAssignment>> {
        let state = self.state.lock().await;
        Ok(state
            .assignments
            .iter()
            .filter(|(stored, _)| *stored == provider)
            .map(|(_, assignment)| assignment.clone())
            .collect())
    }

    async fn list_role_assignments_for_principals(
        &self,
        provider: RbacProvider,
        principal_ids: &[String],
    ) -> AppResult<Vec<RoleAssignment>> {
        let state = self.state.lock().await;
        Ok(state
            .assignments
            .iter()
            .filter(|(stored, assignment)| {
                *stored == provider && principal_ids.contains(&assignment.principal_id)
            })
            .map(|(_, assignment)| assignment.clone())
            .collect())
    }

    async fn delete_role_assignment(
        &self,
        provider: RbacProvider,
        assignment_id: &str,
    ) -> AppResult<()> {
        self.state
            .lock()
            .await
            .assignments
            .retain(|(stored, assignment)| !(*stored == provider && assignment.id == assignment_id));
        Ok(())
    }
}

fn upsert_assignment(
    state: &mut FakeState,
    provider: RbacProvider,
    assignment: RoleAssignment,
) -> RoleAssignment {
    if let Some((_, existing)) = state
        .assignments
        .iter()
        .find(|(stored, existing)| *stored == provider && existing.triple() == assignment.triple())
    {
        return existing.clone();
    }
    state.assignments.push((provider, assignment.clone()));
    assignment
}

#[async_trait]
impl ScheduleRepository for FakeStore {
    async fn commit(&self, provider: RbacProvider, commit: ScheduleCommit) -> AppResult<()> {
        if self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::Transient("store is unavailable".to_owned()));
        }

        let mut state = self.state.lock().await;
        for request in &commit.requests {
            if let Some(client_id) = request.client_request_id.as_deref()
                && state.requests.iter().any(|(stored, existing)| {
                    *stored == provider
                        && existing.id != request.id
                        && existing.client_request_id.as_deref() == Some(client_id)
                })
            {
                return Err(AppError::Conflict(format!(
                    "client request id '{client_id}' is already used"
                )));
            }
        }

        for request in commit.requests {
            state.requests.retain(|(stored, existing)| {
                !(*stored == provider && existing.kind == request.kind && existing.id == request.id)
            });
            state.requests.push((provider, request));
        }
        for approval in commit.approvals {
            state
                .approvals
                .retain(|(stored, existing)| !(*stored == provider && existing.id == approval.id));
            state.approvals.push((provider, approval));
        }
        for write in commit.schedules {
            let schedule = write.schedule;
            if let Some(instances) = write.instances {
                state.instances.retain(|(stored, existing)| {
                    !(*stored == provider
                        && existing.kind == schedule.kind
                        && existing.role_assignment_origin_id == schedule.id)
                });
                state
                    .instances
                    .extend(instances.into_iter().map(|instance| (provider, instance)));
            }
            state.schedules.retain(|(stored, existing)| {
                !(*stored == provider && existing.kind == schedule.kind && existing.id == schedule.id)
            });
            state.schedules.push((provider, schedule));
        }
        for write in commit.assignments {
            match write {
                AssignmentWrite::Upsert(assignment) => {
                    upsert_assignment(&mut state, provider, assignment);
                }
                AssignmentWrite::DeleteForSchedule(schedule_id) => {
                    state.assignments.retain(|(stored, assignment)| {
                        !(*stored == provider
                            && assignment.schedule_id.as_deref() == Some(schedule_id.as_str()))
                    });
                }
            }
        }

        Ok(())
    }

    async fn find_schedule(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        schedule_id: &str,
    ) -> AppResult<Option<RoleSchedule>> {
        Ok(self
            .schedules_where(provider, |schedule| {
                schedule.kind == kind && schedule.id == schedule_id
            })
            .await
            .pop())
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
            .instances_where(provider, |instance| {
                instance.kind == kind && instance.id == instance_id
            })
            .await
            .pop())
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
        let mut state = self.state.lock().await;
        let before = state.instances.len();
        state.instances.retain(|(stored, instance)| {
            !(*stored == provider
                && instance.kind == kind
                && instance.role_assignment_origin_id == schedule_id
                && instance.end_date_time.is_some_and(|end| end <= now))
        });
        Ok(u64::try_from(before - state.instances.len()).unwrap_or_default())
    }

    async fn find_request(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        request_id: &str,
    ) -> AppResult<Option<ScheduleRequest>> {
        Ok(self
            .requests_where(provider, |request| request.kind == kind && request.id == request_id)
            .await
            .pop())
    }

    async fn find_request_by_client_id(
        &self,
        provider: RbacProvider,
        client_request_id: &str,
    ) -> AppResult<Option<ScheduleRequest>> {
        Ok(self
            .requests_where(provider, |request| {
                request.client_request_id.as_deref() == Some(client_request_id)
            })
            .await
            .pop())
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
        let schedules = self
            .schedules_where(provider, |schedule| {
                schedule.role_definition_id == role_definition_id && schedule.status.is_live()
            })
            .await
            .len();
        let requests = self
            .requests_where(provider, |request| {
                request.role_definition_id == role_definition_id
                    && (request.status.is_open() || request.status == RequestStatus::Provisioned)
            })
            .await
            .len();
        Ok(u64::try_from(schedules + requests).unwrap_or_default())
    }

    async fn find_approval(
        &self,
        provider: RbacProvider,
        approval_id: &str,
    ) -> AppResult<Option<Approval>> {
        Ok(self
            .approvals_where(provider, |approval| approval.id == approval_id)
            .await
            .pop())
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

impl FakeStore {
    async fn schedules_where(
        &self,
        provider: RbacProvider,
        predicate: impl Fn(&RoleSchedule) -> bool,
    ) -> Vec<RoleSchedule> {
        let state = self.state.lock().await;
        state
            .schedules
            .iter()
            .filter(|(stored, schedule)| *stored == provider && predicate(schedule))
            .map(|(_, schedule)| schedule.clone())
            .collect()
    }

    async fn instances_where(
        &self,
        provider: RbacProvider,
        predicate: impl Fn(&ScheduleInstance) -> bool,
    ) -> Vec<ScheduleInstance> {
        let state = self.state.lock().await;
        state
            .instances
            .iter()
            .filter(|(stored, instance)| *stored == provider && predicate(instance))
            .map(|(_, instance)| instance.clone())
            .collect()
    }

    async fn requests_where(
        &self,
        provider: RbacProvider,
        predicate: impl Fn(&ScheduleRequest) -> bool,
    ) -> Vec<ScheduleRequest> {
        let state = self.state.lock().await;
        state
            .requests
            .iter()
            .filter(|(stored, request)| *stored == provider && predicate(request))
            .map(|(_, request)| request.clone())
            .collect()
    }

    async fn approvals_where(
        &self,
        provider: RbacProvider,
        predicate: impl Fn(&Approval) -> bool,
    ) -> Vec<Approval> {
        let state = self.state.lock().await;
        state
            .approvals
            .iter()
            .filter(|(stored, approval)| *stored == provider && predicate(approval))
            .map(|(_, approval)| approval.clone())
            .collect()
    }
}

/// Services wired over one [`FakeStore`] and seeded with a small tenant.
pub(crate) struct Engine {
    pub(crate) store: Arc<FakeStore>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) directory: DirectoryService,
    pub(crate) registry: RoleDefinitionRegistry,
    pub(crate) authorization: AuthorizationService,
    pub(crate) definitions: RoleDefinitionService,
    pub(crate) assignments: RoleAssignmentService,
    pub(crate) approvals: ApprovalService,
    pub(crate) controller: ScheduleController,
    pub(crate) requests: ScheduleRequestService,
    pub(crate) ticker: ScheduleTicker,
    pub(crate) queries: QueryService,
}

impl Engine {
    pub(crate) async fn seeded() -> Self {
        Self::seeded_with(EngineSettings::default()).await
    }

    pub(crate) async fn seeded_with(settings: EngineSettings) -> Self {
        let store = Arc::new(FakeStore::default());
        let clock = Arc::new(ManualClock::at(epoch()));
        let time: Arc<dyn TimeSource> = clock.clone();

        let directory = DirectoryService::new(store.clone());
        let registry = RoleDefinitionRegistry::new(store.clone());
        let audit = AuditTrail::new(store.clone());
        let authorization = AuthorizationService::new(
            registry.clone(),
            directory.clone(),
            store.clone(),
            store.clone(),
            time.clone(),
        );
        let definitions = RoleDefinitionService::new(
            registry.clone(),
            authorization.clone(),
            store.clone(),
            store.clone(),
            audit.clone(),
            time.clone(),
        );
        let assignments = RoleAssignmentService::new(
            store.clone(),
            store.clone(),
            registry.clone(),
            directory.clone(),
            authorization.clone(),
            audit.clone(),
            time.clone(),
        );
        let approvals = ApprovalService::new(
            store.clone(),
            store.clone(),
            registry.clone(),
            directory.clone(),
            authorization.clone(),
            settings.clone(),
        );
        let controller =
            ScheduleController::new(store.clone(), audit, time.clone(), settings.clone());
        let requests = ScheduleRequestService::new(
            store.clone(),
            registry.clone(),
            directory.clone(),
            authorization.clone(),
            approvals.clone(),
            controller.clone(),
            time,
        );
        let ticker = ScheduleTicker::new(controller.clone(), requests.clone());
        let queries = QueryService::new(
            registry.clone(),
            directory.clone(),
            authorization.clone(),
            store.clone(),
            store.clone(),
            settings,
        );

        let engine = Self {
            store,
            clock,
            directory,
            registry,
            authorization,
            definitions,
            assignments,
            approvals,
            controller,
            requests,
            ticker,
            queries,
        };
        engine.seed().await;
        engine
    }

    async fn seed(&self) {
        for (id, kind) in [
            (ADMIN, PrincipalKind::User),
            (ALICE, PrincipalKind::User),
            (BOB, PrincipalKind::User),
            (CAROL, PrincipalKind::User),
            (OPS_GROUP, PrincipalKind::Group),
        ] {
            let principal = Principal::new(id, kind, id).unwrap_or_else(|error| panic!("{error}"));
            ok(self.directory.register_principal(principal).await);
        }
        ok(self.directory.add_group_member(OPS_GROUP, ALICE).await);
        ok(self
            .directory
            .register_directory_object(DirectoryObject {
                id: SALES_UNIT.to_owned(),
                display_name: "Sales".to_owned(),
                object_type: "administrativeUnit".to_owned(),
                parent_id: None,
            })
            .await);

        let namespace =
            ResourceNamespace::new("microsoft.directory").unwrap_or_else(|error| panic!("{error}"));
        ok(self
            .store
            .create_resource_namespace(PROVIDER, namespace.clone())
            .await);
        for (id, name) in [
            ("manage", role_management_action(PROVIDER)),
            ("read", role_management_read_action(PROVIDER)),
            ("users-read", USERS_READ),
        ] {
            let action = ResourceAction::new(id, &namespace, name, name, true)
                .unwrap_or_else(|error| panic!("{error}"));
            ok(self.store.create_resource_action(PROVIDER, action).await);
        }

        for (id, action) in [
            (GLOBAL_ADMIN, role_management_action(PROVIDER)),
            (ROLE_READER, role_management_read_action(PROVIDER)),
            (USER_READER, USERS_READ),
        ] {
            ok(self
                .definitions
                .register_built_in(PROVIDER, id, built_in_input(id, action))
                .await
                .map(|_| ()));
        }

        ok(self
            .store
            .insert_role_assignment(
                PROVIDER,
                RoleAssignment {
                    id: "bootstrap".to_owned(),
                    principal_id: ADMIN.to_owned(),
                    role_definition_id: GLOBAL_ADMIN.to_owned(),
                    scope: RoleScope::root(),
                    condition: None,
                    created_date_time: epoch(),
                    schedule_id: None,
                },
            )
            .await
            .map(|_| ()));
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn advance(&self, delta: TimeDelta) {
        self.clock.advance(delta);
    }

    pub(crate) async fn submit(
        &self,
        caller: &CallerIdentity,
        kind: ScheduleKind,
        input: SubmitScheduleRequestInput,
    ) -> AppResult<ScheduleRequest> {
        self.requests
            .submit(caller, PROVIDER, kind, input, None)
            .await
    }

    /// Admin-assigned eligibility of the principal starting now.
    pub(crate) async fn make_eligible(
        &self,
        principal_id: &str,
        role_definition_id: &str,
        scope: RoleScope,
        expiration: Expiration,
    ) -> ScheduleRequest {
        let info = ScheduleInfo::starting_at(self.now(), expiration);
        self.submit(
            &admin(),
            ScheduleKind::Eligibility,
            submission(
                RequestAction::AdminAssign,
                principal_id,
                role_definition_id,
                scope,
                Some(info),
            ),
        )
        .await
        .unwrap_or_else(|error| panic!("eligibility failed: {error}"))
    }

    /// Self-activation of the caller for the given number of hours.
    pub(crate) async fn activate(
        &self,
        principal_id: &str,
        role_definition_id: &str,
        scope: RoleScope,
        hours: u32,
    ) -> AppResult<ScheduleRequest> {
        self.submit(
            &user(principal_id),
            ScheduleKind::Assignment,
            submission(
                RequestAction::SelfActivate,
                principal_id,
                role_definition_id,
                scope,
                Some(for_hours(self.now(), hours)),
            ),
        )
        .await
    }

    pub(crate) async fn save_policy(&self, policy: RoleManagementPolicy) {
        ok(self
            .approvals
            .save_policy(&admin(), PROVIDER, policy)
            .await
            .map(|_| ()));
    }
}

pub(crate) fn submission(
    action: RequestAction,
    principal_id: &str,
    role_definition_id: &str,
    scope: RoleScope,
    schedule_info: Option<ScheduleInfo>,
) -> SubmitScheduleRequestInput {
    SubmitScheduleRequestInput {
        action,
        principal_id: principal_id.to_owned(),
        role_definition_id: role_definition_id.to_owned(),
        scope,
        justification: Some("incident response".to_owned()),
        ticket_info: None,
        schedule_info,
        target_schedule_id: None,
        is_validation_only: false,
    }
}

pub(crate) fn for_hours(start: DateTime<Utc>, hours: u32) -> ScheduleInfo {
    ScheduleInfo::starting_at(start, Expiration::after(IsoDuration::hours(hours)))
}

pub(crate) fn sales_scope() -> RoleScope {
    RoleScope::Directory(format!("/administrativeUnits/{SALES_UNIT}"))
}

pub(crate) fn built_in_input(display_name: &str, action: &str) -> RoleDefinitionInput {
    RoleDefinitionInput {
        display_name: display_name.to_owned(),
        description: String::new(),
        is_enabled: true,
        template_id: None,
        role_permissions: vec![RolePermission::new([action], Vec::<String>::new())],
        inherits_permissions_from: BTreeSet::new(),
    }
}

pub(crate) fn admin() -> CallerIdentity {
    CallerIdentity::new(ADMIN, "Admin").with_mfa(true)
}

pub(crate) fn user(id: &str) -> CallerIdentity {
    CallerIdentity::new(id, id).with_mfa(true)
}

fn ok(result: AppResult<()>) {
    if let Err(error) = result {
        panic!("seeding failed: {error}");
    }
}
