use async_trait::async_trait;
use chrono::{DateTime, Utc};
use warden_core::{AppResult, RbacProvider};
use warden_domain::{
    Approval, AssignmentTriple, RoleAssignment, RoleSchedule, ScheduleInstance, ScheduleKind,
    ScheduleRequest,
};

/// Schedule row to upsert, optionally replacing its instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleWrite {
    /// Schedule to insert or replace.
    pub schedule: RoleSchedule,
    /// `Some` replaces every stored instance of the schedule; `None` leaves them untouched.
    pub instances: Option<Vec<ScheduleInstance>>,
}

/// Persistent assignment change carried by a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentWrite {
    /// Inserts the assignment unless its triple already has one.
    Upsert(RoleAssignment),
    /// Deletes assignments provisioned by the schedule.
    DeleteForSchedule(String),
}

/// Atomic unit of work written by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleCommit {
    /// Requests to insert or replace.
    pub requests: Vec<ScheduleRequest>,
    /// Approvals to insert or replace.
    pub approvals: Vec<Approval>,
    /// Schedules to insert or replace.
    pub schedules: Vec<ScheduleWrite>,
    /// Persistent assignment changes.
    pub assignments: Vec<AssignmentWrite>,
}

impl ScheduleCommit {
    /// Returns whether the commit writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
            && self.approvals.is_empty()
            && self.schedules.is_empty()
            && self.assignments.is_empty()
    }
}

/// Repository port for schedules, instances, requests and approvals.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Applies every write of the commit atomically.
    ///
    /// A second request with an already stored `client_request_id` is a conflict.
    async fn commit(&self, provider: RbacProvider, commit: ScheduleCommit) -> AppResult<()>;

    /// Finds one schedule.
    async fn find_schedule(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        schedule_id: &str,
    ) -> AppResult<Option<RoleSchedule>>;

    /// Lists schedules of a kind.
    async fn list_schedules(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
    ) -> AppResult<Vec<RoleSchedule>>;

    /// Lists schedules of a kind bound to the triple.
    async fn list_schedules_for_triple(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        triple: &AssignmentTriple,
    ) -> AppResult<Vec<RoleSchedule>>;

    /// Lists live schedules of both kinds.
    async fn list_live_schedules(&self, provider: RbacProvider) -> AppResult<Vec<RoleSchedule>>;

    /// Lists activation schedules derived from an eligibility schedule.
    async fn list_schedules_activated_using(
        &self,
        provider: RbacProvider,
        eligibility_schedule_id: &str,
    ) -> AppResult<Vec<RoleSchedule>>;

    /// Finds one instance.
    async fn find_instance(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        instance_id: &str,
    ) -> AppResult<Option<ScheduleInstance>>;

    /// Lists instances of a kind.
    async fn list_instances(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
    ) -> AppResult<Vec<ScheduleInstance>>;

    /// Lists instances produced by one schedule, ordered by start.
    async fn list_instances_for_schedule(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        schedule_id: &str,
    ) -> AppResult<Vec<ScheduleInstance>>;

    /// Lists assignment instances of the principals that are active at `now`.
    async fn list_active_assignment_instances(
        &self,
        provider: RbacProvider,
        principal_ids: &[String],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<ScheduleInstance>>;

    /// Deletes the schedule's instances whose end is at or before `now` and returns how
    /// many were removed.
    async fn delete_instances_ended_by(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        schedule_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64>;

    /// Finds one request.
    async fn find_request(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        request_id: &str,
    ) -> AppResult<Option<ScheduleRequest>>;

    /// Finds the request submitted with a client idempotency id.
    async fn find_request_by_client_id(
        &self,
        provider: RbacProvider,
        client_request_id: &str,
    ) -> AppResult<Option<ScheduleRequest>>;

    /// Lists requests of a kind.
    async fn list_requests(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
    ) -> AppResult<Vec<ScheduleRequest>>;

    /// Lists requests of a kind bound to the triple.
    async fn list_requests_for_triple(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        triple: &AssignmentTriple,
    ) -> AppResult<Vec<ScheduleRequest>>;

    /// Counts live schedules and open or provisioned requests referencing a role.
    async fn count_role_definition_references(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
    ) -> AppResult<u64>;

    /// Finds one approval.
    async fn find_approval(
        &self,
        provider: RbacProvider,
        approval_id: &str,
    ) -> AppResult<Option<Approval>>;

    /// Lists approvals.
    async fn list_approvals(&self, provider: RbacProvider) -> AppResult<Vec<Approval>>;

    /// Lists approvals the principal may decide.
    async fn list_approvals_for_approver(
        &self,
        provider: RbacProvider,
        approver_id: &str,
    ) -> AppResult<Vec<Approval>>;

    /// Lists in-progress approvals whose deadline is at or before `now`.
    async fn list_expired_pending_approvals(
        &self,
        provider: RbacProvider,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Approval>>;
}
