use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::warn;
use warden_core::{AppError, AppResult, RbacProvider};
use warden_domain::{
    AssignmentTriple, AuditAction, InstanceWindow, RequestEvent, RequestStatus, RoleSchedule,
    ScheduleInstance, ScheduleKind, ScheduleRequest, materialize,
};

use crate::audit_trail::AuditTrail;
use crate::keyed_lock::{KeyedLock, KeyedLockGuard};
use crate::role_management_ports::{
    AuditEvent, EngineSettings, ScheduleCommit, ScheduleRepository, TimeSource,
};

mod provisioning;
mod tick;

pub use provisioning::{EligibilityCoverage, GrantedRequest};

/// Single writer of schedules and instances.
///
/// Every mutation of a `(principal, roleDefinition, scope)` triple runs under the
/// triple's keyed lock, so persisted states and audit events for one triple are
/// totally ordered.
#[derive(Clone)]
pub struct ScheduleController {
    schedules: Arc<dyn ScheduleRepository>,
    audit: AuditTrail,
    clock: Arc<dyn TimeSource>,
    settings: EngineSettings,
    locks: KeyedLock,
}

impl ScheduleController {
    /// Creates a controller.
    #[must_use]
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        audit: AuditTrail,
        clock: Arc<dyn TimeSource>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            schedules,
            audit,
            clock,
            settings,
            locks: KeyedLock::new(),
        }
    }

    /// Engine settings in use.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Waits for exclusive access to the triple.
    pub async fn lock(&self, provider: RbacProvider, triple: &AssignmentTriple) -> KeyedLockGuard {
        self.locks.acquire(triple.lock_key(provider)).await
    }

    /// Writes the commit atomically, then appends its audit events in order.
    ///
    /// Each attempt is bounded by the store timeout; retryable failures are retried with
    /// linear backoff until the retry budget is spent.
    pub async fn commit(
        &self,
        provider: RbacProvider,
        commit: ScheduleCommit,
        events: Vec<AuditEvent>,
    ) -> AppResult<()> {
        if !commit.is_empty() {
            self.commit_with_retry(provider, commit).await?;
        }
        self.audit.record_all(events).await;

        Ok(())
    }

    pub(crate) async fn commit_batch(&self, batch: Batch) -> AppResult<()> {
        let Batch {
            provider,
            commit,
            events,
            guards,
            ..
        } = batch;
        let result = self.commit(provider, commit, events).await;
        drop(guards);

        result
    }

    async fn commit_with_retry(&self, provider: RbacProvider, commit: ScheduleCommit) -> AppResult<()> {
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(
                self.settings.store_timeout,
                self.schedules.commit(provider, commit.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AppError::TimedOut(format!(
                    "store commit exceeded {} ms",
                    self.settings.store_timeout.as_millis()
                ))),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(error) if error.is_retryable() && attempt < self.settings.store_retry_budget => {
                    attempt += 1;
                    warn!(
                        provider = %provider,
                        attempt,
                        error = %error,
                        "retrying store commit"
                    );
                    tokio::time::sleep(self.settings.store_retry_backoff * attempt).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Materializes the schedule's current windows as instances.
    #[must_use]
    pub fn instances_for(
        &self,
        schedule: &RoleSchedule,
        now: DateTime<Utc>,
        activated_using_instance_id: Option<&str>,
    ) -> Vec<ScheduleInstance> {
        materialize(&schedule.schedule_info, now, self.settings.materialization_horizon)
            .into_iter()
            .map(|window: InstanceWindow| {
                ScheduleInstance::for_window(
                    schedule,
                    window,
                    activated_using_instance_id.map(str::to_owned),
                )
            })
            .collect()
    }

    /// Eligibility instance an activation schedule was derived from, if still known.
    async fn activation_link(
        &self,
        provider: RbacProvider,
        schedule: &RoleSchedule,
    ) -> AppResult<Option<String>> {
        if !schedule.is_activation() {
            return Ok(None);
        }
        let stored = self
            .schedules
            .list_instances_for_schedule(provider, schedule.kind, schedule.id.as_str())
            .await?;

        Ok(stored
            .into_iter()
            .find_map(|instance| instance.activated_using_id)
            .or_else(|| schedule.activated_using_id.clone()))
    }

    /// Window of the activation's source eligibility that contains `start`.
    ///
    /// `None` when the eligibility is gone, no longer live, or has no window at `start`.
    pub(crate) async fn source_eligibility_window(
        &self,
        provider: RbacProvider,
        activation: &RoleSchedule,
        start: DateTime<Utc>,
    ) -> AppResult<Option<InstanceWindow>> {
        let Some(eligibility_id) = activation.activated_using_id.as_deref() else {
            return Ok(None);
        };
        let eligibility = self
            .schedules
            .find_schedule(provider, ScheduleKind::Eligibility, eligibility_id)
            .await?
            .filter(|eligibility| eligibility.status.is_live());

        Ok(eligibility.and_then(|eligibility| {
            covering_window(&eligibility, start, self.settings.materialization_horizon)
        }))
    }

    /// Live activations derived from the eligibility, each re-read under its triple lock.
    ///
    /// Locks are taken in key order and kept on the batch until it commits; the
    /// eligibility's own triple is already held by the caller.
    async fn lock_activations(
        &self,
        batch: &mut Batch,
        eligibility: &RoleSchedule,
    ) -> AppResult<Vec<RoleSchedule>> {
        let provider = batch.provider;
        let held = eligibility.triple().lock_key(provider);
        let mut activations: Vec<RoleSchedule> = self
            .schedules
            .list_schedules_activated_using(provider, eligibility.id.as_str())
            .await?
            .into_iter()
            .filter(|activation| activation.status.is_live())
            .collect();
        activations.sort_by_key(|activation| activation.triple().lock_key(provider));

        let mut locked = Vec::with_capacity(activations.len());
        for activation in activations {
            let triple = activation.triple();
            let key = triple.lock_key(provider);
            if key != held && !batch.guards.iter().any(|guard| guard.key() == key) {
                batch.guards.push(self.lock(provider, &triple).await);
            }
            let current = self
                .schedules
                .find_schedule(provider, activation.kind, activation.id.as_str())
                .await?
                .filter(|current| current.status.is_live());
            locked.extend(current);
        }

        Ok(locked)
    }

    /// Moves the request that created a schedule along with the schedule's terminal event.
    async fn close_origin_request(
        &self,
        batch: &mut Batch,
        schedule: &RoleSchedule,
        event: RequestEvent,
    ) -> AppResult<()> {
        let Some(mut origin) = self
            .schedules
            .find_request(batch.provider, schedule.kind, schedule.created_using.as_str())
            .await?
        else {
            return Ok(());
        };
        if origin.status != RequestStatus::Provisioned {
            return Ok(());
        }

        let (before, after) = origin.transition(event, batch.now)?;
        batch.request_transition(&origin, before, after);
        batch.commit.requests.push(origin);

        Ok(())
    }
}

/// Writes and audit events accumulated under one lock interval.
pub(crate) struct Batch {
    pub(crate) provider: RbacProvider,
    pub(crate) now: DateTime<Utc>,
    pub(crate) actor: String,
    pub(crate) commit: ScheduleCommit,
    pub(crate) events: Vec<AuditEvent>,
    guards: Vec<KeyedLockGuard>,
}

impl Batch {
    pub(crate) fn new(provider: RbacProvider, now: DateTime<Utc>, actor: &str) -> Self {
        Self {
            provider,
            now,
            actor: actor.to_owned(),
            commit: ScheduleCommit::default(),
            events: Vec::new(),
            guards: Vec::new(),
        }
    }

    pub(crate) fn request_transition(
        &mut self,
        request: &ScheduleRequest,
        before: RequestStatus,
        after: RequestStatus,
    ) {
        self.events.push(request_transition_event(
            self.provider,
            self.now,
            self.actor.as_str(),
            request,
            before,
            after,
        ));
    }

    fn schedule_event(&mut self, action: AuditAction, schedule: &RoleSchedule, before: &str) {
        self.events.push(
            AuditEvent::new(
                self.provider,
                self.now,
                self.actor.as_str(),
                action,
                schedule_resource_type(schedule),
                schedule.id.as_str(),
            )
            .with_statuses(before, schedule.status.as_str())
            .with_request(schedule.created_using.as_str()),
        );
    }
}

/// Audit event for one request status change.
pub(crate) fn request_transition_event(
    provider: RbacProvider,
    now: DateTime<Utc>,
    actor: &str,
    request: &ScheduleRequest,
    before: RequestStatus,
    after: RequestStatus,
) -> AuditEvent {
    AuditEvent::new(
        provider,
        now,
        actor,
        AuditAction::RequestTransitioned,
        request_resource_type(request),
        request.id.as_str(),
    )
    .with_statuses(before.as_str(), after.as_str())
    .with_request(request.id.as_str())
}

/// Window of the eligibility containing `start`, if any.
pub(crate) fn covering_window(
    eligibility: &RoleSchedule,
    start: DateTime<Utc>,
    horizon: TimeDelta,
) -> Option<InstanceWindow> {
    materialize(&eligibility.schedule_info, start, horizon)
        .into_iter()
        .find(|window| window.contains(start))
}

pub(crate) fn request_resource_type(request: &ScheduleRequest) -> &'static str {
    match request.kind {
        ScheduleKind::Assignment => "role_assignment_schedule_request",
        ScheduleKind::Eligibility => "role_eligibility_schedule_request",
    }
}

fn schedule_resource_type(schedule: &RoleSchedule) -> &'static str {
    match schedule.kind {
        ScheduleKind::Assignment => "role_assignment_schedule",
        ScheduleKind::Eligibility => "role_eligibility_schedule",
    }
}
