use chrono::{DateTime, Utc};
use tracing::info;
use warden_core::{AppError, AppResult};
use warden_domain::{
    AssignmentType, AuditAction, Expiration, ExpirationType, InstanceWindow, MemberType,
    RequestAction, RequestEvent, RoleAssignment, RoleSchedule, ScheduleKind,
    ScheduleRequest, ScheduleStatus, instance_id, truncate_to_minute,
};

use super::{Batch, ScheduleController, covering_window};
use crate::role_management_ports::{AssignmentWrite, ScheduleWrite};

/// Eligibility window that entitles a `selfActivate` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityCoverage {
    /// Live eligibility schedule of the principal or one of its groups.
    pub schedule: RoleSchedule,
    /// Eligibility window containing the requested activation.
    pub window: InstanceWindow,
}

impl EligibilityCoverage {
    /// Id of the eligibility instance backing the window.
    #[must_use]
    pub fn instance_id(&self) -> String {
        instance_id(self.schedule.id.as_str(), self.window.start_date_time)
    }
}

/// Granted request with the referents its action needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedRequest {
    /// Request in `Granted`.
    pub request: ScheduleRequest,
    /// Schedule the action targets; required for every action except creation.
    pub target: Option<RoleSchedule>,
    /// Entitling eligibility; required for `selfActivate`.
    pub eligibility: Option<EligibilityCoverage>,
}

impl ScheduleController {
    /// Provisions a granted request and moves it to `Provisioned`.
    ///
    /// The caller holds the triple lock; `batch` already carries the writes and events
    /// that led to the grant so everything lands in one commit.
    pub(crate) async fn apply(
        &self,
        mut batch: Batch,
        granted: GrantedRequest,
    ) -> AppResult<ScheduleRequest> {
        let GrantedRequest {
            mut request,
            target,
            eligibility,
        } = granted;

        let schedule_id = match request.action {
            RequestAction::AdminAssign => self.plan_create(&mut batch, &request, None)?,
            RequestAction::SelfActivate => {
                let coverage = eligibility.ok_or_else(|| {
                    AppError::Internal(format!(
                        "activation request '{}' reached the controller without an eligibility",
                        request.id
                    ))
                })?;
                self.plan_create(&mut batch, &request, Some(&coverage))?
            }
            RequestAction::AdminUpdate => {
                let mut schedule = required_target(&request, target)?;
                let start = request.schedule_info.start_date_time.map_or_else(
                    || schedule.schedule_info.start_or(schedule.created_date_time),
                    truncate_to_minute,
                );
                schedule.schedule_info = request.schedule_info.anchored(start);
                self.plan_replace(&mut batch, schedule).await?
            }
            RequestAction::AdminExtend
            | RequestAction::AdminRenew
            | RequestAction::SelfExtend
            | RequestAction::SelfRenew => {
                let mut schedule = required_target(&request, target)?;
                let start = schedule.schedule_info.start_or(schedule.created_date_time);
                let mut info = schedule.schedule_info.clone();
                info.expiration = request.schedule_info.expiration.clone();
                schedule.schedule_info = info.anchored(start);
                self.plan_replace(&mut batch, schedule).await?
            }
            RequestAction::AdminRemove | RequestAction::SelfDeactivate => {
                let schedule = required_target(&request, target)?;
                self.plan_revoke(&mut batch, schedule).await?
            }
        };

        let (before, after) = request.transition(RequestEvent::Apply, batch.now)?;
        request.target_schedule_id = Some(schedule_id.clone());
        batch.request_transition(&request, before, after);
        batch.commit.requests.insert(0, request.clone());

        let provider = batch.provider;
        self.commit_batch(batch).await?;
        info!(
            provider = %provider,
            request_id = %request.id,
            schedule_id = %schedule_id,
            action = request.action.as_str(),
            "schedule request provisioned"
        );

        Ok(request)
    }

    /// Revokes the schedule a provisioned request created; the request ends `Revoked`.
    pub(crate) async fn revoke_provisioned(
        &self,
        mut batch: Batch,
        mut request: ScheduleRequest,
    ) -> AppResult<ScheduleRequest> {
        let schedule = match request.target_schedule_id.as_deref() {
            Some(schedule_id) => self
                .schedules
                .find_schedule(batch.provider, request.kind, schedule_id)
                .await?
                .filter(|schedule| schedule.status.is_live()),
            None => None,
        };

        match schedule {
            Some(schedule) if schedule.created_using == request.id => {
                self.plan_revoke(&mut batch, schedule).await?;
            }
            _ => {
                let (before, after) = request.transition(RequestEvent::Cancel, batch.now)?;
                batch.request_transition(&request, before, after);
                batch.commit.requests.push(request.clone());
            }
        }

        let revoked = batch
            .commit
            .requests
            .iter()
            .find(|candidate| candidate.id == request.id)
            .cloned()
            .unwrap_or(request);
        self.commit_batch(batch).await?;

        Ok(revoked)
    }

    fn plan_create(
        &self,
        batch: &mut Batch,
        request: &ScheduleRequest,
        coverage: Option<&EligibilityCoverage>,
    ) -> AppResult<String> {
        let now = batch.now;
        let (schedule_info, assignment_type, activated_using_id) = match coverage {
            None => (
                request
                    .schedule_info
                    .anchored(request.schedule_info.start_or(now)),
                (request.kind == ScheduleKind::Assignment).then_some(AssignmentType::Assigned),
                None,
            ),
            Some(coverage) => {
                let start = request
                    .schedule_info
                    .start_or(now)
                    .max(truncate_to_minute(now));
                let mut info = request.schedule_info.anchored(start);
                if let Some(limit) = coverage.window.end_date_time {
                    if limit <= start {
                        return Err(AppError::Conflict(format!(
                            "eligibility '{}' ended before the activation could start",
                            coverage.schedule.id
                        )));
                    }
                    if info.end_from(start).is_none_or(|end| end > limit) {
                        info.expiration = Expiration::at(limit);
                    }
                }
                (
                    info,
                    Some(AssignmentType::Activated),
                    Some(coverage.schedule.id.clone()),
                )
            }
        };

        let schedule = RoleSchedule {
            id: uuid::Uuid::new_v4().to_string(),
            kind: request.kind,
            principal_id: request.principal_id.clone(),
            role_definition_id: request.role_definition_id.clone(),
            scope: request.scope.clone(),
            created_using: request.id.clone(),
            created_date_time: now,
            modified_date_time: now,
            status: ScheduleStatus::Provisioned,
            member_type: MemberType::Direct,
            schedule_info,
            assignment_type,
            activated_using_id,
        };
        let link = coverage.map(EligibilityCoverage::instance_id);
        let instances = self.instances_for(&schedule, now, link.as_deref());
        if is_permanent_assignment(&schedule) {
            batch
                .commit
                .assignments
                .push(AssignmentWrite::Upsert(persistent_assignment(&schedule)));
        }

        let schedule_id = schedule.id.clone();
        batch.commit.schedules.push(ScheduleWrite {
            schedule,
            instances: Some(instances),
        });

        Ok(schedule_id)
    }

    async fn plan_replace(&self, batch: &mut Batch, mut schedule: RoleSchedule) -> AppResult<String> {
        if schedule.is_activation() {
            self.clip_to_source_eligibility(batch, &mut schedule).await?;
        }
        schedule.schedule_info.validate()?;
        let link = self.activation_link(batch.provider, &schedule).await?;
        schedule.status = ScheduleStatus::UpdateApplied;
        schedule.modified_date_time = batch.now;

        let instances = self.instances_for(&schedule, batch.now, link.as_deref());
        if is_permanent_assignment(&schedule) {
            batch
                .commit
                .assignments
                .push(AssignmentWrite::Upsert(persistent_assignment(&schedule)));
        } else if schedule.kind == ScheduleKind::Assignment {
            batch
                .commit
                .assignments
                .push(AssignmentWrite::DeleteForSchedule(schedule.id.clone()));
        }

        let schedule_id = schedule.id.clone();
        let rewritten_eligibility =
            (schedule.kind == ScheduleKind::Eligibility).then(|| schedule.clone());
        batch.commit.schedules.push(ScheduleWrite {
            schedule,
            instances: Some(instances),
        });
        if let Some(eligibility) = rewritten_eligibility {
            self.fit_activations(batch, &eligibility).await?;
        }

        Ok(schedule_id)
    }

    /// Caps an activation's expiration at the end of the eligibility window it started in.
    async fn clip_to_source_eligibility(
        &self,
        batch: &Batch,
        schedule: &mut RoleSchedule,
    ) -> AppResult<()> {
        let start = schedule.schedule_info.start_or(schedule.created_date_time);
        let covering = self
            .source_eligibility_window(batch.provider, schedule, start)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!(
                    "eligibility of activation '{}' no longer covers it",
                    schedule.id
                ))
            })?;

        if let Some(limit) = covering.end_date_time
            && schedule
                .schedule_info
                .end_from(start)
                .is_none_or(|end| end > limit)
        {
            schedule.schedule_info.expiration = Expiration::at(limit);
        }

        Ok(())
    }

    /// Keeps the activations of a rewritten eligibility inside its windows: activations
    /// running past the new end are clipped, those left without a covering window are revoked.
    async fn fit_activations(&self, batch: &mut Batch, eligibility: &RoleSchedule) -> AppResult<()> {
        let horizon = self.settings.materialization_horizon;
        for activation in self.lock_activations(batch, eligibility).await? {
            let start = activation.schedule_info.start_or(activation.created_date_time);
            let limit = match covering_window(eligibility, start, horizon) {
                None => None,
                Some(window) => match window.end_date_time {
                    None => continue,
                    Some(limit) => Some(limit).filter(|limit| *limit > batch.now),
                },
            };

            match limit {
                None => self.revoke(batch, activation).await?,
                Some(limit) => {
                    if activation
                        .schedule_info
                        .end_from(start)
                        .is_none_or(|end| end > limit)
                    {
                        self.clip(batch, activation, start, limit).await?;
                    }
                }
            }
        }

        Ok(())
    }

    async fn clip(
        &self,
        batch: &mut Batch,
        mut activation: RoleSchedule,
        start: DateTime<Utc>,
        limit: DateTime<Utc>,
    ) -> AppResult<()> {
        let before = activation.status;
        let mut info = activation.schedule_info.clone();
        info.expiration = Expiration::at(limit);
        activation.schedule_info = info.anchored(start);
        activation.status = ScheduleStatus::UpdateApplied;
        activation.modified_date_time = batch.now;
        batch.schedule_event(AuditAction::ScheduleClipped, &activation, before.as_str());

        let link = self.activation_link(batch.provider, &activation).await?;
        let instances = self.instances_for(&activation, batch.now, link.as_deref());
        batch.commit.schedules.push(ScheduleWrite {
            schedule: activation,
            instances: Some(instances),
        });

        Ok(())
    }

    /// Revokes the schedule and, for eligibilities, every live activation derived from it.
    async fn plan_revoke(&self, batch: &mut Batch, schedule: RoleSchedule) -> AppResult<String> {
        let schedule_id = schedule.id.clone();
        let cascade = if schedule.kind == ScheduleKind::Eligibility {
            self.lock_activations(batch, &schedule).await?
        } else {
            Vec::new()
        };

        self.revoke(batch, schedule).await?;
        for activation in cascade {
            self.revoke(batch, activation).await?;
        }

        Ok(schedule_id)
    }

    async fn revoke(&self, batch: &mut Batch, mut schedule: RoleSchedule) -> AppResult<()> {
        let before = schedule.status;
        schedule.status = ScheduleStatus::Revoked;
        schedule.modified_date_time = batch.now;
        batch.schedule_event(AuditAction::ScheduleRevoked, &schedule, before.as_str());
        self.close_origin_request(batch, &schedule, RequestEvent::Revoke)
            .await?;

        if schedule.kind == ScheduleKind::Assignment {
            batch
                .commit
                .assignments
                .push(AssignmentWrite::DeleteForSchedule(schedule.id.clone()));
        }
        batch.commit.schedules.push(ScheduleWrite {
            schedule,
            instances: Some(Vec::new()),
        });

        Ok(())
    }
}

fn required_target(request: &ScheduleRequest, target: Option<RoleSchedule>) -> AppResult<RoleSchedule> {
    target.ok_or_else(|| {
        AppError::Internal(format!(
            "request '{}' reached the controller without its target schedule",
            request.id
        ))
    })
}

fn is_permanent_assignment(schedule: &RoleSchedule) -> bool {
    schedule.kind == ScheduleKind::Assignment
        && schedule.assignment_type == Some(AssignmentType::Assigned)
        && schedule.schedule_info.recurrence.is_none()
        && schedule.schedule_info.expiration.expiration_type == ExpirationType::NoExpiration
}

fn persistent_assignment(schedule: &RoleSchedule) -> RoleAssignment {
    RoleAssignment {
        id: uuid::Uuid::new_v4().to_string(),
        principal_id: schedule.principal_id.clone(),
        role_definition_id: schedule.role_definition_id.clone(),
        scope: schedule.scope.clone(),
        condition: None,
        created_date_time: schedule.modified_date_time,
        schedule_id: Some(schedule.id.clone()),
    }
}

