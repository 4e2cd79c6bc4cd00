use chrono::{DateTime, Utc};
use warden_core::{AppError, AppResult, CallerIdentity, RbacProvider};
use warden_domain::{
    AssignmentTriple, InstanceWindow, RequestAction, RoleManagementPolicy, RoleSchedule,
    ScheduleKind, ScheduleRequest, ScheduleStatus, materialize, truncate_to_minute,
};

use super::ScheduleRequestService;
use crate::approval_service::evaluate_policy;
use crate::schedule_controller::EligibilityCoverage;

/// Outcome of validating a received request.
pub(super) struct Validated {
    pub(super) policy: RoleManagementPolicy,
    pub(super) approval_required: bool,
    pub(super) approver_ids: Vec<String>,
    pub(super) target: Option<RoleSchedule>,
    pub(super) eligibility: Option<EligibilityCoverage>,
}

impl ScheduleRequestService {
    /// Runs every check a request must pass before it can leave `Received`.
    pub(super) async fn validate(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        request: &mut ScheduleRequest,
    ) -> AppResult<Validated> {
        if request.action.is_self_service() {
            if !caller.is_system() && caller.principal_id() != request.principal_id {
                return Err(AppError::Forbidden(format!(
                    "'{}' may only be requested for the caller's own principal",
                    request.action
                )));
            }
        } else {
            self.authorization
                .require_role_management(provider, caller, &request.scope)
                .await?;
        }

        self.directory.principal(request.principal_id.as_str()).await?;
        self.directory.resolve_scope(&request.scope).await?;
        let definition = self
            .registry
            .find(provider, request.role_definition_id.as_str())
            .await?;
        if !definition.is_enabled {
            return Err(AppError::Validation(format!(
                "role definition '{}' is disabled",
                definition.id
            )));
        }

        let now = self.clock.now();
        let tolerance = self.controller.settings().far_past_tolerance;
        if let Some(start) = request.schedule_info.start_date_time
            && start < truncate_to_minute(now) - tolerance
        {
            return Err(AppError::Validation(format!(
                "startDateTime lies more than {} minutes in the past",
                tolerance.num_minutes()
            )));
        }

        let triple = request.triple();
        let open = self
            .schedules
            .list_requests_for_triple(provider, request.kind, &triple)
            .await?
            .into_iter()
            .find(|existing| existing.id != request.id && existing.status.is_open());
        if let Some(open) = open {
            return Err(AppError::Conflict(format!(
                "request '{}' for the same principal, role and scope is still {}",
                open.id,
                open.status.as_str()
            )));
        }

        let policy = self
            .approvals
            .policy_for(provider, request.role_definition_id.as_str())
            .await?;
        let (window, target, eligibility) = self
            .check_action(provider, request, &policy, now)
            .await?;

        let approval_required = evaluate_policy(&policy, request, caller, &window)?;
        let approver_ids = if approval_required {
            self.approvals
                .approvers_for(provider, &policy, request)
                .await?
        } else {
            Vec::new()
        };

        Ok(Validated {
            policy,
            approval_required,
            approver_ids,
            target,
            eligibility,
        })
    }

    /// Per-action checks; returns the window the schedule would end up with.
    async fn check_action(
        &self,
        provider: RbacProvider,
        request: &mut ScheduleRequest,
        policy: &RoleManagementPolicy,
        now: DateTime<Utc>,
    ) -> AppResult<(InstanceWindow, Option<RoleSchedule>, Option<EligibilityCoverage>)> {
        let triple = request.triple();
        match request.action {
            RequestAction::AdminAssign => {
                let window = requested_window(request, now);
                self.ensure_no_overlap(provider, request.kind, &triple, &window, None)
                    .await?;
                Ok((window, None, None))
            }
            RequestAction::SelfActivate => {
                let start = request
                    .schedule_info
                    .start_or(now)
                    .max(truncate_to_minute(now));
                let window = InstanceWindow {
                    start_date_time: start,
                    end_date_time: request.schedule_info.end_from(start),
                };
                let coverage = self.find_eligibility(provider, request, &window, true).await?;
                self.ensure_no_overlap(provider, ScheduleKind::Assignment, &triple, &window, None)
                    .await?;
                request.activated_using_id = Some(coverage.schedule.id.clone());
                Ok((window, None, Some(coverage)))
            }
            RequestAction::AdminRemove | RequestAction::SelfDeactivate => {
                let target = self.resolve_target(provider, request, true).await?;
                if request.action == RequestAction::SelfDeactivate
                    && request.kind == ScheduleKind::Assignment
                    && !target.is_activation()
                {
                    return Err(AppError::Validation(format!(
                        "schedule '{}' was not activated and cannot be deactivated",
                        target.id
                    )));
                }
                Ok((target.window(), Some(target), None))
            }
            RequestAction::AdminUpdate => {
                let target = self.resolve_target(provider, request, true).await?;
                let start = request.schedule_info.start_date_time.map_or_else(
                    || target.schedule_info.start_or(target.created_date_time),
                    truncate_to_minute,
                );
                let window = InstanceWindow {
                    start_date_time: start,
                    end_date_time: request.schedule_info.end_from(start),
                };
                self.ensure_no_overlap(
                    provider,
                    request.kind,
                    &triple,
                    &window,
                    Some(target.id.as_str()),
                )
                .await?;
                self.ensure_within_eligibility(provider, &target, &window)
                    .await?;
                Ok((window, Some(target), None))
            }
            RequestAction::AdminExtend | RequestAction::SelfExtend => {
                let target = self.resolve_target(provider, request, true).await?;
                let current = target.window();
                let Some(current_end) = current.end_date_time else {
                    return Err(AppError::Validation(format!(
                        "schedule '{}' never expires and cannot be extended",
                        target.id
                    )));
                };
                if current_end <= now {
                    return Err(AppError::Validation(format!(
                        "schedule '{}' already expired; renew it instead",
                        target.id
                    )));
                }
                let window = prolonged_window(request, &target, current_end)?;
                self.ensure_within_eligibility(provider, &target, &window)
                    .await?;
                Ok((window, Some(target), None))
            }
            RequestAction::AdminRenew | RequestAction::SelfRenew => {
                let target = self.resolve_target(provider, request, false).await?;
                let Some(current_end) = target.window().end_date_time else {
                    return Err(AppError::Validation(format!(
                        "schedule '{}' never expires and cannot be renewed",
                        target.id
                    )));
                };
                if target.status != ScheduleStatus::Expired && current_end > now {
                    return Err(AppError::Validation(format!(
                        "schedule '{}' has not expired; extend it instead",
                        target.id
                    )));
                }
                if now > current_end + policy.renewal_grace_period.to_time_delta() {
                    return Err(AppError::Validation(format!(
                        "renewal grace period of schedule '{}' has elapsed",
                        target.id
                    )));
                }
                let window = prolonged_window(request, &target, now)?;
                self.ensure_within_eligibility(provider, &target, &window)
                    .await?;
                Ok((window, Some(target), None))
            }
        }
    }

    /// Loads the schedule the request targets, by id or by triple.
    async fn resolve_target(
        &self,
        provider: RbacProvider,
        request: &mut ScheduleRequest,
        require_live: bool,
    ) -> AppResult<RoleSchedule> {
        let triple = request.triple();
        let acceptable = |schedule: &RoleSchedule| {
            if require_live {
                schedule.status.is_live()
            } else {
                schedule.status.is_live() || schedule.status == ScheduleStatus::Expired
            }
        };

        let target = match request.target_schedule_id.as_deref() {
            Some(schedule_id) => {
                let schedule = self
                    .schedules
                    .find_schedule(provider, request.kind, schedule_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!(
                            "target schedule '{schedule_id}' does not exist"
                        ))
                    })?;
                if schedule.triple() != triple {
                    return Err(AppError::Validation(format!(
                        "target schedule '{schedule_id}' belongs to another principal, role or scope"
                    )));
                }
                Some(schedule).filter(|schedule| acceptable(schedule))
            }
            None => self
                .schedules
                .list_schedules_for_triple(provider, request.kind, &triple)
                .await?
                .into_iter()
                .filter(|schedule| acceptable(schedule))
                .filter(|schedule| {
                    request.action != RequestAction::SelfDeactivate || schedule.is_activation()
                })
                .max_by_key(|schedule| schedule.modified_date_time),
        };

        let target = target.ok_or_else(|| {
            AppError::NotFound(format!(
                "no {} schedule of principal '{}' for role '{}' can be targeted by '{}'",
                request.kind.as_str(),
                request.principal_id,
                request.role_definition_id,
                request.action
            ))
        })?;
        request.target_schedule_id = Some(target.id.clone());

        Ok(target)
    }

    /// Finds a live eligibility of the principal or its groups containing the window start.
    ///
    /// With `require_cover`, the eligibility window must contain the whole window.
    pub(super) async fn find_eligibility(
        &self,
        provider: RbacProvider,
        request: &ScheduleRequest,
        window: &InstanceWindow,
        require_cover: bool,
    ) -> AppResult<EligibilityCoverage> {
        let horizon = self.controller.settings().materialization_horizon;
        let holder_ids = self
            .directory
            .principal_and_group_ids(request.principal_id.as_str())
            .await?;

        for holder_id in holder_ids {
            let triple = AssignmentTriple::new(
                holder_id.as_str(),
                request.role_definition_id.as_str(),
                request.scope.clone(),
            );
            let eligibilities = self
                .schedules
                .list_schedules_for_triple(provider, ScheduleKind::Eligibility, &triple)
                .await?;
            for schedule in eligibilities.into_iter().filter(|schedule| schedule.status.is_live()) {
                let covering = materialize(&schedule.schedule_info, window.start_date_time, horizon)
                    .into_iter()
                    .find(|candidate| {
                        candidate.contains(window.start_date_time)
                            && (!require_cover || candidate.covers(window))
                    });
                if let Some(covering) = covering {
                    return Ok(EligibilityCoverage {
                        schedule,
                        window: covering,
                    });
                }
            }
        }

        Err(AppError::Validation(format!(
            "principal '{}' holds no eligibility for role '{}' covering the requested window",
            request.principal_id, request.role_definition_id
        )))
    }

    /// An activation must stay inside the eligibility window it was activated from.
    async fn ensure_within_eligibility(
        &self,
        provider: RbacProvider,
        target: &RoleSchedule,
        window: &InstanceWindow,
    ) -> AppResult<()> {
        if !target.is_activation() {
            return Ok(());
        }

        let covering = self
            .controller
            .source_eligibility_window(provider, target, window.start_date_time)
            .await?;
        if covering.is_some_and(|covering| covering.covers(window)) {
            return Ok(());
        }

        Err(AppError::Validation(format!(
            "activation '{}' would run outside the eligibility '{}' it was activated from",
            target.id,
            target.activated_using_id.as_deref().unwrap_or_default()
        )))
    }

    async fn ensure_no_overlap(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        triple: &AssignmentTriple,
        window: &InstanceWindow,
        except_schedule_id: Option<&str>,
    ) -> AppResult<()> {
        let overlapping = self
            .schedules
            .list_schedules_for_triple(provider, kind, triple)
            .await?
            .into_iter()
            .filter(|schedule| schedule.status.is_live())
            .filter(|schedule| Some(schedule.id.as_str()) != except_schedule_id)
            .find(|schedule| schedule.window().overlaps(window));

        match overlapping {
            Some(schedule) => Err(AppError::Conflict(format!(
                "live {} schedule '{}' already covers the requested window",
                kind.as_str(),
                schedule.id
            ))),
            None => Ok(()),
        }
    }
}

fn requested_window(request: &ScheduleRequest, now: DateTime<Utc>) -> InstanceWindow {
    let (start, end) = request.schedule_info.window(now);
    InstanceWindow {
        start_date_time: start,
        end_date_time: end,
    }
}

/// Window of the target once its expiration is replaced; the new end must pass `floor`.
fn prolonged_window(
    request: &ScheduleRequest,
    target: &RoleSchedule,
    floor: DateTime<Utc>,
) -> AppResult<InstanceWindow> {
    let start = target.schedule_info.start_or(target.created_date_time);
    let end = request.schedule_info.end_from(start);
    if end.is_some_and(|end| end <= floor) {
        return Err(AppError::Validation(format!(
            "the new expiration of schedule '{}' must be later than the current one",
            target.id
        )));
    }

    Ok(InstanceWindow {
        start_date_time: start,
        end_date_time: end,
    })
}
