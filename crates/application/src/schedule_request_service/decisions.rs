use tracing::info;
use warden_core::{AppError, AppResult, CallerIdentity, RbacProvider};
use warden_domain::{
    Approval, ApprovalStatus, AuditAction, DecisionOutcome, InstanceWindow, RequestAction,
    RequestEvent, RequestStatus, ReviewResult, ScheduleKind, ScheduleRequest, StatusDetail,
    TicketInfo, truncate_to_minute,
};

use super::ScheduleRequestService;
use crate::role_management_ports::AuditEvent;
use crate::schedule_controller::{Batch, GrantedRequest, request_resource_type};

impl ScheduleRequestService {
    /// Records an approver's decision; approving provisions the request.
    ///
    /// Repeating a decision that is already recorded returns the request unchanged.
    pub async fn decide(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        approval_id: &str,
        review_result: ReviewResult,
        justification: Option<String>,
    ) -> AppResult<ScheduleRequest> {
        let approval = self.load_approval(provider, approval_id).await?;
        let request = self
            .load_request(provider, approval.request_kind, approval.request_id.as_str())
            .await?;

        let _guard = self.controller.lock(provider, &request.triple()).await;
        let mut approval = self.load_approval(provider, approval_id).await?;
        let mut request = self
            .load_request(provider, approval.request_kind, approval.request_id.as_str())
            .await?;
        let now = self.clock.now();
        if approval.is_expired_at(now) {
            return Err(AppError::Conflict(format!(
                "approval '{approval_id}' expired at {}",
                approval.expires_date_time
            )));
        }

        let outcome =
            approval.record_decision(caller.principal_id(), review_result, justification, now)?;
        if outcome == DecisionOutcome::AlreadyRecorded {
            return Ok(request);
        }
        info!(
            provider = %provider,
            approval_id = %approval.id,
            request_id = %request.id,
            approver_id = %caller.principal_id(),
            review_result = ?review_result,
            "approval decision recorded"
        );

        let mut batch = Batch::new(provider, now, caller.principal_id());
        let event = match review_result {
            ReviewResult::Approve => RequestEvent::Approve,
            ReviewResult::Deny => RequestEvent::Deny,
        };
        let (before, after) = request.transition(event, now)?;
        batch.request_transition(&request, before, after);
        batch.commit.approvals.push(approval);

        if review_result == ReviewResult::Deny {
            batch.commit.requests.push(request.clone());
            self.controller.commit_batch(batch).await?;
            return Ok(request);
        }

        match self.resolve_granted(provider, &request).await {
            Ok(granted) => self.provision(batch, granted).await,
            Err(error) if error.is_retryable() => Err(error),
            Err(error) => {
                let (before, after) = request.transition(RequestEvent::Fail, now)?;
                request.status_detail = Some(StatusDetail::from_error(&error));
                batch.request_transition(&request, before, after);
                batch.commit.requests.push(request);
                self.controller.commit_batch(batch).await?;
                Err(error)
            }
        }
    }

    /// Re-resolves the referents of an approved request at grant time.
    async fn resolve_granted(
        &self,
        provider: RbacProvider,
        request: &ScheduleRequest,
    ) -> AppResult<GrantedRequest> {
        let definition = self
            .registry
            .find(provider, request.role_definition_id.as_str())
            .await?;
        if !definition.is_enabled {
            return Err(AppError::Validation(format!(
                "role definition '{}' was disabled before the request was approved",
                definition.id
            )));
        }

        let now = self.clock.now();
        match request.action {
            RequestAction::AdminAssign => Ok(GrantedRequest {
                request: request.clone(),
                target: None,
                eligibility: None,
            }),
            RequestAction::SelfActivate => {
                let start = request
                    .schedule_info
                    .start_or(now)
                    .max(truncate_to_minute(now));
                let window = InstanceWindow {
                    start_date_time: start,
                    end_date_time: request.schedule_info.end_from(start),
                };
                let coverage = self
                    .find_eligibility(provider, request, &window, false)
                    .await?;
                Ok(GrantedRequest {
                    request: request.clone(),
                    target: None,
                    eligibility: Some(coverage),
                })
            }
            _ => {
                let schedule_id = request.target_schedule_id.as_deref().ok_or_else(|| {
                    AppError::Internal(format!("request '{}' has no target schedule", request.id))
                })?;
                let target = self
                    .schedules
                    .find_schedule(provider, request.kind, schedule_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!(
                            "target schedule '{schedule_id}' no longer exists"
                        ))
                    })?;
                let renewing = matches!(
                    request.action,
                    RequestAction::AdminRenew | RequestAction::SelfRenew
                );
                if !renewing && !target.status.is_live() {
                    return Err(AppError::Conflict(format!(
                        "target schedule '{schedule_id}' is {}",
                        target.status.as_str()
                    )));
                }
                Ok(GrantedRequest {
                    request: request.clone(),
                    target: Some(target),
                    eligibility: None,
                })
            }
        }
    }

    /// Cancels a request; a provisioned request is revoked instead.
    ///
    /// Allowed for the creator and for role managers over the scope. Canceling an already
    /// canceled or revoked request is a no-op.
    pub async fn cancel(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        kind: ScheduleKind,
        request_id: &str,
    ) -> AppResult<ScheduleRequest> {
        let request = self.load_request(provider, kind, request_id).await?;
        let _guard = self.controller.lock(provider, &request.triple()).await;
        let mut request = self.load_request(provider, kind, request_id).await?;

        if request.created_by != caller.principal_id() {
            self.authorization
                .require_role_management(provider, caller, &request.scope)
                .await?;
        }

        let batch = Batch::new(provider, self.clock.now(), caller.principal_id());
        match request.status {
            RequestStatus::Canceled | RequestStatus::Revoked => Ok(request),
            RequestStatus::Provisioned => self.controller.revoke_provisioned(batch, request).await,
            _ => {
                let mut batch = batch;
                let (before, after) = request.transition(RequestEvent::Cancel, batch.now)?;
                batch.request_transition(&request, before, after);
                if let Some(approval_id) = request.approval_id.as_deref()
                    && let Some(mut approval) =
                        self.schedules.find_approval(provider, approval_id).await?
                    && approval.status == ApprovalStatus::InProgress
                {
                    approval.status = ApprovalStatus::Canceled;
                    batch.commit.approvals.push(approval);
                }
                batch.commit.requests.push(request.clone());
                self.controller.commit_batch(batch).await?;
                Ok(request)
            }
        }
    }

    /// Corrects justification or ticket metadata; the only change terminal requests accept.
    pub async fn correct_metadata(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        kind: ScheduleKind,
        request_id: &str,
        justification: Option<String>,
        ticket_info: Option<TicketInfo>,
    ) -> AppResult<ScheduleRequest> {
        let request = self.load_request(provider, kind, request_id).await?;
        self.authorization
            .require_role_management(provider, caller, &request.scope)
            .await?;

        let _guard = self.controller.lock(provider, &request.triple()).await;
        let mut request = self.load_request(provider, kind, request_id).await?;
        request.correct_metadata(justification, ticket_info)?;

        let mut batch = Batch::new(provider, self.clock.now(), caller.principal_id());
        batch.events.push(
            AuditEvent::new(
                provider,
                batch.now,
                caller.principal_id(),
                AuditAction::RequestMetadataCorrected,
                request_resource_type(&request),
                request.id.as_str(),
            )
            .with_request(request.id.as_str()),
        );
        batch.commit.requests.push(request.clone());
        self.controller.commit_batch(batch).await?;

        Ok(request)
    }

    /// Returns an approval to its approvers, the requester, or scope readers.
    pub async fn get_approval(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        approval_id: &str,
    ) -> AppResult<Approval> {
        let approval = self.load_approval(provider, approval_id).await?;
        if approval.is_approver(caller.principal_id()) {
            return Ok(approval);
        }

        let request = self
            .load_request(provider, approval.request_kind, approval.request_id.as_str())
            .await?;
        if request.created_by == caller.principal_id() || request.principal_id == caller.principal_id() {
            return Ok(approval);
        }
        self.authorization
            .require_scope_read(provider, caller, &request.scope)
            .await?;

        Ok(approval)
    }

    /// Denies every pending request whose approval deadline passed; returns how many.
    pub async fn sweep_approval_timeouts(&self, provider: RbacProvider) -> AppResult<u64> {
        let now = self.clock.now();
        let mut timed_out = 0;

        for expired in self
            .schedules
            .list_expired_pending_approvals(provider, now)
            .await?
        {
            let Some(request) = self
                .schedules
                .find_request(provider, expired.request_kind, expired.request_id.as_str())
                .await?
            else {
                continue;
            };

            let _guard = self.controller.lock(provider, &request.triple()).await;
            let Some(mut approval) = self
                .schedules
                .find_approval(provider, expired.id.as_str())
                .await?
                .filter(|approval| approval.is_expired_at(now))
            else {
                continue;
            };
            let mut request = self
                .load_request(provider, approval.request_kind, approval.request_id.as_str())
                .await?;
            if request.status != RequestStatus::PendingApproval {
                continue;
            }

            let mut batch = Batch::new(provider, now, CallerIdentity::system().principal_id());
            let (before, after) = request.transition(RequestEvent::ApprovalTimedOut, now)?;
            request.status_detail = Some(StatusDetail {
                code: "timedOut".to_owned(),
                message: format!("approval '{}' was not decided in time", approval.id),
            });
            approval.status = ApprovalStatus::TimedOut;
            batch.request_transition(&request, before, after);
            batch.commit.requests.push(request);
            batch.commit.approvals.push(approval);
            self.controller.commit_batch(batch).await?;
            timed_out += 1;
        }

        if timed_out > 0 {
            info!(provider = %provider, timed_out, "pending approvals timed out");
        }
        Ok(timed_out)
    }

    async fn load_approval(&self, provider: RbacProvider, approval_id: &str) -> AppResult<Approval> {
        self.schedules
            .find_approval(provider, approval_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("approval '{approval_id}' does not exist")))
    }
}
