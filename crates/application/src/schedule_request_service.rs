use std::sync::Arc;

use tracing::{info, warn};
use warden_core::{AppError, AppResult, CallerIdentity, RbacProvider};
use warden_domain::{
    ApprovalStatus, AssignmentTriple, Expiration, RequestAction, RequestEvent, RequestStatus,
    RoleScope, ScheduleInfo, ScheduleKind, ScheduleRequest, StatusDetail, TicketInfo,
    truncate_to_minute,
};

use crate::approval_service::ApprovalService;
use crate::authorization_service::AuthorizationService;
use crate::directory_service::DirectoryService;
use crate::role_definition_registry::RoleDefinitionRegistry;
use crate::role_management_ports::{ScheduleRepository, TimeSource};
use crate::schedule_controller::{Batch, GrantedRequest, ScheduleController};

mod decisions;
mod validation;

/// Body of a schedule request submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitScheduleRequestInput {
    /// Requested action.
    pub action: RequestAction,
    /// Subject principal.
    pub principal_id: String,
    /// Requested role.
    pub role_definition_id: String,
    /// Requested scope.
    pub scope: RoleScope,
    /// Free-text justification.
    pub justification: Option<String>,
    /// External ticket reference.
    pub ticket_info: Option<TicketInfo>,
    /// Requested window; defaults to an open-ended window starting now.
    pub schedule_info: Option<ScheduleInfo>,
    /// Schedule the action targets; resolved from the triple when absent.
    pub target_schedule_id: Option<String>,
    /// Validate and report the would-be status without persisting anything.
    pub is_validation_only: bool,
}

/// Request state machine: submission, approval decisions, cancellation and timeouts.
#[derive(Clone)]
pub struct ScheduleRequestService {
    schedules: Arc<dyn ScheduleRepository>,
    registry: RoleDefinitionRegistry,
    directory: DirectoryService,
    authorization: AuthorizationService,
    approvals: ApprovalService,
    controller: ScheduleController,
    clock: Arc<dyn TimeSource>,
}

impl ScheduleRequestService {
    /// Creates a schedule request service.
    #[must_use]
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        registry: RoleDefinitionRegistry,
        directory: DirectoryService,
        authorization: AuthorizationService,
        approvals: ApprovalService,
        controller: ScheduleController,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            schedules,
            registry,
            directory,
            authorization,
            approvals,
            controller,
            clock,
        }
    }

    /// Submits a request and drives it as far as it can go without a human decision.
    ///
    /// A repeated `client_request_id` returns the stored request. Validation and policy
    /// failures persist the request as `Failed` and return the error; retryable failures
    /// persist nothing so the caller can resubmit with the same id.
    pub async fn submit(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        kind: ScheduleKind,
        input: SubmitScheduleRequestInput,
        client_request_id: Option<String>,
    ) -> AppResult<ScheduleRequest> {
        let client_request_id = client_request_id.filter(|value| !value.trim().is_empty());
        if let Some(existing) = self.find_by_client_id(provider, client_request_id.as_deref()).await? {
            return Ok(existing);
        }

        if !input.action.supports(kind) {
            return Err(AppError::Validation(format!(
                "action '{}' is not supported for {} requests",
                input.action,
                kind.as_str()
            )));
        }
        let mut schedule_info = input.schedule_info.unwrap_or(ScheduleInfo {
            start_date_time: None,
            recurrence: None,
            expiration: Expiration::never(),
        });
        schedule_info.validate()?;
        schedule_info.start_date_time = schedule_info.start_date_time.map(truncate_to_minute);
        schedule_info.expiration.end_date_time =
            schedule_info.expiration.end_date_time.map(truncate_to_minute);

        let triple = AssignmentTriple::new(
            input.principal_id.as_str(),
            input.role_definition_id.as_str(),
            input.scope.clone(),
        );
        let _guard = self.controller.lock(provider, &triple).await;
        if let Some(existing) = self.find_by_client_id(provider, client_request_id.as_deref()).await? {
            return Ok(existing);
        }

        let now = self.clock.now();
        let mut request = ScheduleRequest {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            action: input.action,
            principal_id: input.principal_id,
            role_definition_id: input.role_definition_id,
            scope: input.scope,
            justification: input.justification,
            ticket_info: input.ticket_info,
            schedule_info,
            target_schedule_id: input.target_schedule_id,
            activated_using_id: None,
            status: RequestStatus::Received,
            approval_id: None,
            is_validation_only: input.is_validation_only,
            created_date_time: now,
            completed_date_time: None,
            created_by: caller.principal_id().to_owned(),
            client_request_id,
            status_detail: None,
        };

        let validated = match self.validate(caller, provider, &mut request).await {
            Ok(validated) => validated,
            Err(error) if error.is_retryable() => return Err(error),
            Err(error) => return self.reject(caller, provider, request, error).await,
        };

        if request.is_validation_only {
            request.status = if validated.approval_required {
                RequestStatus::PendingApproval
            } else {
                RequestStatus::Granted
            };
            return Ok(request);
        }

        let mut batch = Batch::new(provider, now, caller.principal_id());
        if validated.approval_required {
            return self.await_approval(batch, request, validated).await;
        }

        let (before, after) = request.transition(RequestEvent::NoApprovalRequired, now)?;
        batch.request_transition(&request, before, after);
        self.provision(
            batch,
            GrantedRequest {
                request,
                target: validated.target,
                eligibility: validated.eligibility,
            },
        )
        .await
    }

    /// Returns one request; visible to its subject, its creator, its approvers and scope readers.
    pub async fn get_request(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        kind: ScheduleKind,
        request_id: &str,
    ) -> AppResult<ScheduleRequest> {
        let request = self.load_request(provider, kind, request_id).await?;
        if request.created_by == caller.principal_id() || request.principal_id == caller.principal_id() {
            return Ok(request);
        }
        if let Some(approval_id) = request.approval_id.as_deref()
            && let Some(approval) = self.schedules.find_approval(provider, approval_id).await?
            && approval.is_approver(caller.principal_id())
        {
            return Ok(request);
        }
        self.authorization
            .require_scope_read(provider, caller, &request.scope)
            .await?;

        Ok(request)
    }

    async fn find_by_client_id(
        &self,
        provider: RbacProvider,
        client_request_id: Option<&str>,
    ) -> AppResult<Option<ScheduleRequest>> {
        match client_request_id {
            Some(client_request_id) => {
                self.schedules
                    .find_request_by_client_id(provider, client_request_id)
                    .await
            }
            None => Ok(None),
        }
    }

    async fn load_request(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        request_id: &str,
    ) -> AppResult<ScheduleRequest> {
        self.schedules
            .find_request(provider, kind, request_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "{} schedule request '{request_id}' does not exist",
                    kind.as_str()
                ))
            })
    }

    async fn await_approval(
        &self,
        mut batch: Batch,
        mut request: ScheduleRequest,
        validated: validation::Validated,
    ) -> AppResult<ScheduleRequest> {
        let provider = batch.provider;
        let now = batch.now;
        let mut approval = ApprovalService::open_approval(
            &validated.policy,
            &request,
            validated.approver_ids,
            now,
        );
        let (before, after) = request.transition(RequestEvent::ApprovalRequired, now)?;
        request.approval_id = Some(approval.id.clone());
        batch.request_transition(&request, before, after);
        batch.commit.requests.push(request.clone());
        batch.commit.approvals.push(approval.clone());
        self.controller.commit_batch(batch).await?;

        if let Err(error) = self.approvals.notify(provider, &approval, &request).await {
            warn!(
                provider = %provider,
                request_id = %request.id,
                error = %error,
                "approval notification failed; failing request"
            );
            let mut batch = Batch::new(provider, self.clock.now(), request.created_by.as_str());
            let (before, after) = request.transition(RequestEvent::Fail, batch.now)?;
            request.status_detail = Some(StatusDetail::from_error(&error));
            request.client_request_id = None;
            approval.status = ApprovalStatus::Canceled;
            batch.request_transition(&request, before, after);
            batch.commit.requests.push(request);
            batch.commit.approvals.push(approval);
            self.controller.commit_batch(batch).await?;
            return Err(error);
        }

        info!(
            provider = %provider,
            request_id = %request.id,
            approval_id = %approval.id,
            approvers = approval.approver_ids.len(),
            "schedule request awaiting approval"
        );
        Ok(request)
    }

    /// Hands a granted request to the controller; a failed apply leaves the request `Failed`.
    async fn provision(&self, batch: Batch, granted: GrantedRequest) -> AppResult<ScheduleRequest> {
        let provider = batch.provider;
        let actor = batch.actor.clone();
        let prior_events = batch.events.clone();
        let prior_approvals = batch.commit.approvals.clone();
        let mut request = granted.request.clone();

        let error = match self.controller.apply(batch, granted).await {
            Ok(provisioned) => return Ok(provisioned),
            Err(error) => error,
        };

        let mut batch = Batch::new(provider, self.clock.now(), actor.as_str());
        batch.events = prior_events;
        batch.commit.approvals = prior_approvals;
        let (before, after) = request.transition(RequestEvent::Fail, batch.now)?;
        request.status_detail = Some(StatusDetail::from_error(&error));
        if error.is_retryable() {
            request.client_request_id = None;
        }
        batch.request_transition(&request, before, after);
        batch.commit.requests.push(request);
        if let Err(persist_error) = self.controller.commit_batch(batch).await {
            warn!(
                provider = %provider,
                error = %persist_error,
                "failed to persist failed schedule request"
            );
        }

        Err(error)
    }

    /// Persists a request that failed validation and returns the validation error.
    async fn reject(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        mut request: ScheduleRequest,
        error: AppError,
    ) -> AppResult<ScheduleRequest> {
        info!(
            provider = %provider,
            request_id = %request.id,
            principal_id = %request.principal_id,
            code = error.code(),
            "schedule request failed validation"
        );
        if request.is_validation_only {
            return Err(error);
        }

        let mut batch = Batch::new(provider, self.clock.now(), caller.principal_id());
        let (before, after) = request.transition(RequestEvent::ValidationFailed, batch.now)?;
        request.status_detail = Some(StatusDetail::from_error(&error));
        batch.request_transition(&request, before, after);
        batch.commit.requests.push(request);
        if let Err(persist_error) = self.controller.commit_batch(batch).await {
            warn!(
                provider = %provider,
                error = %persist_error,
                "failed to persist rejected schedule request"
            );
        }

        Err(error)
    }
}

#[cfg(test)]
mod tests;
