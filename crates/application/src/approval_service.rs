use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use warden_core::{AppError, AppResult, CallerIdentity, RbacProvider};
use warden_domain::{
    Approval, ApprovalStatus, ApproverKind, InstanceWindow, RequestAction, RoleManagementPolicy,
    RoleScope, ScheduleRequest,
};

use crate::authorization_service::AuthorizationService;
use crate::directory_service::DirectoryService;
use crate::role_definition_registry::RoleDefinitionRegistry;
use crate::role_management_ports::{
    ApprovalNotification, ApprovalNotifier, EngineSettings, PolicyRepository,
};

/// Approval engine: per-role policies, approver resolution and notification.
#[derive(Clone)]
pub struct ApprovalService {
    policies: Arc<dyn PolicyRepository>,
    notifier: Arc<dyn ApprovalNotifier>,
    registry: RoleDefinitionRegistry,
    directory: DirectoryService,
    authorization: AuthorizationService,
    settings: EngineSettings,
}

impl ApprovalService {
    /// Creates an approval service.
    #[must_use]
    pub fn new(
        policies: Arc<dyn PolicyRepository>,
        notifier: Arc<dyn ApprovalNotifier>,
        registry: RoleDefinitionRegistry,
        directory: DirectoryService,
        authorization: AuthorizationService,
        settings: EngineSettings,
    ) -> Self {
        Self {
            policies,
            notifier,
            registry,
            directory,
            authorization,
            settings,
        }
    }

    /// Returns the stored policy of the role, or the default policy.
    pub async fn policy_for(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
    ) -> AppResult<RoleManagementPolicy> {
        Ok(self
            .policies
            .find_policy(provider, role_definition_id)
            .await?
            .unwrap_or_else(|| RoleManagementPolicy::default_for(role_definition_id)))
    }

    /// Stores the policy of an existing role.
    pub async fn save_policy(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        policy: RoleManagementPolicy,
    ) -> AppResult<RoleManagementPolicy> {
        self.authorization
            .require_role_management(provider, caller, &RoleScope::root())
            .await?;
        policy.validate()?;
        self.registry
            .find(provider, policy.role_definition_id.as_str())
            .await?;

        self.policies.save_policy(provider, policy.clone()).await?;
        info!(
            provider = %provider,
            role_definition_id = %policy.role_definition_id,
            approval_required = policy.approval_required,
            "role management policy saved"
        );

        Ok(policy)
    }

    /// Principals allowed to decide the request, never including its creator.
    ///
    /// Falls back to role managers over the request scope when the policy names nobody.
    pub async fn approvers_for(
        &self,
        provider: RbacProvider,
        policy: &RoleManagementPolicy,
        request: &ScheduleRequest,
    ) -> AppResult<Vec<String>> {
        let mut approvers = BTreeSet::new();
        for approver in &policy.approvers {
            match approver.kind {
                ApproverKind::Principal => {
                    approvers.insert(approver.id.clone());
                }
                ApproverKind::Group => {
                    approvers.extend(self.directory.expand_members(approver.id.as_str()).await?);
                }
            }
        }
        if approvers.is_empty() {
            approvers = self
                .authorization
                .list_role_managers(provider, &request.scope)
                .await?;
        }

        approvers.remove(request.created_by.as_str());
        approvers.remove(request.principal_id.as_str());
        if approvers.is_empty() {
            return Err(AppError::PolicyDenied(format!(
                "no approver other than the requester can decide requests for role '{}'",
                request.role_definition_id
            )));
        }

        Ok(approvers.into_iter().collect())
    }

    /// Builds the in-progress approval gating the request.
    #[must_use]
    pub fn open_approval(
        policy: &RoleManagementPolicy,
        request: &ScheduleRequest,
        approver_ids: Vec<String>,
        now: DateTime<Utc>,
    ) -> Approval {
        Approval {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            request_kind: request.kind,
            approver_ids,
            status: ApprovalStatus::InProgress,
            decisions: Vec::new(),
            created_date_time: now,
            expires_date_time: now + policy.approval_timeout.to_time_delta(),
        }
    }

    /// Delivers the approval to its approvers within the notification timeout.
    pub async fn notify(
        &self,
        provider: RbacProvider,
        approval: &Approval,
        request: &ScheduleRequest,
    ) -> AppResult<()> {
        let notification = ApprovalNotification {
            provider,
            approval_id: approval.id.clone(),
            request_id: request.id.clone(),
            request_kind: request.kind,
            action: request.action,
            principal_id: request.principal_id.clone(),
            role_definition_id: request.role_definition_id.clone(),
            approver_ids: approval.approver_ids.clone(),
            justification: request.justification.clone(),
            expires_date_time: approval.expires_date_time,
        };

        match tokio::time::timeout(
            self.settings.notify_timeout,
            self.notifier.notify_approvers(&notification),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    provider = %provider,
                    approval_id = %approval.id,
                    request_id = %request.id,
                    "approval notification timed out"
                );
                Err(AppError::TimedOut(format!(
                    "notifying approvers of approval '{}' timed out",
                    approval.id
                )))
            }
        }
    }
}

/// Checks the request against the role policy and returns whether approval is required.
///
/// `window` is the window the request would leave the schedule with.
pub fn evaluate_policy(
    policy: &RoleManagementPolicy,
    request: &ScheduleRequest,
    caller: &CallerIdentity,
    window: &InstanceWindow,
) -> AppResult<bool> {
    let action = request.action;
    let grants_time = action.creates_schedule() || action.prolongs_schedule();
    if !grants_time && action != RequestAction::AdminUpdate {
        return Ok(false);
    }

    if policy.justification_required
        && request
            .justification
            .as_deref()
            .is_none_or(|value| value.trim().is_empty())
    {
        return Err(AppError::PolicyDenied(format!(
            "role '{}' requires a justification",
            policy.role_definition_id
        )));
    }

    if action.is_self_service() {
        if policy.mfa_required && !caller.mfa_satisfied() {
            return Err(AppError::PolicyDenied(format!(
                "role '{}' requires multi-factor authentication",
                policy.role_definition_id
            )));
        }
        if policy.ticket_required
            && !request
                .ticket_info
                .as_ref()
                .is_some_and(|ticket| ticket.has_ticket_number())
        {
            return Err(AppError::PolicyDenied(format!(
                "role '{}' requires ticket information",
                policy.role_definition_id
            )));
        }
        ensure_within(window, policy.maximum_duration.to_time_delta(), "maximumDuration")?;
    } else if let Some(maximum) = policy.maximum_assignment_duration {
        ensure_within(window, maximum.to_time_delta(), "maximumAssignmentDuration")?;
    }

    Ok(match action {
        RequestAction::SelfActivate => policy.approval_required,
        RequestAction::SelfExtend | RequestAction::SelfRenew => true,
        _ => false,
    })
}

fn ensure_within(window: &InstanceWindow, maximum: chrono::TimeDelta, label: &str) -> AppResult<()> {
    let Some(end) = window.end_date_time else {
        return Err(AppError::PolicyDenied(format!(
            "noExpiration exceeds the policy {label}"
        )));
    };
    if end - window.start_date_time > maximum {
        return Err(AppError::PolicyDenied(format!(
            "requested duration exceeds the policy {label} of {} minutes",
            maximum.num_minutes()
        )));
    }

    Ok(())
}
