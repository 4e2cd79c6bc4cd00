use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_core::{AppError, AppResult};

use crate::duration::IsoDuration;
use crate::schedule::ScheduleKind;

/// Kind of configured approver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApproverKind {
    /// A single principal.
    Principal,
    /// Every member of a group.
    Group,
}

/// Approver entry of a role-management policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproverRef {
    /// Approver kind.
    pub kind: ApproverKind,
    /// Principal or group id.
    pub id: String,
}

/// Per-role-definition rules gating schedule requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleManagementPolicy {
    /// Role definition the policy applies to.
    pub role_definition_id: String,
    /// Whether activations need an approver decision.
    pub approval_required: bool,
    /// Configured approvers.
    #[serde(default)]
    pub approvers: Vec<ApproverRef>,
    /// Whether activations need a multi-factor authenticated caller.
    pub mfa_required: bool,
    /// Whether requests must carry a justification.
    pub justification_required: bool,
    /// Whether activations must reference a ticket.
    pub ticket_required: bool,
    /// Maximum activation length.
    pub maximum_duration: IsoDuration,
    /// Maximum administrative assignment or eligibility length; `None` allows permanent ones.
    #[serde(default)]
    pub maximum_assignment_duration: Option<IsoDuration>,
    /// How long a request may wait for a decision.
    pub approval_timeout: IsoDuration,
    /// How long after expiry a schedule may still be renewed.
    pub renewal_grace_period: IsoDuration,
}

impl RoleManagementPolicy {
    /// Policy applied to roles without an explicit one.
    #[must_use]
    pub fn default_for(role_definition_id: impl Into<String>) -> Self {
        Self {
            role_definition_id: role_definition_id.into(),
            approval_required: false,
            approvers: Vec::new(),
            mfa_required: false,
            justification_required: false,
            ticket_required: false,
            maximum_duration: IsoDuration::hours(8),
            maximum_assignment_duration: None,
            approval_timeout: IsoDuration::days(1),
            renewal_grace_period: IsoDuration::days(14),
        }
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> AppResult<()> {
        if self.approval_required && self.approvers.is_empty() {
            return Err(AppError::Validation(
                "approval-required policies must list at least one approver".to_owned(),
            ));
        }
        if self.maximum_duration.is_zero() || self.approval_timeout.is_zero() {
            return Err(AppError::Validation(
                "maximumDuration and approvalTimeout must be positive".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Status of an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalStatus {
    /// Waiting for a decision.
    InProgress,
    /// An approver approved.
    Approved,
    /// An approver denied.
    Denied,
    /// No decision arrived before the timeout.
    TimedOut,
    /// The request was canceled or failed while waiting.
    Canceled,
}

impl ApprovalStatus {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "InProgress",
            Self::Approved => "Approved",
            Self::Denied => "Denied",
            Self::TimedOut => "TimedOut",
            Self::Canceled => "Canceled",
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "InProgress" => Ok(Self::InProgress),
            "Approved" => Ok(Self::Approved),
            "Denied" => Ok(Self::Denied),
            "TimedOut" => Ok(Self::TimedOut),
            "Canceled" => Ok(Self::Canceled),
            _ => Err(AppError::Validation(format!(
                "unknown approval status '{value}'"
            ))),
        }
    }
}

/// Approver verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewResult {
    /// Approve the request.
    Approve,
    /// Deny the request.
    Deny,
}

/// Recorded approver decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    /// Approver principal id.
    pub approver_id: String,
    /// Verdict.
    pub review_result: ReviewResult,
    /// Approver justification.
    pub justification: Option<String>,
    /// Decision timestamp.
    pub reviewed_date_time: DateTime<Utc>,
}

/// Outcome of recording a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// The decision settled the approval.
    Recorded,
    /// The approval had already settled the same way.
    AlreadyRecorded,
}

/// Single-stage approval gating one schedule request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    /// Approval id.
    pub id: String,
    /// Gated request id.
    pub request_id: String,
    /// Kind of the gated request.
    pub request_kind: ScheduleKind,
    /// Approvers expanded when the approval opened.
    pub approver_ids: Vec<String>,
    /// Current status.
    pub status: ApprovalStatus,
    /// Recorded decisions.
    pub decisions: Vec<ApprovalDecision>,
    /// Open timestamp.
    pub created_date_time: DateTime<Utc>,
    /// Timeout instant.
    pub expires_date_time: DateTime<Utc>,
}

impl Approval {
    /// Returns whether the principal may decide.
    #[must_use]
    pub fn is_approver(&self, principal_id: &str) -> bool {
        self.approver_ids.iter().any(|id| id == principal_id)
    }

    /// Returns whether the approval waited past its timeout.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::InProgress && now >= self.expires_date_time
    }

    /// Records an approver decision; a repeat of the settled outcome is a no-op.
    pub fn record_decision(
        &mut self,
        approver_id: &str,
        review_result: ReviewResult,
        justification: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<DecisionOutcome> {
        if !self.is_approver(approver_id) {
            return Err(AppError::Forbidden(format!(
                "principal '{approver_id}' is not an approver of approval '{}'",
                self.id
            )));
        }

        let settled = match review_result {
            ReviewResult::Approve => ApprovalStatus::Approved,
            ReviewResult::Deny => ApprovalStatus::Denied,
        };
        if self.status == settled {
            return Ok(DecisionOutcome::AlreadyRecorded);
        }
        if self.status != ApprovalStatus::InProgress {
            return Err(AppError::Conflict(format!(
                "approval '{}' is already {}",
                self.id,
                self.status.as_str()
            )));
        }

        self.decisions.push(ApprovalDecision {
            approver_id: approver_id.to_owned(),
            review_result,
            justification,
            reviewed_date_time: now,
        });
        self.status = settled;

        Ok(DecisionOutcome::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use warden_core::AppError;

    use super::{Approval, ApprovalStatus, DecisionOutcome, ReviewResult};
    use crate::schedule::ScheduleKind;

    fn approval() -> Approval {
        let now = Utc::now();
        Approval {
            id: "approval-1".to_owned(),
            request_id: "request-1".to_owned(),
            request_kind: ScheduleKind::Assignment,
            approver_ids: vec!["alice".to_owned(), "bob".to_owned()],
            status: ApprovalStatus::InProgress,
            decisions: Vec::new(),
            created_date_time: now,
            expires_date_time: now + TimeDelta::days(1),
        }
    }

    #[test]
    fn repeated_decision_is_a_no_op() {
        let mut approval = approval();
        let now = Utc::now();

        let first = approval.record_decision("alice", ReviewResult::Approve, None, now);
        let second = approval.record_decision("alice", ReviewResult::Approve, None, now);
        let other = approval.record_decision("bob", ReviewResult::Approve, None, now);

        assert_eq!(first.ok(), Some(DecisionOutcome::Recorded));
        assert_eq!(second.ok(), Some(DecisionOutcome::AlreadyRecorded));
        assert_eq!(other.ok(), Some(DecisionOutcome::AlreadyRecorded));
        assert_eq!(approval.decisions.len(), 1);
    }

    #[test]
    fn contradicting_a_settled_approval_conflicts() {
        let mut approval = approval();
        let now = Utc::now();
        let _ = approval.record_decision("alice", ReviewResult::Deny, None, now);

        let result = approval.record_decision("bob", ReviewResult::Approve, None, now);

        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[test]
    fn non_approvers_are_forbidden() {
        let mut approval = approval();

        let result = approval.record_decision("mallory", ReviewResult::Approve, None, Utc::now());

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }
}
