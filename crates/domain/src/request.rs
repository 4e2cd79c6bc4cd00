use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_core::{AppError, AppResult};

use crate::schedule::ScheduleKind;
use crate::schedule_info::ScheduleInfo;
use crate::scope::{AssignmentTriple, RoleScope};

/// Operation a schedule request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RequestAction {
    /// Administrator creates a schedule.
    AdminAssign,
    /// Administrator revokes a schedule.
    AdminRemove,
    /// Administrator replaces a live schedule's window.
    AdminUpdate,
    /// Administrator prolongs a schedule before it expires.
    AdminExtend,
    /// Administrator renews a schedule inside its renewal grace window.
    AdminRenew,
    /// Principal activates an eligibility.
    SelfActivate,
    /// Principal ends its own activation or eligibility.
    SelfDeactivate,
    /// Principal asks to prolong its own schedule.
    SelfExtend,
    /// Principal asks to renew its own expired schedule.
    SelfRenew,
}

impl RequestAction {
    /// Returns the canonical wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdminAssign => "adminAssign",
            Self::AdminRemove => "adminRemove",
            Self::AdminUpdate => "adminUpdate",
            Self::AdminExtend => "adminExtend",
            Self::AdminRenew => "adminRenew",
            Self::SelfActivate => "selfActivate",
            Self::SelfDeactivate => "selfDeactivate",
            Self::SelfExtend => "selfExtend",
            Self::SelfRenew => "selfRenew",
        }
    }

    /// Self actions may only target the caller's own principal.
    #[must_use]
    pub fn is_self_service(&self) -> bool {
        matches!(
            self,
            Self::SelfActivate | Self::SelfDeactivate | Self::SelfExtend | Self::SelfRenew
        )
    }

    /// Actions that create a new schedule rather than act on an existing one.
    #[must_use]
    pub fn creates_schedule(&self) -> bool {
        matches!(self, Self::AdminAssign | Self::SelfActivate)
    }

    /// Actions that revoke an existing schedule.
    #[must_use]
    pub fn revokes_schedule(&self) -> bool {
        matches!(self, Self::AdminRemove | Self::SelfDeactivate)
    }

    /// Actions that lengthen an existing schedule.
    #[must_use]
    pub fn prolongs_schedule(&self) -> bool {
        matches!(
            self,
            Self::AdminExtend | Self::AdminRenew | Self::SelfExtend | Self::SelfRenew
        )
    }

    /// Returns whether the action applies to the given schedule kind.
    #[must_use]
    pub fn supports(&self, kind: ScheduleKind) -> bool {
        !matches!(
            (self, kind),
            (Self::SelfActivate, ScheduleKind::Eligibility)
        )
    }
}

impl Display for RequestAction {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for RequestAction {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "adminAssign" => Ok(Self::AdminAssign),
            "adminRemove" => Ok(Self::AdminRemove),
            "adminUpdate" => Ok(Self::AdminUpdate),
            "adminExtend" => Ok(Self::AdminExtend),
            "adminRenew" => Ok(Self::AdminRenew),
            "selfActivate" | "activate" => Ok(Self::SelfActivate),
            "selfDeactivate" | "deactivate" => Ok(Self::SelfDeactivate),
            "selfExtend" => Ok(Self::SelfExtend),
            "selfRenew" => Ok(Self::SelfRenew),
            _ => Err(AppError::Validation(format!(
                "unknown schedule request action '{value}'"
            ))),
        }
    }
}

impl TryFrom<String> for RequestAction {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(value.as_str())
    }
}

impl From<RequestAction> for String {
    fn from(value: RequestAction) -> Self {
        value.as_str().to_owned()
    }
}

/// Status of a schedule request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Accepted and awaiting validation.
    Received,
    /// Waiting for an approver decision.
    PendingApproval,
    /// Approved or approval-free; about to be applied.
    Granted,
    /// Rejected by an approver or by approval timeout.
    Denied,
    /// Applied to the schedule store.
    Provisioned,
    /// The schedule it created reached its expiry.
    Expired,
    /// The schedule it created was revoked.
    Revoked,
    /// Withdrawn by its issuer before being applied.
    Canceled,
    /// Failed validation or could not be applied.
    Failed,
}

impl RequestStatus {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "Received",
            Self::PendingApproval => "PendingApproval",
            Self::Granted => "Granted",
            Self::Denied => "Denied",
            Self::Provisioned => "Provisioned",
            Self::Expired => "Expired",
            Self::Revoked => "Revoked",
            Self::Canceled => "Canceled",
            Self::Failed => "Failed",
        }
    }

    /// Statuses whose request is immutable apart from metadata correction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Denied | Self::Expired | Self::Revoked | Self::Canceled | Self::Failed
        )
    }

    /// Statuses that still block other requests on the same triple.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Received | Self::PendingApproval | Self::Granted)
    }
}

impl FromStr for RequestStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Received" => Ok(Self::Received),
            "PendingApproval" => Ok(Self::PendingApproval),
            "Granted" => Ok(Self::Granted),
            "Denied" => Ok(Self::Denied),
            "Provisioned" => Ok(Self::Provisioned),
            "Expired" => Ok(Self::Expired),
            "Revoked" => Ok(Self::Revoked),
            "Canceled" => Ok(Self::Canceled),
            "Failed" => Ok(Self::Failed),
            _ => Err(AppError::Validation(format!(
                "unknown request status '{value}'"
            ))),
        }
    }
}

/// Event driving the request state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestEvent {
    /// Validation passed and the policy needs no approval.
    NoApprovalRequired,
    /// Validation passed and the policy needs approval.
    ApprovalRequired,
    /// Validation failed.
    ValidationFailed,
    /// An authorized approver approved.
    Approve,
    /// An authorized approver denied.
    Deny,
    /// The approval window elapsed without a decision.
    ApprovalTimedOut,
    /// The issuer canceled.
    Cancel,
    /// The controller wrote the schedule change.
    Apply,
    /// The request could not be carried out.
    Fail,
    /// The schedule reached its expiry.
    ExpiryReached,
    /// The schedule was revoked.
    Revoke,
}

const TRANSITIONS: &[(RequestStatus, RequestEvent, RequestStatus)] = &[
    (RequestStatus::Received, RequestEvent::NoApprovalRequired, RequestStatus::Granted),
    (RequestStatus::Received, RequestEvent::ApprovalRequired, RequestStatus::PendingApproval),
    (RequestStatus::Received, RequestEvent::ValidationFailed, RequestStatus::Failed),
    (RequestStatus::Received, RequestEvent::Cancel, RequestStatus::Canceled),
    (RequestStatus::PendingApproval, RequestEvent::Approve, RequestStatus::Granted),
    (RequestStatus::PendingApproval, RequestEvent::Deny, RequestStatus::Denied),
    (RequestStatus::PendingApproval, RequestEvent::ApprovalTimedOut, RequestStatus::Denied),
    (RequestStatus::PendingApproval, RequestEvent::Cancel, RequestStatus::Canceled),
    (RequestStatus::PendingApproval, RequestEvent::Fail, RequestStatus::Failed),
    (RequestStatus::Granted, RequestEvent::Apply, RequestStatus::Provisioned),
    (RequestStatus::Granted, RequestEvent::Fail, RequestStatus::Failed),
    (RequestStatus::Provisioned, RequestEvent::ExpiryReached, RequestStatus::Expired),
    (RequestStatus::Provisioned, RequestEvent::Cancel, RequestStatus::Revoked),
    (RequestStatus::Provisioned, RequestEvent::Revoke, RequestStatus::Revoked),
];

/// Looks up the transition table; unknown transitions are rejected.
pub fn next_status(from: RequestStatus, event: RequestEvent) -> AppResult<RequestStatus> {
    TRANSITIONS
        .iter()
        .find(|(source, trigger, _)| *source == from && *trigger == event)
        .map(|(_, _, target)| *target)
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "request in status '{}' does not accept {event:?}",
                from.as_str()
            ))
        })
}

/// External ticket referenced by a request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketInfo {
    /// Ticket number.
    #[serde(default)]
    pub ticket_number: Option<String>,
    /// Ticketing system.
    #[serde(default)]
    pub ticket_system: Option<String>,
}

impl TicketInfo {
    /// Returns whether a ticket number is present.
    #[must_use]
    pub fn has_ticket_number(&self) -> bool {
        self.ticket_number
            .as_deref()
            .is_some_and(|value| !value.trim().is_empty())
    }
}

/// Machine-readable reason attached to a failed or denied request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetail {
    /// Domain error code.
    pub code: String,
    /// Human readable message.
    pub message: String,
}

impl StatusDetail {
    /// Captures an application error.
    #[must_use]
    pub fn from_error(error: &AppError) -> Self {
        Self {
            code: error.code().to_owned(),
            message: error.detail().to_owned(),
        }
    }
}

/// User or administrator proposal to create, modify or end a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    /// Request id.
    pub id: String,
    /// Assignment or eligibility request.
    #[serde(skip)]
    pub kind: ScheduleKind,
    /// Requested operation.
    pub action: RequestAction,
    /// Principal the request is about.
    pub principal_id: String,
    /// Role definition id.
    pub role_definition_id: String,
    /// Scope of the holding.
    #[serde(flatten)]
    pub scope: RoleScope,
    /// Business justification.
    pub justification: Option<String>,
    /// External ticket.
    pub ticket_info: Option<TicketInfo>,
    /// Requested window.
    pub schedule_info: ScheduleInfo,
    /// Schedule the request acts on, or the schedule it created.
    pub target_schedule_id: Option<String>,
    /// Eligibility schedule backing a `selfActivate`.
    pub activated_using_id: Option<String>,
    /// Current status.
    pub status: RequestStatus,
    /// Approval gating the request.
    pub approval_id: Option<String>,
    /// Whether the request was only validated.
    pub is_validation_only: bool,
    /// Submission timestamp.
    pub created_date_time: DateTime<Utc>,
    /// Timestamp of reaching `Provisioned` or a terminal status.
    pub completed_date_time: Option<DateTime<Utc>>,
    /// Principal that submitted the request.
    pub created_by: String,
    /// Client-supplied idempotency id.
    #[serde(skip)]
    pub client_request_id: Option<String>,
    /// Reason for `Failed` and timed-out `Denied` outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<StatusDetail>,
}

impl ScheduleRequest {
    /// Returns the serialization triple of the request.
    #[must_use]
    pub fn triple(&self) -> AssignmentTriple {
        AssignmentTriple::new(
            self.principal_id.as_str(),
            self.role_definition_id.as_str(),
            self.scope.clone(),
        )
    }

    /// Applies one state-machine event and returns `(before, after)`.
    pub fn transition(
        &mut self,
        event: RequestEvent,
        now: DateTime<Utc>,
    ) -> AppResult<(RequestStatus, RequestStatus)> {
        let before = self.status;
        let after = next_status(before, event)?;
        self.status = after;
        if after == RequestStatus::Provisioned || after.is_terminal() {
            self.completed_date_time = Some(now);
        }

        Ok((before, after))
    }

    /// Administrative correction of metadata, the only change allowed on terminal requests.
    pub fn correct_metadata(
        &mut self,
        justification: Option<String>,
        ticket_info: Option<TicketInfo>,
    ) -> AppResult<()> {
        if justification.is_none() && ticket_info.is_none() {
            return Err(AppError::Validation(
                "metadata correction must set justification or ticketInfo".to_owned(),
            ));
        }
        if justification.is_some() {
            self.justification = justification;
        }
        if ticket_info.is_some() {
            self.ticket_info = ticket_info;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use warden_core::AppError;

    use super::{RequestAction, RequestEvent, RequestStatus, next_status};

    #[test]
    fn legacy_action_names_are_aliases() {
        assert_eq!(
            RequestAction::from_str("activate").ok(),
            Some(RequestAction::SelfActivate)
        );
        assert_eq!(
            RequestAction::from_str("deactivate").ok(),
            Some(RequestAction::SelfDeactivate)
        );
        assert_eq!(RequestAction::SelfActivate.as_str(), "selfActivate");
    }

    #[test]
    fn approval_path_reaches_provisioned() {
        let pending = next_status(RequestStatus::Received, RequestEvent::ApprovalRequired);
        assert_eq!(pending.ok(), Some(RequestStatus::PendingApproval));
        let granted = next_status(RequestStatus::PendingApproval, RequestEvent::Approve);
        assert_eq!(granted.ok(), Some(RequestStatus::Granted));
        let provisioned = next_status(RequestStatus::Granted, RequestEvent::Apply);
        assert_eq!(provisioned.ok(), Some(RequestStatus::Provisioned));
    }

    #[test]
    fn unknown_transitions_are_rejected() {
        assert!(matches!(
            next_status(RequestStatus::Denied, RequestEvent::Approve),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            next_status(RequestStatus::Granted, RequestEvent::Cancel),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            next_status(RequestStatus::Expired, RequestEvent::Revoke),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn canceling_a_provisioned_request_revokes_it() {
        assert_eq!(
            next_status(RequestStatus::Provisioned, RequestEvent::Cancel).ok(),
            Some(RequestStatus::Revoked)
        );
    }

    #[test]
    fn approval_timeout_denies() {
        assert_eq!(
            next_status(RequestStatus::PendingApproval, RequestEvent::ApprovalTimedOut).ok(),
            Some(RequestStatus::Denied)
        );
    }
}
