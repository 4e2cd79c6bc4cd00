use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_core::AppError;

use crate::materialize::InstanceWindow;
use crate::schedule_info::ScheduleInfo;
use crate::scope::{AssignmentTriple, RoleScope};

/// Whether a schedule grants the role or the right to activate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScheduleKind {
    /// Role assignment schedules and requests.
    Assignment,
    /// Role eligibility schedules and requests.
    Eligibility,
}

impl ScheduleKind {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assignment => "assignment",
            Self::Eligibility => "eligibility",
        }
    }
}

impl FromStr for ScheduleKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "assignment" => Ok(Self::Assignment),
            "eligibility" => Ok(Self::Eligibility),
            _ => Err(AppError::Validation(format!(
                "unknown schedule kind '{value}'"
            ))),
        }
    }
}

/// How an assignment schedule came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignmentType {
    /// Assigned directly by an administrator.
    Assigned,
    /// Activated by the principal from an eligibility.
    Activated,
}

impl AssignmentType {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "Assigned",
            Self::Activated => "Activated",
        }
    }
}

impl FromStr for AssignmentType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Assigned" => Ok(Self::Assigned),
            "Activated" => Ok(Self::Activated),
            _ => Err(AppError::Validation(format!(
                "unknown assignment type '{value}'"
            ))),
        }
    }
}

/// Lifecycle status of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleStatus {
    /// Live and producing instances.
    Provisioned,
    /// Terminated by removal or cancellation.
    Revoked,
    /// Terminated by reaching its expiry.
    Expired,
    /// Live after an update, extension or renewal.
    UpdateApplied,
    /// Provisioning failed.
    Failed,
}

impl ScheduleStatus {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioned => "Provisioned",
            Self::Revoked => "Revoked",
            Self::Expired => "Expired",
            Self::UpdateApplied => "UpdateApplied",
            Self::Failed => "Failed",
        }
    }

    /// Live schedules produce instances.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Provisioned | Self::UpdateApplied)
    }
}

impl FromStr for ScheduleStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Provisioned" => Ok(Self::Provisioned),
            "Revoked" => Ok(Self::Revoked),
            "Expired" => Ok(Self::Expired),
            "UpdateApplied" => Ok(Self::UpdateApplied),
            "Failed" => Ok(Self::Failed),
            _ => Err(AppError::Validation(format!(
                "unknown schedule status '{value}'"
            ))),
        }
    }
}

/// How the principal receives the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberType {
    /// Held by the principal itself.
    Direct,
    /// Held through a group.
    Group,
    /// Held through an inherited scope.
    Inherited,
}

impl MemberType {
    /// Returns a stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "Direct",
            Self::Group => "Group",
            Self::Inherited => "Inherited",
        }
    }
}

impl FromStr for MemberType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Direct" => Ok(Self::Direct),
            "Group" => Ok(Self::Group),
            "Inherited" => Ok(Self::Inherited),
            _ => Err(AppError::Validation(format!(
                "unknown member type '{value}'"
            ))),
        }
    }
}

/// Time-bounded or recurring binding of principal, role and scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSchedule {
    /// Schedule id.
    pub id: String,
    /// Assignment or eligibility.
    #[serde(skip)]
    pub kind: ScheduleKind,
    /// Principal holding the role.
    pub principal_id: String,
    /// Role definition id.
    pub role_definition_id: String,
    /// Scope of the holding.
    #[serde(flatten)]
    pub scope: RoleScope,
    /// Id of the request that created the schedule.
    pub created_using: String,
    /// Creation timestamp.
    pub created_date_time: DateTime<Utc>,
    /// Last modification timestamp.
    pub modified_date_time: DateTime<Utc>,
    /// Lifecycle status.
    pub status: ScheduleStatus,
    /// How the principal receives the role.
    pub member_type: MemberType,
    /// Anchored schedule window; `startDateTime` is always set.
    pub schedule_info: ScheduleInfo,
    /// Assignment type; assignment schedules only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_type: Option<AssignmentType>,
    /// Eligibility schedule the activation derived from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_using_id: Option<String>,
}

impl RoleSchedule {
    /// Returns the serialization triple of the schedule.
    #[must_use]
    pub fn triple(&self) -> AssignmentTriple {
        AssignmentTriple::new(
            self.principal_id.as_str(),
            self.role_definition_id.as_str(),
            self.scope.clone(),
        )
    }

    /// Overall window of the schedule.
    #[must_use]
    pub fn window(&self) -> InstanceWindow {
        let (start, end) = self.schedule_info.window(self.created_date_time);
        InstanceWindow {
            start_date_time: start,
            end_date_time: end,
        }
    }

    /// Returns whether the schedule is an activation of an eligibility.
    #[must_use]
    pub fn is_activation(&self) -> bool {
        self.assignment_type == Some(AssignmentType::Activated)
    }
}

/// A concrete active window of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInstance {
    /// Deterministic instance id derived from the schedule id and window start.
    pub id: String,
    /// Assignment or eligibility.
    #[serde(skip)]
    pub kind: ScheduleKind,
    /// Principal holding the role.
    pub principal_id: String,
    /// Role definition id.
    pub role_definition_id: String,
    /// Scope of the holding.
    #[serde(flatten)]
    pub scope: RoleScope,
    /// Window start.
    pub start_date_time: DateTime<Utc>,
    /// Window end; `None` is open-ended.
    pub end_date_time: Option<DateTime<Utc>>,
    /// How the principal receives the role.
    pub member_type: MemberType,
    /// Schedule that produced the instance.
    pub role_assignment_origin_id: String,
    /// Assignment type; assignment instances only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_type: Option<AssignmentType>,
    /// Eligibility instance the activation derived from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_using_id: Option<String>,
}

impl ScheduleInstance {
    /// Builds the instance of `schedule` covering `window`.
    #[must_use]
    pub fn for_window(
        schedule: &RoleSchedule,
        window: InstanceWindow,
        activated_using_id: Option<String>,
    ) -> Self {
        Self {
            id: instance_id(schedule.id.as_str(), window.start_date_time),
            kind: schedule.kind,
            principal_id: schedule.principal_id.clone(),
            role_definition_id: schedule.role_definition_id.clone(),
            scope: schedule.scope.clone(),
            start_date_time: window.start_date_time,
            end_date_time: window.end_date_time,
            member_type: schedule.member_type,
            role_assignment_origin_id: schedule.id.clone(),
            assignment_type: schedule.assignment_type,
            activated_using_id,
        }
    }

    /// Returns the instance window.
    #[must_use]
    pub fn window(&self) -> InstanceWindow {
        InstanceWindow {
            start_date_time: self.start_date_time,
            end_date_time: self.end_date_time,
        }
    }

    /// Returns whether the instance is active at `now`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.window().contains(now)
    }

    /// Returns the serialization triple of the instance.
    #[must_use]
    pub fn triple(&self) -> AssignmentTriple {
        AssignmentTriple::new(
            self.principal_id.as_str(),
            self.role_definition_id.as_str(),
            self.scope.clone(),
        )
    }
}

/// Stable instance id; re-materializing the same window yields the same id.
#[must_use]
pub fn instance_id(schedule_id: &str, start: DateTime<Utc>) -> String {
    format!("{schedule_id}-{}", start.timestamp().div_euclid(60))
}

/// Persistent (non-time-bound) binding of principal, role and scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    /// Assignment id.
    pub id: String,
    /// Principal holding the role.
    pub principal_id: String,
    /// Role definition id.
    pub role_definition_id: String,
    /// Scope of the holding.
    #[serde(flatten)]
    pub scope: RoleScope,
    /// Optional attribute condition.
    pub condition: Option<String>,
    /// Creation timestamp.
    pub created_date_time: DateTime<Utc>,
    /// Schedule that provisioned the assignment, when it was not created directly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
}

impl RoleAssignment {
    /// Returns the uniqueness triple.
    #[must_use]
    pub fn triple(&self) -> AssignmentTriple {
        AssignmentTriple::new(
            self.principal_id.as_str(),
            self.role_definition_id.as_str(),
            self.scope.clone(),
        )
    }
}
