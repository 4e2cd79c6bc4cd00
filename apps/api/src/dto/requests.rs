use serde::Deserialize;
use warden_application::SubmitScheduleRequestInput;
use warden_core::AppError;
use warden_domain::{RequestAction, ReviewResult, RoleScope, ScheduleInfo, TicketInfo};

/// Body of a schedule request submission.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScheduleRequestRequest {
    pub action: RequestAction,
    pub principal_id: String,
    pub role_definition_id: String,
    #[serde(default)]
    pub directory_scope_id: Option<String>,
    #[serde(default)]
    pub app_scope_id: Option<String>,
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub ticket_info: Option<TicketInfo>,
    #[serde(default)]
    pub schedule_info: Option<ScheduleInfo>,
    #[serde(default)]
    pub target_schedule_id: Option<String>,
    #[serde(default)]
    pub is_validation_only: bool,
}

impl TryFrom<SubmitScheduleRequestRequest> for SubmitScheduleRequestInput {
    type Error = AppError;

    fn try_from(value: SubmitScheduleRequestRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            action: value.action,
            principal_id: value.principal_id,
            role_definition_id: value.role_definition_id,
            scope: RoleScope::from_parts(value.directory_scope_id, value.app_scope_id)?,
            justification: value.justification,
            ticket_info: value.ticket_info,
            schedule_info: value.schedule_info,
            target_schedule_id: value.target_schedule_id,
            is_validation_only: value.is_validation_only,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectRequestMetadataRequest {
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub ticket_info: Option<TicketInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecisionRequest {
    pub review_result: ReviewResult,
    #[serde(default)]
    pub justification: Option<String>,
}
