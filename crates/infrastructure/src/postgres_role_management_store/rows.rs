use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::types::Json;
use warden_core::{AppError, AppResult};
use warden_domain::{
    Approval, ApprovalDecision, RoleAssignment, RoleDefinition, RolePermission, RoleSchedule,
    ScheduleInfo, ScheduleInstance, ScheduleRequest, StatusDetail, TicketInfo,
};

use super::{parse_column, scope_from_columns};

#[derive(Debug, FromRow)]
pub(super) struct RoleDefinitionRow {
    pub(super) id: String,
    pub(super) display_name: String,
    pub(super) description: String,
    pub(super) is_built_in: bool,
    pub(super) is_enabled: bool,
    pub(super) template_id: String,
    pub(super) version: i32,
    pub(super) role_permissions: Json<Vec<RolePermission>>,
    pub(super) parent_ids: Vec<String>,
    pub(super) created_date_time: DateTime<Utc>,
    pub(super) modified_date_time: DateTime<Utc>,
}

impl TryFrom<RoleDefinitionRow> for RoleDefinition {
    type Error = AppError;

    fn try_from(row: RoleDefinitionRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            display_name: row.display_name,
            description: row.description,
            is_built_in: row.is_built_in,
            is_enabled: row.is_enabled,
            template_id: row.template_id,
            version: u32::try_from(row.version).map_err(|error| {
                AppError::Internal(format!("invalid stored role definition version: {error}"))
            })?,
            role_permissions: row.role_permissions.0,
            inherits_permissions_from: row.parent_ids.into_iter().collect(),
            created_date_time: row.created_date_time,
            modified_date_time: row.modified_date_time,
        })
    }
}

#[derive(Debug, FromRow)]
pub(super) struct RoleAssignmentRow {
    pub(super) id: String,
    pub(super) principal_id: String,
    pub(super) role_definition_id: String,
    pub(super) directory_scope_id: Option<String>,
    pub(super) app_scope_id: Option<String>,
    pub(super) condition: Option<String>,
    pub(super) created_date_time: DateTime<Utc>,
    pub(super) schedule_id: Option<String>,
}

impl TryFrom<RoleAssignmentRow> for RoleAssignment {
    type Error = AppError;

    fn try_from(row: RoleAssignmentRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            principal_id: row.principal_id,
            role_definition_id: row.role_definition_id,
            scope: scope_from_columns(row.directory_scope_id, row.app_scope_id)?,
            condition: row.condition,
            created_date_time: row.created_date_time,
            schedule_id: row.schedule_id,
        })
    }
}

#[derive(Debug, FromRow)]
pub(super) struct ScheduleRow {
    pub(super) kind: String,
    pub(super) id: String,
    pub(super) principal_id: String,
    pub(super) role_definition_id: String,
    pub(super) directory_scope_id: Option<String>,
    pub(super) app_scope_id: Option<String>,
    pub(super) created_using: String,
    pub(super) created_date_time: DateTime<Utc>,
    pub(super) modified_date_time: DateTime<Utc>,
    pub(super) status: String,
    pub(super) member_type: String,
    pub(super) schedule_info: Json<ScheduleInfo>,
    pub(super) assignment_type: Option<String>,
    pub(super) activated_using_id: Option<String>,
}

impl TryFrom<ScheduleRow> for RoleSchedule {
    type Error = AppError;

    fn try_from(row: ScheduleRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            kind: parse_column("schedule kind", row.kind.as_str())?,
            principal_id: row.principal_id,
            role_definition_id: row.role_definition_id,
            scope: scope_from_columns(row.directory_scope_id, row.app_scope_id)?,
            created_using: row.created_using,
            created_date_time: row.created_date_time,
            modified_date_time: row.modified_date_time,
            status: parse_column("schedule status", row.status.as_str())?,
            member_type: parse_column("member type", row.member_type.as_str())?,
            schedule_info: row.schedule_info.0,
            assignment_type: row
                .assignment_type
                .as_deref()
                .map(|value| parse_column("assignment type", value))
                .transpose()?,
            activated_using_id: row.activated_using_id,
        })
    }
}

#[derive(Debug, FromRow)]
pub(super) struct InstanceRow {
    pub(super) kind: String,
    pub(super) id: String,
    pub(super) schedule_id: String,
    pub(super) principal_id: String,
    pub(super) role_definition_id: String,
    pub(super) directory_scope_id: Option<String>,
    pub(super) app_scope_id: Option<String>,
    pub(super) start_date_time: DateTime<Utc>,
    pub(super) end_date_time: Option<DateTime<Utc>>,
    pub(super) member_type: String,
    pub(super) assignment_type: Option<String>,
    pub(super) activated_using_id: Option<String>,
}

impl TryFrom<InstanceRow> for ScheduleInstance {
    type Error = AppError;

    fn try_from(row: InstanceRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            kind: parse_column("schedule kind", row.kind.as_str())?,
            principal_id: row.principal_id,
            role_definition_id: row.role_definition_id,
            scope: scope_from_columns(row.directory_scope_id, row.app_scope_id)?,
            start_date_time: row.start_date_time,
            end_date_time: row.end_date_time,
            member_type: parse_column("member type", row.member_type.as_str())?,
            role_assignment_origin_id: row.schedule_id,
            assignment_type: row
                .assignment_type
                .as_deref()
                .map(|value| parse_column("assignment type", value))
                .transpose()?,
            activated_using_id: row.activated_using_id,
        })
    }
}

#[derive(Debug, FromRow)]
pub(super) struct RequestRow {
    pub(super) kind: String,
    pub(super) id: String,
    pub(super) action: String,
    pub(super) principal_id: String,
    pub(super) role_definition_id: String,
    pub(super) directory_scope_id: Option<String>,
    pub(super) app_scope_id: Option<String>,
    pub(super) justification: Option<String>,
    pub(super) ticket_info: Option<Json<TicketInfo>>,
    pub(super) schedule_info: Json<ScheduleInfo>,
    pub(super) target_schedule_id: Option<String>,
    pub(super) activated_using_id: Option<String>,
    pub(super) status: String,
    pub(super) approval_id: Option<String>,
    pub(super) is_validation_only: bool,
    pub(super) created_date_time: DateTime<Utc>,
    pub(super) completed_date_time: Option<DateTime<Utc>>,
    pub(super) created_by: String,
    pub(super) client_request_id: Option<String>,
    pub(super) status_detail: Option<Json<StatusDetail>>,
}

impl TryFrom<RequestRow> for ScheduleRequest {
    type Error = AppError;

    fn try_from(row: RequestRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            kind: parse_column("schedule kind", row.kind.as_str())?,
            action: parse_column("request action", row.action.as_str())?,
            principal_id: row.principal_id,
            role_definition_id: row.role_definition_id,
            scope: scope_from_columns(row.directory_scope_id, row.app_scope_id)?,
            justification: row.justification,
            ticket_info: row.ticket_info.map(|ticket| ticket.0),
            schedule_info: row.schedule_info.0,
            target_schedule_id: row.target_schedule_id,
            activated_using_id: row.activated_using_id,
            status: parse_column("request status", row.status.as_str())?,
            approval_id: row.approval_id,
            is_validation_only: row.is_validation_only,
            created_date_time: row.created_date_time,
            completed_date_time: row.completed_date_time,
            created_by: row.created_by,
            client_request_id: row.client_request_id,
            status_detail: row.status_detail.map(|detail| detail.0),
        })
    }
}

#[derive(Debug, FromRow)]
pub(super) struct ApprovalRow {
    pub(super) id: String,
    pub(super) request_id: String,
    pub(super) request_kind: String,
    pub(super) approver_ids: Vec<String>,
    pub(super) status: String,
    pub(super) decisions: Json<Vec<ApprovalDecision>>,
    pub(super) created_date_time: DateTime<Utc>,
    pub(super) expires_date_time: DateTime<Utc>,
}

impl TryFrom<ApprovalRow> for Approval {
    type Error = AppError;

    fn try_from(row: ApprovalRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            request_id: row.request_id,
            request_kind: parse_column("schedule kind", row.request_kind.as_str())?,
            approver_ids: row.approver_ids,
            status: parse_column("approval status", row.status.as_str())?,
            decisions: row.decisions.0,
            created_date_time: row.created_date_time,
            expires_date_time: row.expires_date_time,
        })
    }
}

/// Column list shared by schedule queries.
pub(super) const SCHEDULE_COLUMNS: &str = r#"
    kind, id, principal_id, role_definition_id, directory_scope_id, app_scope_id,
    created_using, created_date_time, modified_date_time, status, member_type,
    schedule_info, assignment_type, activated_using_id
"#;

pub(super) const INSTANCE_COLUMNS: &str = r#"
    kind, id, schedule_id, principal_id, role_definition_id, directory_scope_id, app_scope_id,
    start_date_time, end_date_time, member_type, assignment_type, activated_using_id
"#;

pub(super) const REQUEST_COLUMNS: &str = r#"
    kind, id, action, principal_id, role_definition_id, directory_scope_id, app_scope_id,
    justification, ticket_info, schedule_info, target_schedule_id, activated_using_id, status,
    approval_id, is_validation_only, created_date_time, completed_date_time, created_by,
    client_request_id, status_detail
"#;

pub(super) const APPROVAL_COLUMNS: &str = r#"
    approvals.id, approvals.request_id, approvals.request_kind,
    COALESCE(
        ARRAY(
            SELECT approvers.approver_id
            FROM approval_approvers approvers
            WHERE approvers.provider = approvals.provider
              AND approvers.approval_id = approvals.id
            ORDER BY approvers.position
        ),
        ARRAY[]::TEXT[]
    ) AS approver_ids,
    approvals.status, approvals.decisions, approvals.created_date_time,
    approvals.expires_date_time
"#;
