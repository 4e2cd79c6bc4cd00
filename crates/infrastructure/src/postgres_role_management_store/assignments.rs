use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use warden_application::{AuditEvent, AuditRecord, AuditRepository, RoleAssignmentRepository};
use warden_core::{AppError, AppResult, RbacProvider};
use warden_domain::{AuditAction, RoleAssignment};

use super::rows::RoleAssignmentRow;
use super::{PostgresRoleManagementStore, parse_column, store_error};

const ASSIGNMENT_COLUMNS: &str = r#"
    id, principal_id, role_definition_id, directory_scope_id, app_scope_id, condition,
    created_date_time, schedule_id
"#;

#[derive(Debug, FromRow)]
struct AuditEventRow {
    sequence: i64,
    provider: String,
    occurred_at: DateTime<Utc>,
    actor: String,
    action: String,
    resource_type: String,
    subject: String,
    before_status: Option<String>,
    after_status: Option<String>,
    request_id: Option<String>,
    detail: Option<String>,
}

impl TryFrom<AuditEventRow> for AuditRecord {
    type Error = AppError;

    fn try_from(row: AuditEventRow) -> AppResult<Self> {
        let action = AuditAction::from_storage(row.action.as_str()).ok_or_else(|| {
            AppError::Internal(format!("invalid stored audit action '{}'", row.action))
        })?;

        Ok(Self {
            sequence: u64::try_from(row.sequence).map_err(|error| {
                AppError::Internal(format!("invalid stored audit sequence: {error}"))
            })?,
            event: AuditEvent {
                provider: parse_column("provider", row.provider.as_str())?,
                timestamp: row.occurred_at,
                actor: row.actor,
                action,
                subject: row.subject,
                resource_type: row.resource_type,
                before_status: row.before_status,
                after_status: row.after_status,
                request_id: row.request_id,
                detail: row.detail,
            },
        })
    }
}

/// Inserts the assignment unless its triple is already held; returns the stored row.
pub(super) async fn upsert_assignment(
    connection: &mut PgConnection,
    provider: RbacProvider,
    assignment: RoleAssignment,
) -> AppResult<RoleAssignment> {
    let context = format!("failed to insert role assignment '{}'", assignment.id);
    let inserted = sqlx::query_as::<_, RoleAssignmentRow>(&format!(
        r#"
        INSERT INTO role_assignments (
            provider,
            id,
            principal_id,
            role_definition_id,
            directory_scope_id,
            app_scope_id,
            scope_key,
            condition,
            created_date_time,
            schedule_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT DO NOTHING
        RETURNING {ASSIGNMENT_COLUMNS}
        "#
    ))
    .bind(provider.as_str())
    .bind(assignment.id.as_str())
    .bind(assignment.principal_id.as_str())
    .bind(assignment.role_definition_id.as_str())
    .bind(assignment.scope.directory_scope_id())
    .bind(assignment.scope.app_scope_id())
    .bind(assignment.scope.storage_key())
    .bind(assignment.condition.as_deref())
    .bind(assignment.created_date_time)
    .bind(assignment.schedule_id.as_deref())
    .fetch_optional(&mut *connection)
    .await
    .map_err(|error| store_error(&context, error))?;

    if let Some(row) = inserted {
        return RoleAssignment::try_from(row);
    }

    let existing = sqlx::query_as::<_, RoleAssignmentRow>(&format!(
        r#"
        SELECT {ASSIGNMENT_COLUMNS}
        FROM role_assignments
        WHERE provider = $1 AND principal_id = $2 AND role_definition_id = $3 AND scope_key = $4
        "#
    ))
    .bind(provider.as_str())
    .bind(assignment.principal_id.as_str())
    .bind(assignment.role_definition_id.as_str())
    .bind(assignment.scope.storage_key())
    .fetch_optional(&mut *connection)
    .await
    .map_err(|error| store_error(&context, error))?;

    existing.map(RoleAssignment::try_from).transpose()?.ok_or_else(|| {
        AppError::Conflict(format!("role assignment id '{}' is already used", assignment.id))
    })
}

#[async_trait]
impl RoleAssignmentRepository for PostgresRoleManagementStore {
    async fn insert_role_assignment(
        &self,
        provider: RbacProvider,
        assignment: RoleAssignment,
    ) -> AppResult<RoleAssignment> {
        let mut connection = self
            .pool
            .acquire()
            .await
            .map_err(|error| store_error("failed to acquire a connection", error))?;

        upsert_assignment(&mut *connection, provider, assignment).await
    }

    async fn find_role_assignment(
        &self,
        provider: RbacProvider,
        assignment_id: &str,
    ) -> AppResult<Option<RoleAssignment>> {
        let row = sqlx::query_as::<_, RoleAssignmentRow>(&format!(
            r#"
            SELECT {ASSIGNMENT_COLUMNS}
            FROM role_assignments
            WHERE provider = $1 AND id = $2
            "#
        ))
        .bind(provider.as_str())
        .bind(assignment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            store_error(&format!("failed to find role assignment '{assignment_id}'"), error)
        })?;

        row.map(RoleAssignment::try_from).transpose()
    }

    async fn list_role_assignments(
        &self,
        provider: RbacProvider,
    ) -> AppResult<Vec<RoleAssignment>> {
        let rows = sqlx::query_as::<_, RoleAssignmentRow>(&format!(
            r#"
            SELECT {ASSIGNMENT_COLUMNS}
            FROM role_assignments
            WHERE provider = $1
            ORDER BY created_date_time, id
            "#
        ))
        .bind(provider.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            store_error(&format!("failed to list role assignments of '{provider}'"), error)
        })?;

        rows.into_iter().map(RoleAssignment::try_from).collect()
    }

    async fn list_role_assignments_for_principals(
        &self,
        provider: RbacProvider,
        principal_ids: &[String],
    ) -> AppResult<Vec<RoleAssignment>> {
        let rows = sqlx::query_as::<_, RoleAssignmentRow>(&format!(
            r#"
            SELECT {ASSIGNMENT_COLUMNS}
            FROM role_assignments
            WHERE provider = $1 AND principal_id = ANY($2)
            ORDER BY created_date_time, id
            "#
        ))
        .bind(provider.as_str())
        .bind(principal_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| store_error("failed to list role assignments of principals", error))?;

        rows.into_iter().map(RoleAssignment::try_from).collect()
    }

    async fn delete_role_assignment(
        &self,
        provider: RbacProvider,
        assignment_id: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            DELETE FROM role_assignments
            WHERE provider = $1 AND id = $2
            "#,
        )
        .bind(provider.as_str())
        .bind(assignment_id)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            store_error(&format!("failed to delete role assignment '{assignment_id}'"), error)
        })?;

        Ok(())
    }
}

#[async_trait]
impl AuditRepository for PostgresRoleManagementStore {
    async fn append_event(&self, event: AuditEvent) -> AppResult<u64> {
        let sequence = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO audit_events (
                provider,
                occurred_at,
                actor,
                action,
                resource_type,
                subject,
                before_status,
                after_status,
                request_id,
                detail
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING sequence
            "#,
        )
        .bind(event.provider.as_str())
        .bind(event.timestamp)
        .bind(event.actor.as_str())
        .bind(event.action.as_str())
        .bind(event.resource_type.as_str())
        .bind(event.subject.as_str())
        .bind(event.before_status.as_deref())
        .bind(event.after_status.as_deref())
        .bind(event.request_id.as_deref())
        .bind(event.detail.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| store_error("failed to append audit event", error))?;

        u64::try_from(sequence)
            .map_err(|error| AppError::Internal(format!("invalid audit sequence: {error}")))
    }

    async fn list_events(&self, provider: RbacProvider) -> AppResult<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            r#"
            SELECT
                sequence,
                provider,
                occurred_at,
                actor,
                action,
                resource_type,
                subject,
                before_status,
                after_status,
                request_id,
                detail
            FROM audit_events
            WHERE provider = $1
            ORDER BY sequence
            "#,
        )
        .bind(provider.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| store_error(&format!("failed to list audit events of '{provider}'"), error))?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }
}
