use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use warden_application::{AssignmentWrite, ScheduleCommit, ScheduleRepository, ScheduleWrite};
use warden_core::{AppError, AppResult, RbacProvider};
use warden_domain::{
    Approval, AssignmentTriple, RoleSchedule, ScheduleInstance, ScheduleKind, ScheduleRequest,
};

use super::assignments::upsert_assignment;
use super::rows::{
    APPROVAL_COLUMNS, ApprovalRow, INSTANCE_COLUMNS, InstanceRow, REQUEST_COLUMNS, RequestRow,
    SCHEDULE_COLUMNS, ScheduleRow,
};
use super::{PostgresRoleManagementStore, is_unique_violation, store_error};

const LIVE_SCHEDULE_STATUSES: &str = "('Provisioned', 'UpdateApplied')";
const REFERENCING_REQUEST_STATUSES: &str =
    "('Received', 'PendingApproval', 'Granted', 'Provisioned')";

async fn save_request(
    connection: &mut PgConnection,
    provider: RbacProvider,
    request: &ScheduleRequest,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO schedule_requests (
            provider,
            kind,
            id,
            action,
            principal_id,
            role_definition_id,
            directory_scope_id,
            app_scope_id,
            scope_key,
            justification,
            ticket_info,
            schedule_info,
            target_schedule_id,
            activated_using_id,
            status,
            approval_id,
            is_validation_only,
            created_date_time,
            completed_date_time,
            created_by,
            client_request_id,
            status_detail
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
            $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22
        )
        ON CONFLICT (provider, kind, id)
        DO UPDATE SET
            justification = EXCLUDED.justification,
            ticket_info = EXCLUDED.ticket_info,
            schedule_info = EXCLUDED.schedule_info,
            target_schedule_id = EXCLUDED.target_schedule_id,
            activated_using_id = EXCLUDED.activated_using_id,
            status = EXCLUDED.status,
            approval_id = EXCLUDED.approval_id,
            completed_date_time = EXCLUDED.completed_date_time,
            client_request_id = EXCLUDED.client_request_id,
            status_detail = EXCLUDED.status_detail
        "#,
    )
    .bind(provider.as_str())
    .bind(request.kind.as_str())
    .bind(request.id.as_str())
    .bind(request.action.as_str())
    .bind(request.principal_id.as_str())
    .bind(request.role_definition_id.as_str())
    .bind(request.scope.directory_scope_id())
    .bind(request.scope.app_scope_id())
    .bind(request.scope.storage_key())
    .bind(request.justification.as_deref())
    .bind(request.ticket_info.as_ref().map(Json))
    .bind(Json(&request.schedule_info))
    .bind(request.target_schedule_id.as_deref())
    .bind(request.activated_using_id.as_deref())
    .bind(request.status.as_str())
    .bind(request.approval_id.as_deref())
    .bind(request.is_validation_only)
    .bind(request.created_date_time)
    .bind(request.completed_date_time)
    .bind(request.created_by.as_str())
    .bind(request.client_request_id.as_deref())
    .bind(request.status_detail.as_ref().map(Json))
    .execute(&mut *connection)
    .await
    .map_err(|error| {
        if is_unique_violation(&error) {
            return AppError::Conflict(format!(
                "client request id '{}' is already used",
                request.client_request_id.as_deref().unwrap_or_default()
            ));
        }
        store_error(&format!("failed to save request '{}'", request.id), error)
    })?;

    Ok(())
}

async fn save_approval(
    connection: &mut PgConnection,
    provider: RbacProvider,
    approval: &Approval,
) -> AppResult<()> {
    let context = format!("failed to save approval '{}'", approval.id);
    sqlx::query(
        r#"
        INSERT INTO approvals (
            provider,
            id,
            request_id,
            request_kind,
            status,
            decisions,
            created_date_time,
            expires_date_time
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (provider, id)
        DO UPDATE SET
            status = EXCLUDED.status,
            decisions = EXCLUDED.decisions,
            expires_date_time = EXCLUDED.expires_date_time
        "#,
    )
    .bind(provider.as_str())
    .bind(approval.id.as_str())
    .bind(approval.request_id.as_str())
    .bind(approval.request_kind.as_str())
    .bind(approval.status.as_str())
    .bind(Json(&approval.decisions))
    .bind(approval.created_date_time)
    .bind(approval.expires_date_time)
    .execute(&mut *connection)
    .await
    .map_err(|error| store_error(&context, error))?;

    sqlx::query(
        r#"
        DELETE FROM approval_approvers
        WHERE provider = $1 AND approval_id = $2
        "#,
    )
    .bind(provider.as_str())
    .bind(approval.id.as_str())
    .execute(&mut *connection)
    .await
    .map_err(|error| store_error(&context, error))?;

    if approval.approver_ids.is_empty() {
        return Ok(());
    }

    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO approval_approvers (provider, approval_id, approver_id, position) ",
    );
    builder.push_values(
        approval.approver_ids.iter().enumerate(),
        |mut values, (position, approver_id)| {
            values
                .push_bind(provider.as_str())
                .push_bind(approval.id.as_str())
                .push_bind(approver_id.as_str())
                .push_bind(i32::try_from(position).unwrap_or(i32::MAX));
        },
    );
    builder.push(" ON CONFLICT DO NOTHING");
    builder
        .build()
        .execute(&mut *connection)
        .await
        .map_err(|error| store_error(&context, error))?;

    Ok(())
}

async fn save_schedule(
    connection: &mut PgConnection,
    provider: RbacProvider,
    write: &ScheduleWrite,
) -> AppResult<()> {
    let schedule = &write.schedule;
    let context = format!("failed to save schedule '{}'", schedule.id);
    sqlx::query(
        r#"
        INSERT INTO schedules (
            provider,
            kind,
            id,
            principal_id,
            role_definition_id,
            directory_scope_id,
            app_scope_id,
            scope_key,
            created_using,
            created_date_time,
            modified_date_time,
            status,
            member_type,
            schedule_info,
            end_date_time,
            assignment_type,
            activated_using_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ON CONFLICT (provider, kind, id)
        DO UPDATE SET
            modified_date_time = EXCLUDED.modified_date_time,
            status = EXCLUDED.status,
            member_type = EXCLUDED.member_type,
            schedule_info = EXCLUDED.schedule_info,
            end_date_time = EXCLUDED.end_date_time,
            assignment_type = EXCLUDED.assignment_type,
            activated_using_id = EXCLUDED.activated_using_id
        "#,
    )
    .bind(provider.as_str())
    .bind(schedule.kind.as_str())
    .bind(schedule.id.as_str())
    .bind(schedule.principal_id.as_str())
    .bind(schedule.role_definition_id.as_str())
    .bind(schedule.scope.directory_scope_id())
    .bind(schedule.scope.app_scope_id())
    .bind(schedule.scope.storage_key())
    .bind(schedule.created_using.as_str())
    .bind(schedule.created_date_time)
    .bind(schedule.modified_date_time)
    .bind(schedule.status.as_str())
    .bind(schedule.member_type.as_str())
    .bind(Json(&schedule.schedule_info))
    .bind(schedule.window().end_date_time)
    .bind(schedule.assignment_type.map(|value| value.as_str()))
    .bind(schedule.activated_using_id.as_deref())
    .execute(&mut *connection)
    .await
    .map_err(|error| store_error(&context, error))?;

    let Some(instances) = write.instances.as_ref() else {
        return Ok(());
    };

    sqlx::query(
        r#"
        DELETE FROM schedule_instances
        WHERE provider = $1 AND kind = $2 AND schedule_id = $3
        "#,
    )
    .bind(provider.as_str())
    .bind(schedule.kind.as_str())
    .bind(schedule.id.as_str())
    .execute(&mut *connection)
    .await
    .map_err(|error| store_error(&context, error))?;

    for instance in instances {
        sqlx::query(
            r#"
            INSERT INTO schedule_instances (
                provider,
                kind,
                id,
                schedule_id,
                principal_id,
                role_definition_id,
                directory_scope_id,
                app_scope_id,
                start_date_time,
                end_date_time,
                member_type,
                assignment_type,
                activated_using_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (provider, kind, id)
            DO UPDATE SET
                schedule_id = EXCLUDED.schedule_id,
                start_date_time = EXCLUDED.start_date_time,
                end_date_time = EXCLUDED.end_date_time,
                member_type = EXCLUDED.member_type,
                assignment_type = EXCLUDED.assignment_type,
                activated_using_id = EXCLUDED.activated_using_id
            "#,
        )
        .bind(provider.as_str())
        .bind(instance.kind.as_str())
        .bind(instance.id.as_str())
        .bind(instance.role_assignment_origin_id.as_str())
        .bind(instance.principal_id.as_str())
        .bind(instance.role_definition_id.as_str())
        .bind(instance.scope.directory_scope_id())
        .bind(instance.scope.app_scope_id())
        .bind(instance.start_date_time)
        .bind(instance.end_date_time)
        .bind(instance.member_type.as_str())
        .bind(instance.assignment_type.map(|value| value.as_str()))
        .bind(instance.activated_using_id.as_deref())
        .execute(&mut *connection)
        .await
        .map_err(|error| store_error(&context, error))?;
    }

    Ok(())
}

impl PostgresRoleManagementStore {
    async fn fetch_schedules(
        &self,
        context: &str,
        filter: &str,
        provider: RbacProvider,
        bind_values: &[&str],
    ) -> AppResult<Vec<RoleSchedule>> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE provider = $1 {filter} ORDER BY created_date_time, id"
        );
        let mut query = sqlx::query_as::<_, ScheduleRow>(&sql).bind(provider.as_str());
        for value in bind_values {
            query = query.bind(*value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|error| store_error(context, error))?;

        rows.into_iter().map(RoleSchedule::try_from).collect()
    }

    async fn fetch_requests(
        &self,
        context: &str,
        filter: &str,
        provider: RbacProvider,
        bind_values: &[&str],
    ) -> AppResult<Vec<ScheduleRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM schedule_requests WHERE provider = $1 {filter} ORDER BY created_date_time, id"
        );
        let mut query = sqlx::query_as::<_, RequestRow>(&sql).bind(provider.as_str());
        for value in bind_values {
            query = query.bind(*value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|error| store_error(context, error))?;

        rows.into_iter().map(ScheduleRequest::try_from).collect()
    }

    async fn fetch_instances(
        &self,
        context: &str,
        filter: &str,
        provider: RbacProvider,
        bind_values: &[&str],
    ) -> AppResult<Vec<ScheduleInstance>> {
        let sql = format!(
            "SELECT {INSTANCE_COLUMNS} FROM schedule_instances WHERE provider = $1 {filter} ORDER BY start_date_time, id"
        );
        let mut query = sqlx::query_as::<_, InstanceRow>(&sql).bind(provider.as_str());
        for value in bind_values {
            query = query.bind(*value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|error| store_error(context, error))?;

        rows.into_iter().map(ScheduleInstance::try_from).collect()
    }

    async fn fetch_approvals(
        &self,
        context: &str,
        filter: &str,
        provider: RbacProvider,
        now: Option<DateTime<Utc>>,
        bind_values: &[&str],
    ) -> AppResult<Vec<Approval>> {
        let sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE approvals.provider = $1 {filter} ORDER BY approvals.created_date_time, approvals.id"
        );
        let mut query = sqlx::query_as::<_, ApprovalRow>(&sql).bind(provider.as_str());
        if let Some(now) = now {
            query = query.bind(now);
        }
        for value in bind_values {
            query = query.bind(*value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|error| store_error(context, error))?;

        rows.into_iter().map(Approval::try_from).collect()
    }
}

#[async_trait]
impl ScheduleRepository for PostgresRoleManagementStore {
    async fn commit(&self, provider: RbacProvider, commit: ScheduleCommit) -> AppResult<()> {
        let context = "failed to commit schedule changes";
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| store_error(context, error))?;

        for request in &commit.requests {
            save_request(&mut *transaction, provider, request).await?;
        }
        for approval in &commit.approvals {
            save_approval(&mut *transaction, provider, approval).await?;
        }
        for write in &commit.schedules {
            save_schedule(&mut *transaction, provider, write).await?;
        }
        for write in commit.assignments {
            match write {
                AssignmentWrite::Upsert(assignment) => {
                    upsert_assignment(&mut *transaction, provider, assignment).await?;
                }
                AssignmentWrite::DeleteForSchedule(schedule_id) => {
                    sqlx::query(
                        r#"
                        DELETE FROM role_assignments
                        WHERE provider = $1 AND schedule_id = $2
                        "#,
                    )
                    .bind(provider.as_str())
                    .bind(schedule_id.as_str())
                    .execute(&mut *transaction)
                    .await
                    .map_err(|error| store_error(context, error))?;
                }
            }
        }

        transaction
            .commit()
            .await
            .map_err(|error| store_error(context, error))
    }

    async fn find_schedule(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        schedule_id: &str,
    ) -> AppResult<Option<RoleSchedule>> {
        let schedules = self
            .fetch_schedules(
                &format!("failed to find schedule '{schedule_id}'"),
                "AND kind = $2 AND id = $3",
                provider,
                &[kind.as_str(), schedule_id],
            )
            .await?;

        Ok(schedules.into_iter().next())
    }

    async fn list_schedules(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
    ) -> AppResult<Vec<RoleSchedule>> {
        self.fetch_schedules(
            &format!("failed to list {} schedules", kind.as_str()),
            "AND kind = $2",
            provider,
            &[kind.as_str()],
        )
        .await
    }

    async fn list_schedules_for_triple(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        triple: &AssignmentTriple,
    ) -> AppResult<Vec<RoleSchedule>> {
        let scope_key = triple.scope.storage_key();
        self.fetch_schedules(
            &format!(
                "failed to list {} schedules of '{}'",
                kind.as_str(),
                triple.principal_id
            ),
            "AND kind = $2 AND principal_id = $3 AND role_definition_id = $4 AND scope_key = $5",
            provider,
            &[
                kind.as_str(),
                triple.principal_id.as_str(),
                triple.role_definition_id.as_str(),
                scope_key.as_str(),
            ],
        )
        .await
    }

    async fn list_live_schedules(&self, provider: RbacProvider) -> AppResult<Vec<RoleSchedule>> {
        self.fetch_schedules(
            "failed to list live schedules",
            &format!("AND status IN {LIVE_SCHEDULE_STATUSES}"),
            provider,
            &[],
        )
        .await
    }

    async fn list_schedules_activated_using(
        &self,
        provider: RbacProvider,
        eligibility_schedule_id: &str,
    ) -> AppResult<Vec<RoleSchedule>> {
        self.fetch_schedules(
            &format!("failed to list activations of '{eligibility_schedule_id}'"),
            "AND kind = $2 AND activated_using_id = $3",
            provider,
            &[ScheduleKind::Assignment.as_str(), eligibility_schedule_id],
        )
        .await
    }

    async fn find_instance(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        instance_id: &str,
    ) -> AppResult<Option<ScheduleInstance>> {
        let instances = self
            .fetch_instances(
                &format!("failed to find instance '{instance_id}'"),
                "AND kind = $2 AND id = $3",
                provider,
                &[kind.as_str(), instance_id],
            )
            .await?;

        Ok(instances.into_iter().next())
    }

    async fn list_instances(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
    ) -> AppResult<Vec<ScheduleInstance>> {
        self.fetch_instances(
            &format!("failed to list {} instances", kind.as_str()),
            "AND kind = $2",
            provider,
            &[kind.as_str()],
        )
        .await
    }

    async fn list_instances_for_schedule(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        schedule_id: &str,
    ) -> AppResult<Vec<ScheduleInstance>> {
        self.fetch_instances(
            &format!("failed to list instances of schedule '{schedule_id}'"),
            "AND kind = $2 AND schedule_id = $3",
            provider,
            &[kind.as_str(), schedule_id],
        )
        .await
    }

    async fn list_active_assignment_instances(
        &self,
        provider: RbacProvider,
        principal_ids: &[String],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<ScheduleInstance>> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM schedule_instances
            WHERE provider = $1
              AND kind = $2
              AND principal_id = ANY($3)
              AND start_date_time <= $4
              AND (end_date_time IS NULL OR end_date_time > $4)
            ORDER BY start_date_time, id
            "#
        ))
        .bind(provider.as_str())
        .bind(ScheduleKind::Assignment.as_str())
        .bind(principal_ids)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| store_error("failed to list active assignment instances", error))?;

        rows.into_iter().map(ScheduleInstance::try_from).collect()
    }

    async fn delete_instances_ended_by(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        schedule_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM schedule_instances
            WHERE provider = $1
              AND kind = $2
              AND schedule_id = $3
              AND end_date_time IS NOT NULL
              AND end_date_time <= $4
            "#,
        )
        .bind(provider.as_str())
        .bind(kind.as_str())
        .bind(schedule_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|error| store_error("failed to delete ended instances", error))?;

        Ok(result.rows_affected())
    }

    async fn find_request(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        request_id: &str,
    ) -> AppResult<Option<ScheduleRequest>> {
        let requests = self
            .fetch_requests(
                &format!("failed to find request '{request_id}'"),
                "AND kind = $2 AND id = $3",
                provider,
                &[kind.as_str(), request_id],
            )
            .await?;

        Ok(requests.into_iter().next())
    }

    async fn find_request_by_client_id(
        &self,
        provider: RbacProvider,
        client_request_id: &str,
    ) -> AppResult<Option<ScheduleRequest>> {
        let requests = self
            .fetch_requests(
                &format!("failed to find request by client id '{client_request_id}'"),
                "AND client_request_id = $2",
                provider,
                &[client_request_id],
            )
            .await?;

        Ok(requests.into_iter().next())
    }

    async fn list_requests(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
    ) -> AppResult<Vec<ScheduleRequest>> {
        self.fetch_requests(
            &format!("failed to list {} requests", kind.as_str()),
            "AND kind = $2",
            provider,
            &[kind.as_str()],
        )
        .await
    }

    async fn list_requests_for_triple(
        &self,
        provider: RbacProvider,
        kind: ScheduleKind,
        triple: &AssignmentTriple,
    ) -> AppResult<Vec<ScheduleRequest>> {
        let scope_key = triple.scope.storage_key();
        self.fetch_requests(
            &format!(
                "failed to list {} requests of '{}'",
                kind.as_str(),
                triple.principal_id
            ),
            "AND kind = $2 AND principal_id = $3 AND role_definition_id = $4 AND scope_key = $5",
            provider,
            &[
                kind.as_str(),
                triple.principal_id.as_str(),
                triple.role_definition_id.as_str(),
                scope_key.as_str(),
            ],
        )
        .await
    }

    async fn count_role_definition_references(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
    ) -> AppResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(&format!(
            r#"
            SELECT
                (
                    SELECT COUNT(*)
                    FROM schedules
                    WHERE provider = $1
                      AND role_definition_id = $2
                      AND status IN {LIVE_SCHEDULE_STATUSES}
                )
                +
                (
                    SELECT COUNT(*)
                    FROM schedule_requests
                    WHERE provider = $1
                      AND role_definition_id = $2
                      AND status IN {REFERENCING_REQUEST_STATUSES}
                )
            "#
        ))
        .bind(provider.as_str())
        .bind(role_definition_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            store_error(
                &format!("failed to count references to role '{role_definition_id}'"),
                error,
            )
        })?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn find_approval(
        &self,
        provider: RbacProvider,
        approval_id: &str,
    ) -> AppResult<Option<Approval>> {
        let approvals = self
            .fetch_approvals(
                &format!("failed to find approval '{approval_id}'"),
                "AND approvals.id = $2",
                provider,
                None,
                &[approval_id],
            )
            .await?;

        Ok(approvals.into_iter().next())
    }

    async fn list_approvals(&self, provider: RbacProvider) -> AppResult<Vec<Approval>> {
        self.fetch_approvals("failed to list approvals", "", provider, None, &[])
            .await
    }

    async fn list_approvals_for_approver(
        &self,
        provider: RbacProvider,
        approver_id: &str,
    ) -> AppResult<Vec<Approval>> {
        self.fetch_approvals(
            &format!("failed to list approvals of '{approver_id}'"),
            r#"
            AND EXISTS (
                SELECT 1
                FROM approval_approvers candidates
                WHERE candidates.provider = approvals.provider
                  AND candidates.approval_id = approvals.id
                  AND candidates.approver_id = $2
            )
            "#,
            provider,
            None,
            &[approver_id],
        )
        .await
    }

    async fn list_expired_pending_approvals(
        &self,
        provider: RbacProvider,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Approval>> {
        self.fetch_approvals(
            "failed to list expired approvals",
            "AND approvals.status = 'InProgress' AND approvals.expires_date_time <= $2",
            provider,
            Some(now),
            &[],
        )
        .await
    }
}
