use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;
use warden_application::{
    AssignmentWrite, AuditEvent, AuditRepository, RoleAssignmentRepository, ScheduleCommit,
    ScheduleRepository, ScheduleWrite,
};
use warden_core::{AppError, RbacProvider};
use warden_domain::{
    Approval, ApprovalStatus, AssignmentType, AuditAction, Expiration, MemberType, RequestAction,
    RequestStatus, RoleAssignment, RoleSchedule, RoleScope, ScheduleInfo, ScheduleInstance,
    ScheduleKind, ScheduleRequest, ScheduleStatus,
};

use super::PostgresRoleManagementStore;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for role management store tests: {error}");
    }

    Some(pool)
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0)
        .single()
        .unwrap_or_default()
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn schedule(id: &str, principal_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> RoleSchedule {
    RoleSchedule {
        id: id.to_owned(),
        kind: ScheduleKind::Assignment,
        principal_id: principal_id.to_owned(),
        role_definition_id: "operator".to_owned(),
        scope: RoleScope::root(),
        created_using: id.to_owned(),
        created_date_time: start,
        modified_date_time: start,
        status: ScheduleStatus::Provisioned,
        member_type: MemberType::Direct,
        schedule_info: ScheduleInfo::starting_at(start, Expiration::at(end)),
        assignment_type: Some(AssignmentType::Assigned),
        activated_using_id: None,
    }
}

fn instance(schedule: &RoleSchedule, start: DateTime<Utc>, end: DateTime<Utc>) -> ScheduleInstance {
    ScheduleInstance {
        id: format!("{}-{}", schedule.id, start.timestamp()),
        kind: schedule.kind,
        principal_id: schedule.principal_id.clone(),
        role_definition_id: schedule.role_definition_id.clone(),
        scope: schedule.scope.clone(),
        start_date_time: start,
        end_date_time: Some(end),
        member_type: schedule.member_type,
        role_assignment_origin_id: schedule.id.clone(),
        assignment_type: schedule.assignment_type,
        activated_using_id: None,
    }
}

fn request(id: &str, principal_id: &str, client_request_id: Option<&str>) -> ScheduleRequest {
    ScheduleRequest {
        id: id.to_owned(),
        kind: ScheduleKind::Assignment,
        action: RequestAction::AdminAssign,
        principal_id: principal_id.to_owned(),
        role_definition_id: "operator".to_owned(),
        scope: RoleScope::root(),
        justification: Some("ops rotation".to_owned()),
        ticket_info: None,
        schedule_info: ScheduleInfo::starting_at(at(9, 0), Expiration::at(at(17, 0))),
        target_schedule_id: None,
        activated_using_id: None,
        status: RequestStatus::Received,
        approval_id: None,
        is_validation_only: false,
        created_date_time: at(9, 0),
        completed_date_time: None,
        created_by: "admin".to_owned(),
        client_request_id: client_request_id.map(str::to_owned),
        status_detail: None,
    }
}

fn assignment(id: &str, principal_id: &str) -> RoleAssignment {
    RoleAssignment {
        id: id.to_owned(),
        principal_id: principal_id.to_owned(),
        role_definition_id: "operator".to_owned(),
        scope: RoleScope::root(),
        condition: None,
        created_date_time: at(9, 0),
        schedule_id: None,
    }
}

#[tokio::test]
async fn commit_replaces_instances_of_a_schedule() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let store = PostgresRoleManagementStore::new(pool);
    let provider = RbacProvider::Directory;
    let principal_id = unique("user");
    let schedule_id = unique("schedule");
    let stored = schedule(schedule_id.as_str(), principal_id.as_str(), at(9, 0), at(17, 0));

    let first = store
        .commit(
            provider,
            ScheduleCommit {
                requests: Vec::new(),
                approvals: Vec::new(),
                schedules: vec![ScheduleWrite {
                    schedule: stored.clone(),
                    instances: Some(vec![instance(&stored, at(9, 0), at(17, 0))]),
                }],
                assignments: Vec::new(),
            },
        )
        .await;
    assert!(first.is_ok());

    let mut shortened = stored.clone();
    shortened.schedule_info = ScheduleInfo::starting_at(at(9, 0), Expiration::at(at(12, 0)));
    let second = store
        .commit(
            provider,
            ScheduleCommit {
                schedules: vec![ScheduleWrite {
                    schedule: shortened.clone(),
                    instances: Some(vec![instance(&shortened, at(9, 0), at(12, 0))]),
                }],
                ..ScheduleCommit::default()
            },
        )
        .await;
    assert!(second.is_ok());

    let instances = store
        .list_instances_for_schedule(provider, ScheduleKind::Assignment, schedule_id.as_str())
        .await
        .unwrap_or_default();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].end_date_time, Some(at(12, 0)));

    let found = store
        .find_schedule(provider, ScheduleKind::Assignment, schedule_id.as_str())
        .await
        .ok()
        .flatten();
    assert_eq!(found, Some(shortened));

    let active = store
        .list_active_assignment_instances(provider, &[principal_id.clone()], at(11, 0))
        .await
        .unwrap_or_default();
    assert_eq!(active.len(), 1);

    let after_end = store
        .list_active_assignment_instances(provider, &[principal_id], at(12, 0))
        .await
        .unwrap_or_default();
    assert!(after_end.is_empty());
}

#[tokio::test]
async fn reused_client_request_id_is_a_conflict() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let store = PostgresRoleManagementStore::new(pool);
    let provider = RbacProvider::Directory;
    let principal_id = unique("user");
    let client_id = unique("client");
    let first_id = unique("request");

    let first = store
        .commit(
            provider,
            ScheduleCommit {
                requests: vec![request(
                    first_id.as_str(),
                    principal_id.as_str(),
                    Some(client_id.as_str()),
                )],
                ..ScheduleCommit::default()
            },
        )
        .await;
    assert!(first.is_ok());

    let duplicate = store
        .commit(
            provider,
            ScheduleCommit {
                requests: vec![request(
                    unique("request").as_str(),
                    principal_id.as_str(),
                    Some(client_id.as_str()),
                )],
                ..ScheduleCommit::default()
            },
        )
        .await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));

    let stored = store
        .find_request_by_client_id(provider, client_id.as_str())
        .await
        .ok()
        .flatten();
    assert_eq!(stored.map(|request| request.id), Some(first_id));
}

#[tokio::test]
async fn failed_commit_leaves_no_partial_writes() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let store = PostgresRoleManagementStore::new(pool);
    let provider = RbacProvider::Directory;
    let principal_id = unique("user");
    let client_id = unique("client");

    let seeded = store
        .commit(
            provider,
            ScheduleCommit {
                requests: vec![request(
                    unique("request").as_str(),
                    principal_id.as_str(),
                    Some(client_id.as_str()),
                )],
                ..ScheduleCommit::default()
            },
        )
        .await;
    assert!(seeded.is_ok());

    let schedule_id = unique("schedule");
    let rejected = store
        .commit(
            provider,
            ScheduleCommit {
                requests: vec![request(
                    unique("request").as_str(),
                    principal_id.as_str(),
                    Some(client_id.as_str()),
                )],
                schedules: vec![ScheduleWrite {
                    schedule: schedule(
                        schedule_id.as_str(),
                        principal_id.as_str(),
                        at(9, 0),
                        at(17, 0),
                    ),
                    instances: None,
                }],
                ..ScheduleCommit::default()
            },
        )
        .await;
    assert!(rejected.is_err());

    let schedule = store
        .find_schedule(provider, ScheduleKind::Assignment, schedule_id.as_str())
        .await;
    assert!(matches!(schedule, Ok(None)));
}

#[tokio::test]
async fn assignment_upsert_returns_the_holder_of_the_triple() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let store = PostgresRoleManagementStore::new(pool);
    let provider = RbacProvider::Directory;
    let principal_id = unique("user");
    let first_id = unique("assignment");

    let first = store
        .insert_role_assignment(provider, assignment(first_id.as_str(), principal_id.as_str()))
        .await;
    assert_eq!(first.ok().map(|stored| stored.id), Some(first_id.clone()));

    let second = store
        .insert_role_assignment(
            provider,
            assignment(unique("assignment").as_str(), principal_id.as_str()),
        )
        .await;
    assert_eq!(second.ok().map(|stored| stored.id), Some(first_id));

    let held = store
        .list_role_assignments_for_principals(provider, &[principal_id])
        .await
        .unwrap_or_default();
    assert_eq!(held.len(), 1);
}

#[tokio::test]
async fn schedule_provisioned_assignments_are_deleted_with_the_schedule() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let store = PostgresRoleManagementStore::new(pool);
    let provider = RbacProvider::Directory;
    let principal_id = unique("user");
    let schedule_id = unique("schedule");
    let mut provisioned = assignment(unique("assignment").as_str(), principal_id.as_str());
    provisioned.schedule_id = Some(schedule_id.clone());

    let created = store
        .commit(
            provider,
            ScheduleCommit {
                assignments: vec![AssignmentWrite::Upsert(provisioned)],
                ..ScheduleCommit::default()
            },
        )
        .await;
    assert!(created.is_ok());

    let removed = store
        .commit(
            provider,
            ScheduleCommit {
                assignments: vec![AssignmentWrite::DeleteForSchedule(schedule_id)],
                ..ScheduleCommit::default()
            },
        )
        .await;
    assert!(removed.is_ok());

    let held = store
        .list_role_assignments_for_principals(provider, &[principal_id])
        .await
        .unwrap_or_default();
    assert!(held.is_empty());
}

#[tokio::test]
async fn approvals_keep_approver_order_and_expire_by_deadline() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let store = PostgresRoleManagementStore::new(pool);
    let provider = RbacProvider::Directory;
    let approval_id = unique("approval");
    let approver_ids = vec![unique("approver-b"), unique("approver-a")];
    let approval = Approval {
        id: approval_id.clone(),
        request_id: unique("request"),
        request_kind: ScheduleKind::Assignment,
        approver_ids: approver_ids.clone(),
        status: ApprovalStatus::InProgress,
        decisions: Vec::new(),
        created_date_time: at(9, 0),
        expires_date_time: at(9, 0) + Duration::days(1),
    };

    let saved = store
        .commit(
            provider,
            ScheduleCommit {
                approvals: vec![approval.clone()],
                ..ScheduleCommit::default()
            },
        )
        .await;
    assert!(saved.is_ok());

    let found = store
        .find_approval(provider, approval_id.as_str())
        .await
        .ok()
        .flatten();
    assert_eq!(found, Some(approval));

    let for_approver = store
        .list_approvals_for_approver(provider, approver_ids[1].as_str())
        .await
        .unwrap_or_default();
    assert_eq!(for_approver.len(), 1);

    let before_deadline = store
        .list_expired_pending_approvals(provider, at(10, 0))
        .await
        .unwrap_or_default();
    assert!(before_deadline.iter().all(|pending| pending.id != approval_id));

    let after_deadline = store
        .list_expired_pending_approvals(provider, at(9, 0) + Duration::days(1))
        .await
        .unwrap_or_default();
    assert!(after_deadline.iter().any(|pending| pending.id == approval_id));
}

#[tokio::test]
async fn audit_sequence_increases_with_each_event() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let store = PostgresRoleManagementStore::new(pool);
    let event = AuditEvent {
        provider: RbacProvider::Directory,
        timestamp: at(9, 0),
        actor: "admin".to_owned(),
        action: AuditAction::RequestTransitioned,
        subject: unique("request"),
        resource_type: "roleAssignmentScheduleRequest".to_owned(),
        before_status: Some("Received".to_owned()),
        after_status: Some("Provisioned".to_owned()),
        request_id: None,
        detail: None,
    };

    let first = store.append_event(event.clone()).await.unwrap_or_default();
    let second = store.append_event(event).await.unwrap_or_default();
    assert!(first > 0);
    assert!(second > first);
}
