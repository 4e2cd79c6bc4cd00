use chrono::TimeDelta;
use warden_core::{AppError, AppResult};
use warden_domain::{
    ApprovalStatus, ApproverKind, ApproverRef, AuditAction, Expiration, IsoDuration,
    RequestAction, RequestStatus, ReviewResult, RoleManagementPolicy, RoleSchedule,
    ScheduleInfo, ScheduleKind, ScheduleRequest, ScheduleStatus, TicketInfo,
    role_management_action,
};

use crate::role_management_ports::{ScheduleRepository, TickerShard};
use crate::test_support::{
    ADMIN, ALICE, BOB, CAROL, Engine, GLOBAL_ADMIN, PROVIDER, admin, for_hours, sales_scope,
    submission, user,
};

fn approval_policy() -> RoleManagementPolicy {
    RoleManagementPolicy {
        approval_required: true,
        approvers: vec![ApproverRef {
            kind: ApproverKind::Principal,
            id: BOB.to_owned(),
        }],
        ..RoleManagementPolicy::default_for(GLOBAL_ADMIN)
    }
}

async fn eligible_alice(engine: &Engine) -> String {
    engine
        .make_eligible(
            ALICE,
            GLOBAL_ADMIN,
            sales_scope(),
            Expiration::after(IsoDuration::days(30)),
        )
        .await
        .target_schedule_id
        .unwrap_or_default()
}

#[tokio::test]
async fn eligible_principal_activates_without_approval() {
    let engine = Engine::seeded().await;
    let eligibility_id = eligible_alice(&engine).await;

    let activation = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2)
        .await
        .unwrap_or_else(|error| panic!("activation failed: {error}"));

    assert_eq!(activation.status, RequestStatus::Provisioned);
    assert_eq!(activation.activated_using_id.as_deref(), Some(eligibility_id.as_str()));

    let instances = engine
        .store
        .list_instances(PROVIDER, ScheduleKind::Assignment)
        .await
        .unwrap_or_default();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].end_date_time, Some(engine.now() + TimeDelta::hours(2)));
    assert!(
        instances[0]
            .activated_using_id
            .as_deref()
            .is_some_and(|id| id.starts_with(eligibility_id.as_str()))
    );

    let permitted = engine
        .authorization
        .is_permitted(
            PROVIDER,
            &user(ALICE),
            role_management_action(PROVIDER),
            &sales_scope(),
        )
        .await;
    assert_eq!(permitted.ok(), Some(true));
}

#[tokio::test]
async fn activation_without_eligibility_fails_and_is_persisted() {
    let engine = Engine::seeded().await;

    let result = engine.activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    let stored = engine
        .store
        .list_requests(PROVIDER, ScheduleKind::Assignment)
        .await
        .unwrap_or_default();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, RequestStatus::Failed);
    assert!(
        stored[0]
            .status_detail
            .as_ref()
            .is_some_and(|detail| detail.code == "invalidInput")
    );
}

#[tokio::test]
async fn activation_longer_than_policy_maximum_is_denied() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;

    let result = engine.activate(ALICE, GLOBAL_ADMIN, sales_scope(), 9).await;

    assert!(matches!(result, Err(AppError::PolicyDenied(_))));
}

#[tokio::test]
async fn approval_gates_activation_until_an_approver_decides() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    engine.save_policy(approval_policy()).await;

    let pending = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2)
        .await
        .unwrap_or_else(|error| panic!("activation failed: {error}"));
    assert_eq!(pending.status, RequestStatus::PendingApproval);
    let approval_id = pending.approval_id.clone().unwrap_or_default();

    let notifications = engine.store.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].approver_ids, vec![BOB.to_owned()]);

    let outsider = engine
        .requests
        .decide(&user(CAROL), PROVIDER, approval_id.as_str(), ReviewResult::Approve, None)
        .await;
    assert!(outsider.is_err());

    let approved = engine
        .requests
        .decide(
            &user(BOB),
            PROVIDER,
            approval_id.as_str(),
            ReviewResult::Approve,
            Some("on call".to_owned()),
        )
        .await
        .unwrap_or_else(|error| panic!("approval failed: {error}"));
    assert_eq!(approved.status, RequestStatus::Provisioned);

    let approval = engine
        .requests
        .get_approval(&user(BOB), PROVIDER, approval_id.as_str())
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(approval.status, ApprovalStatus::Approved);
    assert_eq!(approval.decisions.len(), 1);
}

#[tokio::test]
async fn denied_requests_are_terminal_but_metadata_can_be_corrected() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    engine.save_policy(approval_policy()).await;
    let pending = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2)
        .await
        .unwrap_or_else(|error| panic!("activation failed: {error}"));

    let denied = engine
        .requests
        .decide(
            &user(BOB),
            PROVIDER,
            pending.approval_id.as_deref().unwrap_or_default(),
            ReviewResult::Deny,
            None,
        )
        .await
        .unwrap_or_else(|error| panic!("deny failed: {error}"));
    assert_eq!(denied.status, RequestStatus::Denied);

    let corrected = engine
        .requests
        .correct_metadata(
            &admin(),
            PROVIDER,
            ScheduleKind::Assignment,
            denied.id.as_str(),
            Some("reclassified".to_owned()),
            Some(TicketInfo {
                ticket_number: Some("INC-42".to_owned()),
                ticket_system: Some("servicedesk".to_owned()),
            }),
        )
        .await
        .unwrap_or_else(|error| panic!("correction failed: {error}"));

    assert_eq!(corrected.status, RequestStatus::Denied);
    assert_eq!(corrected.justification.as_deref(), Some("reclassified"));
    let events = engine.store.events().await;
    assert!(
        events
            .last()
            .is_some_and(|record| record.event.action == AuditAction::RequestMetadataCorrected)
    );
}

#[tokio::test]
async fn pending_approvals_time_out_on_the_ticker() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    engine.save_policy(approval_policy()).await;
    let pending = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2)
        .await
        .unwrap_or_else(|error| panic!("activation failed: {error}"));

    engine.advance(TimeDelta::hours(25));
    let report = engine
        .ticker
        .run_once(PROVIDER, TickerShard::all())
        .await
        .unwrap_or_default();
    let timed_out = engine
        .requests
        .get_request(&user(ALICE), PROVIDER, ScheduleKind::Assignment, pending.id.as_str())
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let late_decision = engine
        .requests
        .decide(
            &user(BOB),
            PROVIDER,
            pending.approval_id.as_deref().unwrap_or_default(),
            ReviewResult::Approve,
            None,
        )
        .await;

    assert_eq!(report.approvals_timed_out, 1);
    assert_eq!(timed_out.status, RequestStatus::Denied);
    assert!(
        timed_out
            .status_detail
            .is_some_and(|detail| detail.code == "timedOut")
    );
    assert!(late_decision.is_err());
}

#[tokio::test]
async fn open_requests_serialize_per_triple() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    engine.save_policy(approval_policy()).await;

    let first = engine.activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2).await;
    let second = engine.activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2).await;

    assert!(first.is_ok_and(|request| request.status == RequestStatus::PendingApproval));
    assert!(matches!(second, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn client_request_ids_make_submission_idempotent() {
    let engine = Engine::seeded().await;
    let input = submission(
        RequestAction::AdminAssign,
        CAROL,
        GLOBAL_ADMIN,
        sales_scope(),
        Some(for_hours(engine.now(), 4)),
    );

    let first = engine
        .requests
        .submit(
            &admin(),
            PROVIDER,
            ScheduleKind::Assignment,
            input.clone(),
            Some("client-1".to_owned()),
        )
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let replay = engine
        .requests
        .submit(
            &admin(),
            PROVIDER,
            ScheduleKind::Assignment,
            input,
            Some("client-1".to_owned()),
        )
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    assert_eq!(first.id, replay.id);
    let stored = engine
        .store
        .list_requests(PROVIDER, ScheduleKind::Assignment)
        .await
        .unwrap_or_default();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn notification_failure_fails_the_request_and_frees_the_client_id() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    engine.save_policy(approval_policy()).await;
    engine.store.fail_notifications(true);
    let input = submission(
        RequestAction::SelfActivate,
        ALICE,
        GLOBAL_ADMIN,
        sales_scope(),
        Some(for_hours(engine.now(), 2)),
    );

    let failed = engine
        .requests
        .submit(
            &user(ALICE),
            PROVIDER,
            ScheduleKind::Assignment,
            input.clone(),
            Some("activation-1".to_owned()),
        )
        .await;
    assert!(failed.as_ref().is_err_and(AppError::is_retryable));

    engine.store.fail_notifications(false);
    let retried = engine
        .requests
        .submit(
            &user(ALICE),
            PROVIDER,
            ScheduleKind::Assignment,
            input,
            Some("activation-1".to_owned()),
        )
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    assert_eq!(retried.status, RequestStatus::PendingApproval);
    let stored = engine
        .store
        .list_requests(PROVIDER, ScheduleKind::Assignment)
        .await
        .unwrap_or_default();
    assert_eq!(
        stored
            .iter()
            .filter(|request| request.status == RequestStatus::Failed)
            .count(),
        1
    );
    let approvals = engine
        .store
        .list_approvals(PROVIDER)
        .await
        .unwrap_or_default();
    assert!(
        approvals
            .iter()
            .any(|approval| approval.status == ApprovalStatus::Canceled)
    );
}

#[tokio::test]
async fn cancellation_covers_pending_and_provisioned_requests() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    engine.save_policy(approval_policy()).await;
    let pending = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let outsider = engine
        .requests
        .cancel(&user(CAROL), PROVIDER, ScheduleKind::Assignment, pending.id.as_str())
        .await;
    let canceled = engine
        .requests
        .cancel(&user(ALICE), PROVIDER, ScheduleKind::Assignment, pending.id.as_str())
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let again = engine
        .requests
        .cancel(&user(ALICE), PROVIDER, ScheduleKind::Assignment, pending.id.as_str())
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    assert!(matches!(outsider, Err(AppError::Forbidden(_))));
    assert_eq!(canceled.status, RequestStatus::Canceled);
    assert_eq!(again.status, RequestStatus::Canceled);

    let assigned = engine
        .submit(
            &admin(),
            ScheduleKind::Assignment,
            submission(
                RequestAction::AdminAssign,
                CAROL,
                GLOBAL_ADMIN,
                sales_scope(),
                Some(for_hours(engine.now(), 4)),
            ),
        )
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let revoked = engine
        .requests
        .cancel(&admin(), PROVIDER, ScheduleKind::Assignment, assigned.id.as_str())
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let schedule = engine
        .store
        .find_schedule(
            PROVIDER,
            ScheduleKind::Assignment,
            assigned.target_schedule_id.as_deref().unwrap_or_default(),
        )
        .await
        .ok()
        .flatten();

    assert_eq!(revoked.status, RequestStatus::Revoked);
    assert!(schedule.is_some_and(|schedule| schedule.status == ScheduleStatus::Revoked));
}

#[tokio::test]
async fn self_deactivation_ends_the_activation() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    let activation = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let deactivation = engine
        .submit(
            &user(ALICE),
            ScheduleKind::Assignment,
            submission(
                RequestAction::SelfDeactivate,
                ALICE,
                GLOBAL_ADMIN,
                sales_scope(),
                None,
            ),
        )
        .await
        .unwrap_or_else(|error| panic!("deactivation failed: {error}"));
    let permitted = engine
        .authorization
        .is_permitted(
            PROVIDER,
            &user(ALICE),
            role_management_action(PROVIDER),
            &sales_scope(),
        )
        .await;

    assert_eq!(deactivation.status, RequestStatus::Provisioned);
    assert_eq!(deactivation.target_schedule_id, activation.target_schedule_id);
    assert_eq!(permitted.ok(), Some(false));
}

#[tokio::test]
async fn removing_an_eligibility_revokes_its_activations() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    let activation = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let removal = engine
        .submit(
            &admin(),
            ScheduleKind::Eligibility,
            submission(
                RequestAction::AdminRemove,
                ALICE,
                GLOBAL_ADMIN,
                sales_scope(),
                None,
            ),
        )
        .await
        .unwrap_or_else(|error| panic!("removal failed: {error}"));
    let activated = engine
        .store
        .find_schedule(
            PROVIDER,
            ScheduleKind::Assignment,
            activation.target_schedule_id.as_deref().unwrap_or_default(),
        )
        .await
        .ok()
        .flatten();

    assert_eq!(removal.status, RequestStatus::Provisioned);
    assert!(activated.is_some_and(|schedule| schedule.status == ScheduleStatus::Revoked));
}

#[tokio::test]
async fn self_extension_falls_back_to_role_managers() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    let activation = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let extension = engine
        .submit(
            &user(ALICE),
            ScheduleKind::Assignment,
            submission(
                RequestAction::SelfExtend,
                ALICE,
                GLOBAL_ADMIN,
                sales_scope(),
                Some(for_hours(engine.now(), 4)),
            ),
        )
        .await
        .unwrap_or_else(|error| panic!("extension failed: {error}"));
    assert_eq!(extension.status, RequestStatus::PendingApproval);
    let approval = engine
        .requests
        .get_approval(&admin(), PROVIDER, extension.approval_id.as_deref().unwrap_or_default())
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(approval.approver_ids, vec![ADMIN.to_owned()]);

    let extended = engine
        .requests
        .decide(&admin(), PROVIDER, approval.id.as_str(), ReviewResult::Approve, None)
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let instances = engine
        .store
        .list_instances_for_schedule(
            PROVIDER,
            ScheduleKind::Assignment,
            activation.target_schedule_id.as_deref().unwrap_or_default(),
        )
        .await
        .unwrap_or_default();

    assert_eq!(extended.status, RequestStatus::Provisioned);
    assert_eq!(extended.target_schedule_id, activation.target_schedule_id);
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].end_date_time, Some(engine.now() + TimeDelta::hours(4)));
}

#[tokio::test]
async fn validation_only_requests_are_not_persisted() {
    let engine = Engine::seeded().await;
    let mut input = submission(
        RequestAction::AdminAssign,
        CAROL,
        GLOBAL_ADMIN,
        sales_scope(),
        Some(for_hours(engine.now(), 4)),
    );
    input.is_validation_only = true;

    let checked = engine
        .submit(&admin(), ScheduleKind::Assignment, input)
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let stored = engine
        .store
        .list_requests(PROVIDER, ScheduleKind::Assignment)
        .await
        .unwrap_or_default();

    assert_eq!(checked.status, RequestStatus::Granted);
    assert!(stored.is_empty());
}

#[tokio::test]
async fn requests_are_visible_to_subject_and_readers_only() {
    let engine = Engine::seeded().await;
    let assigned = engine
        .submit(
            &admin(),
            ScheduleKind::Assignment,
            submission(
                RequestAction::AdminAssign,
                BOB,
                GLOBAL_ADMIN,
                sales_scope(),
                Some(for_hours(engine.now(), 4)),
            ),
        )
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let subject = engine
        .requests
        .get_request(&user(BOB), PROVIDER, ScheduleKind::Assignment, assigned.id.as_str())
        .await;
    let outsider = engine
        .requests
        .get_request(&user(CAROL), PROVIDER, ScheduleKind::Assignment, assigned.id.as_str())
        .await;
    let wrong_kind = engine
        .requests
        .get_request(&admin(), PROVIDER, ScheduleKind::Eligibility, assigned.id.as_str())
        .await;

    assert!(subject.is_ok());
    assert!(matches!(outsider, Err(AppError::Forbidden(_))));
    assert!(matches!(wrong_kind, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn eligibility_requests_reject_self_activation() {
    let engine = Engine::seeded().await;

    let result = engine
        .submit(
            &user(ALICE),
            ScheduleKind::Eligibility,
            submission(
                RequestAction::SelfActivate,
                ALICE,
                GLOBAL_ADMIN,
                sales_scope(),
                Some(for_hours(engine.now(), 2)),
            ),
        )
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
}

async fn activation_schedule(engine: &Engine, schedule_id: Option<&str>) -> RoleSchedule {
    engine
        .store
        .find_schedule(
            PROVIDER,
            ScheduleKind::Assignment,
            schedule_id.unwrap_or_default(),
        )
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| panic!("activation schedule should exist"))
}

async fn update_alice_eligibility(engine: &Engine, info: ScheduleInfo) -> AppResult<ScheduleRequest> {
    engine
        .submit(
            &admin(),
            ScheduleKind::Eligibility,
            submission(
                RequestAction::AdminUpdate,
                ALICE,
                GLOBAL_ADMIN,
                sales_scope(),
                Some(info),
            ),
        )
        .await
}

#[tokio::test]
async fn admin_extension_cannot_outlast_the_eligibility() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    let activation = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let result = engine
        .submit(
            &admin(),
            ScheduleKind::Assignment,
            submission(
                RequestAction::AdminExtend,
                ALICE,
                GLOBAL_ADMIN,
                sales_scope(),
                Some(ScheduleInfo::starting_at(
                    engine.now(),
                    Expiration::at(engine.now() + TimeDelta::days(365)),
                )),
            ),
        )
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    let schedule = activation_schedule(&engine, activation.target_schedule_id.as_deref()).await;
    assert_eq!(schedule.status, ScheduleStatus::Provisioned);
    assert_eq!(
        schedule.window().end_date_time,
        Some(engine.now() + TimeDelta::hours(2))
    );
}

#[tokio::test]
async fn extension_within_the_eligibility_is_provisioned() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    let activation = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let extension = engine
        .submit(
            &admin(),
            ScheduleKind::Assignment,
            submission(
                RequestAction::AdminExtend,
                ALICE,
                GLOBAL_ADMIN,
                sales_scope(),
                Some(ScheduleInfo::starting_at(
                    engine.now(),
                    Expiration::at(engine.now() + TimeDelta::days(29)),
                )),
            ),
        )
        .await
        .unwrap_or_else(|error| panic!("extension failed: {error}"));

    assert_eq!(extension.status, RequestStatus::Provisioned);
    let schedule = activation_schedule(&engine, activation.target_schedule_id.as_deref()).await;
    assert_eq!(
        schedule.window().end_date_time,
        Some(engine.now() + TimeDelta::days(29))
    );
}

#[tokio::test]
async fn shortening_an_eligibility_clips_its_activations() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    let activation = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 8)
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let new_end = engine.now() + TimeDelta::hours(1);

    let update = update_alice_eligibility(
        &engine,
        ScheduleInfo::starting_at(engine.now(), Expiration::at(new_end)),
    )
    .await
    .unwrap_or_else(|error| panic!("update failed: {error}"));

    assert_eq!(update.status, RequestStatus::Provisioned);
    let schedule = activation_schedule(&engine, activation.target_schedule_id.as_deref()).await;
    assert_eq!(schedule.status, ScheduleStatus::UpdateApplied);
    assert_eq!(schedule.window().end_date_time, Some(new_end));
    let instances = engine
        .store
        .list_instances_for_schedule(PROVIDER, ScheduleKind::Assignment, schedule.id.as_str())
        .await
        .unwrap_or_default();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].end_date_time, Some(new_end));
    assert!(
        engine
            .store
            .events()
            .await
            .iter()
            .any(|record| record.event.action == AuditAction::ScheduleClipped
                && record.event.subject == schedule.id)
    );
}

#[tokio::test]
async fn moving_an_eligibility_past_an_activation_revokes_it() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;
    let activation = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    update_alice_eligibility(
        &engine,
        ScheduleInfo::starting_at(
            engine.now() + TimeDelta::hours(4),
            Expiration::after(IsoDuration::days(30)),
        ),
    )
    .await
    .unwrap_or_else(|error| panic!("update failed: {error}"));

    let schedule = activation_schedule(&engine, activation.target_schedule_id.as_deref()).await;
    assert_eq!(schedule.status, ScheduleStatus::Revoked);
    let origin = engine
        .store
        .find_request(PROVIDER, ScheduleKind::Assignment, activation.id.as_str())
        .await
        .ok()
        .flatten();
    assert!(origin.is_some_and(|request| request.status == RequestStatus::Revoked));
}

#[tokio::test]
async fn expiring_an_eligibility_expires_its_activations() {
    let engine = Engine::seeded().await;
    engine
        .make_eligible(
            ALICE,
            GLOBAL_ADMIN,
            sales_scope(),
            Expiration::after(IsoDuration::hours(4)),
        )
        .await;
    let activation = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), 2)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    engine.advance(TimeDelta::hours(5));
    let report = engine
        .controller
        .tick(PROVIDER, TickerShard::all())
        .await
        .unwrap_or_else(|error| panic!("tick failed: {error}"));

    assert_eq!(report.schedules_expired, 2);
    let schedule = activation_schedule(&engine, activation.target_schedule_id.as_deref()).await;
    assert_eq!(schedule.status, ScheduleStatus::Expired);
}

#[tokio::test]
async fn oversized_durations_are_rejected_without_panicking() {
    let engine = Engine::seeded().await;
    eligible_alice(&engine).await;

    let parsed = "P999999999D".parse::<IsoDuration>();

    assert!(matches!(parsed, Err(AppError::Validation(_))));
    let result = engine
        .activate(ALICE, GLOBAL_ADMIN, sales_scope(), u32::MAX)
        .await;
    assert!(result.is_err());
}
