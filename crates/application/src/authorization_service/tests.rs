use chrono::TimeDelta;
use warden_core::{AppError, CallerIdentity};
use warden_domain::{
    RequestAction, RequestStatus, RoleAssignment, RoleScope, ScheduleKind,
    role_management_action,
};

use crate::role_management_ports::{RoleAssignmentRepository, RoleDefinitionRepository};
use crate::test_support::{
    ADMIN, ALICE, BOB, CAROL, Engine, GLOBAL_ADMIN, OPS_GROUP, PROVIDER, ROLE_READER, USER_READER,
    USERS_READ, admin, epoch, for_hours, sales_scope, submission, user,
};

fn assignment(
    id: &str,
    principal_id: &str,
    role_definition_id: &str,
    scope: RoleScope,
) -> RoleAssignment {
    RoleAssignment {
        id: id.to_owned(),
        principal_id: principal_id.to_owned(),
        role_definition_id: role_definition_id.to_owned(),
        scope,
        condition: None,
        created_date_time: epoch(),
        schedule_id: None,
    }
}

#[tokio::test]
async fn root_assignment_covers_nested_scopes() {
    let engine = Engine::seeded().await;
    let action = role_management_action(PROVIDER);

    let at_sales = engine
        .authorization
        .is_permitted(PROVIDER, &admin(), action, &sales_scope())
        .await;
    let alice_at_root = engine
        .authorization
        .is_permitted(PROVIDER, &user(ALICE), action, &RoleScope::root())
        .await;

    assert_eq!(at_sales.ok(), Some(true));
    assert_eq!(alice_at_root.ok(), Some(false));
}

#[tokio::test]
async fn scoped_assignment_does_not_reach_the_root() {
    let engine = Engine::seeded().await;
    let stored = engine
        .store
        .insert_role_assignment(
            PROVIDER,
            assignment("bob-sales", BOB, GLOBAL_ADMIN, sales_scope()),
        )
        .await;
    assert!(stored.is_ok());

    let at_sales = engine
        .authorization
        .require_role_management(PROVIDER, &user(BOB), &sales_scope())
        .await;
    let at_root = engine
        .authorization
        .require_role_management(PROVIDER, &user(BOB), &RoleScope::root())
        .await;

    assert!(at_sales.is_ok());
    assert!(matches!(at_root, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn group_holdings_apply_to_members() {
    let engine = Engine::seeded().await;
    let stored = engine
        .store
        .insert_role_assignment(
            PROVIDER,
            assignment("ops-reader", OPS_GROUP, ROLE_READER, RoleScope::root()),
        )
        .await;
    assert!(stored.is_ok());

    let alice = engine
        .authorization
        .can_read_scope(PROVIDER, &user(ALICE), &sales_scope())
        .await;
    let bob = engine
        .authorization
        .can_read_scope(PROVIDER, &user(BOB), &sales_scope())
        .await;
    let holdings = engine
        .authorization
        .holdings(PROVIDER, ALICE)
        .await
        .unwrap_or_default();

    assert_eq!(alice.ok(), Some(true));
    assert_eq!(bob.ok(), Some(false));
    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].holder_id, OPS_GROUP);
}

#[tokio::test]
async fn active_assignment_instances_grant_until_they_end() {
    let engine = Engine::seeded().await;
    let request = engine
        .submit(
            &admin(),
            ScheduleKind::Assignment,
            submission(
                RequestAction::AdminAssign,
                CAROL,
                USER_READER,
                sales_scope(),
                Some(for_hours(engine.now(), 1)),
            ),
        )
        .await
        .unwrap_or_else(|error| panic!("assignment failed: {error}"));
    assert_eq!(request.status, RequestStatus::Provisioned);

    let carol = user(CAROL);
    let during = engine
        .authorization
        .is_permitted(PROVIDER, &carol, USERS_READ, &sales_scope())
        .await;
    engine.advance(TimeDelta::hours(2));
    let after = engine
        .authorization
        .is_permitted(PROVIDER, &carol, USERS_READ, &sales_scope())
        .await;

    assert_eq!(during.ok(), Some(true));
    assert_eq!(after.ok(), Some(false));
}

#[tokio::test]
async fn disabled_roles_grant_nothing() {
    let engine = Engine::seeded().await;
    let stored = engine
        .store
        .insert_role_assignment(
            PROVIDER,
            assignment("carol-reader", CAROL, USER_READER, RoleScope::root()),
        )
        .await;
    assert!(stored.is_ok());

    let mut definition = engine
        .registry
        .find(PROVIDER, USER_READER)
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    definition.is_enabled = false;
    let revision = engine
        .registry
        .revision(PROVIDER)
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(
        engine
            .store
            .save_role_definition(PROVIDER, definition, revision)
            .await
            .is_ok()
    );

    let permitted = engine
        .authorization
        .is_permitted(PROVIDER, &user(CAROL), USERS_READ, &RoleScope::root())
        .await;

    assert_eq!(permitted.ok(), Some(false));
}

#[tokio::test]
async fn system_caller_bypasses_checks() {
    let engine = Engine::seeded().await;

    let permitted = engine
        .authorization
        .is_permitted(
            PROVIDER,
            &CallerIdentity::system(),
            role_management_action(PROVIDER),
            &RoleScope::App("payroll".to_owned()),
        )
        .await;

    assert_eq!(permitted.ok(), Some(true));
}

#[tokio::test]
async fn role_managers_expand_groups() {
    let engine = Engine::seeded().await;
    let stored = engine
        .store
        .insert_role_assignment(
            PROVIDER,
            assignment("ops-admin", OPS_GROUP, GLOBAL_ADMIN, sales_scope()),
        )
        .await;
    assert!(stored.is_ok());

    let at_sales = engine
        .authorization
        .list_role_managers(PROVIDER, &sales_scope())
        .await
        .unwrap_or_default();
    let at_root = engine
        .authorization
        .list_role_managers(PROVIDER, &RoleScope::root())
        .await
        .unwrap_or_default();

    assert!(at_sales.contains(ADMIN));
    assert!(at_sales.contains(ALICE));
    assert!(!at_sales.contains(OPS_GROUP));
    assert_eq!(at_root.into_iter().collect::<Vec<_>>(), vec![ADMIN.to_owned()]);
}
