use std::collections::BTreeSet;

use tracing::info;
use warden_application::{RoleDefinitionRepository, SubmitScheduleRequestInput};
use warden_core::{AppError, AppResult, CallerIdentity, RbacProvider};
use warden_domain::{
    AppScope, ApproverKind, ApproverRef, DirectoryObject, IsoDuration, Principal, PrincipalKind,
    RequestAction, RoleDefinitionInput, RoleManagementPolicy, RolePermission, RoleScope,
    ScheduleKind,
};

use crate::bootstrap::{ensure_action, ensure_namespace, grant_bootstrap_admin};
use crate::state::AppState;

const DEV_SEED_ADMIN_ID: &str = "alice";
const DEV_SEED_ADMIN_DISPLAY_NAME: &str = "Alice Admin";
const DEV_SEED_HELPDESK_USER_ID: &str = "bob";
const DEV_SEED_APPROVER_ID: &str = "carol";
const DEV_SEED_APPROVER_GROUP_ID: &str = "helpdesk-approvers";

const DEV_SEED_ADMINISTRATIVE_UNIT_ID: &str = "au-emea";
const DEV_SEED_APP_SCOPE_ID: &str = "app-billing";

const HELPDESK_ADMINISTRATOR_ROLE_ID: &str = "729827e3-9c14-49f7-bb1b-9608f156bbb8";
const USER_ADMINISTRATOR_ROLE_ID: &str = "fe930be7-5e62-47db-91af-98c3a49a38b1";

const DIRECTORY_NAMESPACE: &str = "microsoft.directory";
const DIRECTORY_ACTIONS: [(&str, &str); 4] = [
    (
        "microsoft.directory/users/password/update",
        "Reset passwords of users.",
    ),
    (
        "microsoft.directory/users/basic/update",
        "Update basic properties of users.",
    ),
    (
        "microsoft.directory/users/create",
        "Create users.",
    ),
    (
        "microsoft.directory/groups/members/update",
        "Update group memberships.",
    ),
];

/// Seeds a small demo directory, catalog, built-in roles, policies and one eligibility.
pub async fn run(state: &AppState) -> AppResult<()> {
    seed_directory(state).await?;
    grant_bootstrap_admin(state, DEV_SEED_ADMIN_ID).await?;

    let provider = RbacProvider::Directory;
    let namespace = ensure_namespace(state, provider, DIRECTORY_NAMESPACE).await?;
    for (name, description) in DIRECTORY_ACTIONS {
        ensure_action(state, provider, &namespace, name, description).await?;
    }

    ensure_built_in(
        state,
        provider,
        HELPDESK_ADMINISTRATOR_ROLE_ID,
        RoleDefinitionInput {
            display_name: "Helpdesk Administrator".to_owned(),
            description: "Can reset passwords for non-administrators.".to_owned(),
            is_enabled: true,
            template_id: None,
            role_permissions: vec![RolePermission::new(
                ["microsoft.directory/users/password/update"],
                Vec::<String>::new(),
            )],
            inherits_permissions_from: BTreeSet::new(),
        },
    )
    .await?;
    ensure_built_in(
        state,
        provider,
        USER_ADMINISTRATOR_ROLE_ID,
        RoleDefinitionInput {
            display_name: "User Administrator".to_owned(),
            description: "Can manage all aspects of users and groups.".to_owned(),
            is_enabled: true,
            template_id: None,
            role_permissions: vec![RolePermission::new(
                ["microsoft.directory/users/*", "microsoft.directory/groups/*"],
                ["microsoft.directory/users/password/update"],
            )],
            inherits_permissions_from: BTreeSet::from([HELPDESK_ADMINISTRATOR_ROLE_ID.to_owned()]),
        },
    )
    .await?;

    let admin = CallerIdentity::new(DEV_SEED_ADMIN_ID, DEV_SEED_ADMIN_DISPLAY_NAME).with_mfa(true);
    let mut helpdesk_policy = RoleManagementPolicy::default_for(HELPDESK_ADMINISTRATOR_ROLE_ID);
    helpdesk_policy.justification_required = true;
    state
        .approvals
        .save_policy(&admin, provider, helpdesk_policy)
        .await?;

    let mut user_admin_policy = RoleManagementPolicy::default_for(USER_ADMINISTRATOR_ROLE_ID);
    user_admin_policy.approval_required = true;
    user_admin_policy.approvers = vec![ApproverRef {
        kind: ApproverKind::Group,
        id: DEV_SEED_APPROVER_GROUP_ID.to_owned(),
    }];
    user_admin_policy.mfa_required = true;
    user_admin_policy.justification_required = true;
    user_admin_policy.maximum_duration = IsoDuration::hours(4);
    state
        .approvals
        .save_policy(&admin, provider, user_admin_policy)
        .await?;

    for role_definition_id in [HELPDESK_ADMINISTRATOR_ROLE_ID, USER_ADMINISTRATOR_ROLE_ID] {
        seed_eligibility(state, &admin, provider, role_definition_id).await?;
    }

    info!(
        admin = DEV_SEED_ADMIN_ID,
        eligible = DEV_SEED_HELPDESK_USER_ID,
        "development seed completed"
    );
    Ok(())
}

async fn seed_directory(state: &AppState) -> AppResult<()> {
    for (id, kind, display_name) in [
        (DEV_SEED_ADMIN_ID, PrincipalKind::User, DEV_SEED_ADMIN_DISPLAY_NAME),
        (DEV_SEED_HELPDESK_USER_ID, PrincipalKind::User, "Bob Helpdesk"),
        (DEV_SEED_APPROVER_ID, PrincipalKind::User, "Carol Approver"),
        (
            DEV_SEED_APPROVER_GROUP_ID,
            PrincipalKind::Group,
            "Helpdesk approvers",
        ),
    ] {
        state
            .directory
            .register_principal(Principal::new(id, kind, display_name)?)
            .await?;
    }
    state
        .directory
        .add_group_member(DEV_SEED_APPROVER_GROUP_ID, DEV_SEED_APPROVER_ID)
        .await?;

    state
        .directory
        .register_directory_object(DirectoryObject {
            id: DEV_SEED_ADMINISTRATIVE_UNIT_ID.to_owned(),
            display_name: "EMEA".to_owned(),
            object_type: "administrativeUnit".to_owned(),
            parent_id: None,
        })
        .await?;
    state
        .directory
        .register_directory_object(DirectoryObject {
            id: DEV_SEED_HELPDESK_USER_ID.to_owned(),
            display_name: "Bob Helpdesk".to_owned(),
            object_type: "user".to_owned(),
            parent_id: Some(DEV_SEED_ADMINISTRATIVE_UNIT_ID.to_owned()),
        })
        .await?;
    state
        .directory
        .register_app_scope(AppScope {
            id: DEV_SEED_APP_SCOPE_ID.to_owned(),
            display_name: "Billing".to_owned(),
            scope_type: "application".to_owned(),
        })
        .await
}

async fn ensure_built_in(
    state: &AppState,
    provider: RbacProvider,
    id: &str,
    input: RoleDefinitionInput,
) -> AppResult<()> {
    if state
        .ports
        .definitions
        .find_role_definition(provider, id)
        .await?
        .is_some()
    {
        return Ok(());
    }

    state
        .role_definitions
        .register_built_in(provider, id, input)
        .await?;
    Ok(())
}

async fn seed_eligibility(
    state: &AppState,
    admin: &CallerIdentity,
    provider: RbacProvider,
    role_definition_id: &str,
) -> AppResult<()> {
    let input = SubmitScheduleRequestInput {
        action: RequestAction::AdminAssign,
        principal_id: DEV_SEED_HELPDESK_USER_ID.to_owned(),
        role_definition_id: role_definition_id.to_owned(),
        scope: RoleScope::Directory(format!(
            "/administrativeUnits/{DEV_SEED_ADMINISTRATIVE_UNIT_ID}"
        )),
        justification: Some("Development seed".to_owned()),
        ticket_info: None,
        schedule_info: None,
        target_schedule_id: None,
        is_validation_only: false,
    };
    let client_request_id = format!("dev-seed-{DEV_SEED_HELPDESK_USER_ID}-{role_definition_id}");

    match state
        .schedule_requests
        .submit(
            admin,
            provider,
            ScheduleKind::Eligibility,
            input,
            Some(client_request_id),
        )
        .await
    {
        Ok(request) => {
            info!(
                request_id = %request.id,
                role_definition_id,
                "seeded eligibility request"
            );
            Ok(())
        }
        Err(AppError::Conflict(detail)) => {
            info!(role_definition_id, detail, "eligibility already seeded");
            Ok(())
        }
        Err(error) => Err(error),
    }
}
