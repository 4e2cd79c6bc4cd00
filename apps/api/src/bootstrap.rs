//! Start-up provisioning of the role-management catalog and the bootstrap administrator.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;
use warden_application::{RoleAssignmentRepository, RoleDefinitionRepository};
use warden_core::{AppError, AppResult, RbacProvider};
use warden_domain::{
    Principal, PrincipalKind, ResourceAction, ResourceNamespace, RoleAssignment,
    RoleDefinitionInput, RolePermission, RoleScope, role_management_action,
    role_management_read_action,
};

use crate::state::AppState;

/// Template id of the built-in Global Administrator role.
pub const GLOBAL_ADMINISTRATOR_ROLE_ID: &str = "62e90394-69f5-4237-9190-012177145e10";

/// Ensures every provider has its namespace, the role-management actions and Global Administrator.
pub async fn ensure_role_management_catalog(state: &AppState) -> AppResult<()> {
    for provider in RbacProvider::all().iter().copied() {
        let manage = role_management_action(provider);
        let namespace = ensure_namespace(state, provider, namespace_of(manage)?).await?;
        ensure_action(
            state,
            provider,
            &namespace,
            manage,
            "Manage all aspects of role management.",
        )
        .await?;
        ensure_action(
            state,
            provider,
            &namespace,
            role_management_read_action(provider),
            "Read role definitions, assignments and schedules.",
        )
        .await?;

        let existing = state
            .ports
            .definitions
            .find_role_definition(provider, GLOBAL_ADMINISTRATOR_ROLE_ID)
            .await?;
        if existing.is_none() {
            state
                .role_definitions
                .register_built_in(
                    provider,
                    GLOBAL_ADMINISTRATOR_ROLE_ID,
                    global_administrator(provider),
                )
                .await?;
            info!(provider = %provider, "registered built-in Global Administrator role");
        }
    }

    Ok(())
}

/// Grants the principal a persistent Global Administrator assignment at the tenant root.
pub async fn grant_bootstrap_admin(state: &AppState, principal_id: &str) -> AppResult<()> {
    match state.directory.principal(principal_id).await {
        Ok(_) => {}
        Err(AppError::NotFound(_)) => {
            state
                .directory
                .register_principal(Principal::new(
                    principal_id,
                    PrincipalKind::User,
                    principal_id,
                )?)
                .await?;
        }
        Err(error) => return Err(error),
    }

    for provider in RbacProvider::all().iter().copied() {
        let assignment = state
            .ports
            .assignments
            .insert_role_assignment(
                provider,
                RoleAssignment {
                    id: Uuid::new_v4().to_string(),
                    principal_id: principal_id.to_owned(),
                    role_definition_id: GLOBAL_ADMINISTRATOR_ROLE_ID.to_owned(),
                    scope: RoleScope::root(),
                    condition: None,
                    created_date_time: Utc::now(),
                    schedule_id: None,
                },
            )
            .await?;
        info!(
            provider = %provider,
            principal_id,
            assignment_id = %assignment.id,
            "bootstrap administrator assignment ensured"
        );
    }

    Ok(())
}

fn global_administrator(provider: RbacProvider) -> RoleDefinitionInput {
    RoleDefinitionInput {
        display_name: "Global Administrator".to_owned(),
        description: "Can manage all aspects of role management.".to_owned(),
        is_enabled: true,
        template_id: Some(GLOBAL_ADMINISTRATOR_ROLE_ID.to_owned()),
        role_permissions: vec![RolePermission::new(
            [
                role_management_action(provider),
                role_management_read_action(provider),
            ],
            Vec::<String>::new(),
        )],
        inherits_permissions_from: BTreeSet::new(),
    }
}

fn namespace_of(action: &str) -> AppResult<&str> {
    action
        .split_once('/')
        .map(|(namespace, _)| namespace)
        .ok_or_else(|| AppError::Internal(format!("action '{action}' has no namespace")))
}

pub(crate) async fn ensure_namespace(
    state: &AppState,
    provider: RbacProvider,
    name: &str,
) -> AppResult<ResourceNamespace> {
    let definitions = &state.ports.definitions;
    if let Some(namespace) = definitions.find_resource_namespace(provider, name).await? {
        return Ok(namespace);
    }

    let namespace = ResourceNamespace::new(name)?;
    definitions
        .create_resource_namespace(provider, namespace.clone())
        .await?;

    Ok(namespace)
}

pub(crate) async fn ensure_action(
    state: &AppState,
    provider: RbacProvider,
    namespace: &ResourceNamespace,
    name: &str,
    description: &str,
) -> AppResult<()> {
    let definitions = &state.ports.definitions;
    let exists = definitions
        .list_resource_actions(provider, Some(namespace.id.as_str()))
        .await?
        .iter()
        .any(|action| action.name == name);
    if exists {
        return Ok(());
    }

    let action = ResourceAction::new(
        Uuid::new_v4().to_string(),
        namespace,
        name,
        description,
        true,
    )?;
    definitions.create_resource_action(provider, action).await
}
