use serde::{Deserialize, Serialize};
use warden_application::{CreateResourceActionInput, CreateRoleAssignmentInput};
use warden_core::AppError;
use warden_domain::{EffectivePermissions, RolePermission, RoleScope};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleAssignmentRequest {
    pub principal_id: String,
    pub role_definition_id: String,
    #[serde(default)]
    pub directory_scope_id: Option<String>,
    #[serde(default)]
    pub app_scope_id: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

impl TryFrom<CreateRoleAssignmentRequest> for CreateRoleAssignmentInput {
    type Error = AppError;

    fn try_from(value: CreateRoleAssignmentRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            principal_id: value.principal_id,
            role_definition_id: value.role_definition_id,
            scope: RoleScope::from_parts(value.directory_scope_id, value.app_scope_id)?,
            condition: value.condition,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceNamespaceRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceActionRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_privileged: bool,
}

impl From<CreateResourceActionRequest> for CreateResourceActionInput {
    fn from(value: CreateResourceActionRequest) -> Self {
        Self {
            id: value.id,
            name: value.name,
            description: value.description,
            is_privileged: value.is_privileged,
        }
    }
}

/// Flattened permission closure of a role definition.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePermissionsResponse {
    #[serde(rename = "@odata.context")]
    pub context: String,
    pub role_definition_id: String,
    pub inheritance_closure: Vec<String>,
    pub role_permissions: Vec<RolePermission>,
    pub allowed_resource_actions: Vec<String>,
    pub excluded_resource_actions: Vec<String>,
}

impl EffectivePermissionsResponse {
    pub fn new(context: String, permissions: &EffectivePermissions) -> Self {
        Self {
            context,
            role_definition_id: permissions.role_definition_id.clone(),
            inheritance_closure: permissions.closure.clone(),
            role_permissions: permissions.blocks.clone(),
            allowed_resource_actions: permissions.actions().into_iter().collect(),
            excluded_resource_actions: permissions.exclusions().into_iter().collect(),
        }
    }
}
