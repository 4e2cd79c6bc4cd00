use warden_application::{CreateRoleAssignmentInput, SubmitScheduleRequestInput};
use warden_domain::RoleDefinitionInput;

use super::paths::Segment;
use super::reads::{RESOURCE_ACTIONS, resource_actions_address};
use super::*;
use crate::dto::{
    ApprovalDecisionRequest, CorrectRequestMetadataRequest, CreateResourceActionRequest,
    CreateResourceNamespaceRequest, CreateRoleAssignmentRequest, SubmitScheduleRequestRequest,
};
use crate::middleware::header_text;

const CANCEL: &str = "cancel";
const DECISIONS: &str = "decisions";

/// `POST /{collection}`
pub async fn create_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(path): Path<CollectionPath>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let target = Target::parse(&path.provider, &path.collection)?;
    let provider = target.provider;
    let context = target.entity_context()?;

    match target.collection {
        RoleManagementCollection::RoleDefinitions => {
            let input: RoleDefinitionInput = json_body(&body)?;
            let definition = state
                .role_definitions
                .create_role_definition(&caller, provider, input)
                .await?;

            entity_response(StatusCode::CREATED, context, &definition)
        }
        RoleManagementCollection::RoleAssignments => {
            let request: CreateRoleAssignmentRequest = json_body(&body)?;
            let input = CreateRoleAssignmentInput::try_from(request)?;
            let assignment = state
                .role_assignments
                .create_role_assignment(&caller, provider, input)
                .await?;

            entity_response(StatusCode::CREATED, context, &assignment)
        }
        RoleManagementCollection::Requests(kind) => {
            let request: SubmitScheduleRequestRequest = json_body(&body)?;
            let input = SubmitScheduleRequestInput::try_from(request)?;
            let client_request_id =
                header_text(&headers, IDEMPOTENCY_KEY_HEADER).map(str::to_owned);
            let submitted = state
                .schedule_requests
                .submit(&caller, provider, kind, input, client_request_id)
                .await?;

            entity_response(StatusCode::CREATED, context, &submitted)
        }
        RoleManagementCollection::ResourceNamespaces => {
            let request: CreateResourceNamespaceRequest = json_body(&body)?;
            let namespace = state
                .role_definitions
                .create_resource_namespace(&caller, provider, request.name.as_str())
                .await?;

            entity_response(StatusCode::CREATED, context, &namespace)
        }
        collection => Err(AppError::NotSupported(format!(
            "'{}' does not accept new entities",
            collection.as_str()
        ))
        .into()),
    }
}

/// `PATCH /{collection}/{id}`
pub async fn update_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(path): Path<EntityPath>,
    body: Bytes,
) -> ApiResult<Response> {
    let target = Target::parse(&path.provider, &path.collection)?;
    let provider = target.provider;
    let id = Segment::parse(&path.segment)?.into_key()?;
    let context = target.entity_context()?;

    match target.collection {
        RoleManagementCollection::RoleDefinitions => {
            let input: RoleDefinitionInput = json_body(&body)?;
            let definition = state
                .role_definitions
                .update_role_definition(&caller, provider, &id, input)
                .await?;

            entity_response(StatusCode::OK, context, &definition)
        }
        RoleManagementCollection::Requests(kind) => {
            let request: CorrectRequestMetadataRequest = json_body(&body)?;
            let corrected = state
                .schedule_requests
                .correct_metadata(
                    &caller,
                    provider,
                    kind,
                    &id,
                    request.justification,
                    request.ticket_info,
                )
                .await?;

            entity_response(StatusCode::OK, context, &corrected)
        }
        collection => Err(AppError::NotSupported(format!(
            "'{}' entities cannot be updated",
            collection.as_str()
        ))
        .into()),
    }
}

/// `DELETE /{collection}/{id}`
pub async fn delete_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(path): Path<EntityPath>,
) -> ApiResult<StatusCode> {
    let target = Target::parse(&path.provider, &path.collection)?;
    let id = Segment::parse(&path.segment)?.into_key()?;

    match target.collection {
        RoleManagementCollection::RoleDefinitions => {
            state
                .role_definitions
                .delete_role_definition(&caller, target.provider, &id)
                .await?;
        }
        RoleManagementCollection::RoleAssignments => {
            state
                .role_assignments
                .delete_role_assignment(&caller, target.provider, &id)
                .await?;
        }
        collection => {
            return Err(AppError::NotSupported(format!(
                "'{}' entities cannot be deleted; submit a removal request instead",
                collection.as_str()
            ))
            .into());
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// `POST /{collection}/{id}/{action}`: request cancellation, approval decisions and
/// resource action creation.
pub async fn action_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(path): Path<NavigationPath>,
    body: Bytes,
) -> ApiResult<Response> {
    let target = Target::parse(&path.provider, &path.collection)?;
    let provider = target.provider;
    let id = Segment::parse(&path.segment)?.into_key()?;

    match (target.collection, path.navigation.as_str()) {
        (RoleManagementCollection::Requests(kind), CANCEL) => {
            let canceled = state
                .schedule_requests
                .cancel(&caller, provider, kind, &id)
                .await?;

            entity_response(StatusCode::OK, target.entity_context()?, &canceled)
        }
        (RoleManagementCollection::Approvals, DECISIONS) => {
            let decision: ApprovalDecisionRequest = json_body(&body)?;
            let request = state
                .schedule_requests
                .decide(
                    &caller,
                    provider,
                    &id,
                    decision.review_result,
                    decision.justification,
                )
                .await?;
            let context = entity_context(
                &target
                    .address()
                    .collection(RoleManagementCollection::Requests(request.kind)),
            )?;

            entity_response(StatusCode::OK, context, &request)
        }
        (RoleManagementCollection::ResourceNamespaces, RESOURCE_ACTIONS) => {
            let request: CreateResourceActionRequest = json_body(&body)?;
            let action = state
                .role_definitions
                .create_resource_action(&caller, provider, &id, request.into())
                .await?;
            let context = entity_context(&resource_actions_address(target, &id))?;

            entity_response(StatusCode::CREATED, context, &action)
        }
        (collection, action) => Err(AppError::NotSupported(format!(
            "'{}' has no action '{action}'",
            collection.as_str()
        ))
        .into()),
    }
}
