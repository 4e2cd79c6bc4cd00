use warden_application::CurrentUserRole;
use warden_domain::OrderBy;

use super::paths::{COUNT_SEGMENT, Segment};
use super::*;
use crate::dto::EffectivePermissionsResponse;

const INHERITS_PERMISSIONS_FROM: &str = "inheritsPermissionsFrom";
const EFFECTIVE_PERMISSIONS: &str = "effectivePermissions";
pub(super) const RESOURCE_ACTIONS: &str = "resourceActions";

/// `GET /{collection}`
pub async fn list_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(path): Path<CollectionPath>,
    Query(parameters): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let target = Target::parse(&path.provider, &path.collection)?;
    let options = query_options(&parameters)?;

    list_collection(&state, &caller, target, &options, None).await
}

/// `GET /{collection}/{id|$count|filterByCurrentUser(on='…')}`
pub async fn segment_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(path): Path<EntityPath>,
    Query(parameters): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let target = Target::parse(&path.provider, &path.collection)?;
    let options = query_options(&parameters)?;

    match Segment::parse(&path.segment)? {
        Segment::Count => count_collection(&state, &caller, target, &options, None).await,
        Segment::FilterByCurrentUser(on) => {
            list_collection(&state, &caller, target, &options, Some(on)).await
        }
        Segment::Key(id) => get_entity(&state, &caller, target, &id, &options).await,
    }
}

/// `GET /{collection}/{id}/{navigation}` and `GET /{collection}/filterByCurrentUser(…)/$count`
pub async fn navigation_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(path): Path<NavigationPath>,
    Query(parameters): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let target = Target::parse(&path.provider, &path.collection)?;
    let options = query_options(&parameters)?;
    let provider = target.provider;
    let id = match Segment::parse(&path.segment)? {
        Segment::FilterByCurrentUser(on) if path.navigation == COUNT_SEGMENT => {
            return count_collection(&state, &caller, target, &options, Some(on)).await;
        }
        segment => segment.into_key()?,
    };

    match (target.collection, path.navigation.as_str()) {
        (RoleManagementCollection::RoleDefinitions, INHERITS_PERMISSIONS_FROM) => {
            let parents = state
                .role_definitions
                .list_inherits_permissions_from(provider, &id)
                .await?;
            let page = state
                .queries
                .page(&parents, &options, &OrderBy::ascending("displayName"))?;
            let context = target.address().inherits_permissions_from(&id).odata_context()?;

            Ok(collection_response(context, page))
        }
        (RoleManagementCollection::RoleDefinitions, EFFECTIVE_PERMISSIONS) => {
            let permissions = state
                .role_definitions
                .effective_permissions(provider, &id)
                .await?;
            let context = target
                .address()
                .role_definition(&id)
                .join(EFFECTIVE_PERMISSIONS)
                .odata_context()?;

            Ok(Json(EffectivePermissionsResponse::new(context, &permissions)).into_response())
        }
        (RoleManagementCollection::ResourceNamespaces, RESOURCE_ACTIONS) => {
            let actions = state
                .role_definitions
                .list_resource_actions(provider, &id)
                .await?;
            let page = state
                .queries
                .page(&actions, &options, &OrderBy::ascending("name"))?;
            let context = resource_actions_address(target, &id).odata_context()?;

            Ok(collection_response(context, page))
        }
        (collection, navigation) => {
            let referent = state
                .queries
                .navigate(&caller, provider, collection, &id, navigation)
                .await?;

            Ok(Json(referent).into_response())
        }
    }
}

/// `GET /roleDefinitions/{id}/inheritsPermissionsFrom/{parentId|$count}` and
/// `GET /resourceNamespaces/{id}/resourceActions/{actionId}`
pub async fn nested_handler(
    State(state): State<AppState>,
    Extension(_caller): Extension<CallerIdentity>,
    Path(path): Path<NestedPath>,
) -> ApiResult<Response> {
    let target = Target::parse(&path.provider, &path.collection)?;
    let provider = target.provider;
    let id = Segment::parse(&path.segment)?.into_key()?;

    match (
        target.collection,
        path.navigation.as_str(),
        path.item.as_str(),
    ) {
        (RoleManagementCollection::RoleDefinitions, INHERITS_PERMISSIONS_FROM, COUNT_SEGMENT) => {
            let count = state
                .role_definitions
                .count_inherits_permissions_from(provider, &id)
                .await?;

            Ok(count_response(count))
        }
        (RoleManagementCollection::RoleDefinitions, INHERITS_PERMISSIONS_FROM, parent_id) => {
            let parent = state
                .role_definitions
                .get_inherits_permissions_from(provider, &id, parent_id)
                .await?;
            let context = entity_context(&target.address().inherits_permissions_from(&id))?;

            entity_response(StatusCode::OK, context, &parent)
        }
        (RoleManagementCollection::ResourceNamespaces, RESOURCE_ACTIONS, action_id) => {
            let action = state
                .role_definitions
                .get_resource_action(provider, &id, action_id)
                .await?;
            let context = entity_context(&resource_actions_address(target, &id))?;

            entity_response(StatusCode::OK, context, &action)
        }
        (collection, navigation, _) => Err(AppError::NotFound(format!(
            "'{}/{id}/{navigation}' is not a collection-valued navigation",
            collection.as_str()
        ))
        .into()),
    }
}

pub(super) fn resource_actions_address(target: Target, namespace_id: &str) -> ResourceAddress {
    target
        .address()
        .entity(RoleManagementCollection::ResourceNamespaces, namespace_id)
        .join(RESOURCE_ACTIONS)
}

async fn list_collection(
    state: &AppState,
    caller: &CallerIdentity,
    target: Target,
    options: &QueryOptions,
    on: Option<CurrentUserRole>,
) -> ApiResult<Response> {
    let page = state
        .queries
        .list(caller, target.provider, target.collection, options, on)
        .await?;

    Ok(collection_response(target.collection_context()?, page))
}

async fn count_collection(
    state: &AppState,
    caller: &CallerIdentity,
    target: Target,
    options: &QueryOptions,
    on: Option<CurrentUserRole>,
) -> ApiResult<Response> {
    let count = state
        .queries
        .count(caller, target.provider, target.collection, options, on)
        .await?;

    Ok(count_response(count))
}

async fn get_entity(
    state: &AppState,
    caller: &CallerIdentity,
    target: Target,
    id: &str,
    options: &QueryOptions,
) -> ApiResult<Response> {
    let context = target.entity_context()?;
    if target.collection == RoleManagementCollection::Approvals {
        let approval = state
            .schedule_requests
            .get_approval(caller, target.provider, id)
            .await?;
        return entity_response(StatusCode::OK, context, &approval);
    }

    let entity = state
        .queries
        .get(caller, target.provider, target.collection, id, options)
        .await?;

    entity_response(StatusCode::OK, context, &entity)
}
