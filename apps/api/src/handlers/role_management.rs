//! OData-shaped handlers below `/roleManagement/{provider}`.
//!
//! Collections are addressed generically; each handler parses the collection
//! segment and dispatches to the service that owns it.

use axum::Extension;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use warden_core::{AppError, AppResult, CallerIdentity, RbacProvider};
use warden_domain::{
    QueryOptions, QueryPage, ResourceAddress, RoleManagementAddress, RoleManagementCollection,
};

use crate::dto::CollectionResponse;
use crate::error::ApiResult;
use crate::state::AppState;

mod paths;
mod reads;
mod writes;


pub use paths::{CollectionPath, EntityPath, NavigationPath, NestedPath};
pub use reads::{list_handler, navigation_handler, nested_handler, segment_handler};
pub use writes::{action_handler, create_handler, delete_handler, update_handler};

/// Request header carrying the client-supplied schedule request id.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Provider and collection addressed by a request.
#[derive(Debug, Clone, Copy)]
struct Target {
    provider: RbacProvider,
    collection: RoleManagementCollection,
}

impl Target {
    fn parse(provider: &str, collection: &str) -> AppResult<Self> {
        Ok(Self {
            provider: provider.parse()?,
            collection: collection.parse()?,
        })
    }

    fn address(&self) -> RoleManagementAddress {
        RoleManagementAddress::new(self.provider)
    }

    fn collection_context(&self) -> AppResult<String> {
        self.address().collection(self.collection).odata_context()
    }

    fn entity_context(&self) -> AppResult<String> {
        entity_context(&self.address().collection(self.collection))
    }
}

fn entity_context(collection: &ResourceAddress) -> AppResult<String> {
    Ok(format!("{}/$entity", collection.odata_context()?))
}

fn query_options(parameters: &[(String, String)]) -> AppResult<QueryOptions> {
    QueryOptions::parse(
        parameters
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str())),
    )
}

fn json_body<T: DeserializeOwned>(body: &Bytes) -> AppResult<T> {
    serde_json::from_slice(body)
        .map_err(|error| AppError::Validation(format!("invalid request body: {error}")))
}

fn collection_response(context: String, page: QueryPage) -> Response {
    Json(CollectionResponse::from_page(context, page)).into_response()
}

fn count_response(count: usize) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        count.to_string(),
    )
        .into_response()
}

fn entity_response<T: Serialize>(
    status: StatusCode,
    context: String,
    entity: &T,
) -> ApiResult<Response> {
    let mut value = serde_json::to_value(entity)
        .map_err(|error| AppError::Internal(format!("failed to serialize entity: {error}")))?;
    if let Value::Object(properties) = &mut value {
        properties.insert("@odata.context".to_owned(), Value::String(context));
    }

    Ok((status, Json(value)).into_response())
}
