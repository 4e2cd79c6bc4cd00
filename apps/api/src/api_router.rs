use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::handlers::role_management;
use crate::state::AppState;
use crate::{handlers, middleware};

/// Builds the HTTP router; everything below `/roleManagement` requires a gateway identity.
pub fn build_router(app_state: AppState) -> Router {
    let role_management_routes = Router::new()
        .route(
            "/roleManagement/{provider}/{collection}",
            get(role_management::list_handler).post(role_management::create_handler),
        )
        .route(
            "/roleManagement/{provider}/{collection}/{segment}",
            get(role_management::segment_handler)
                .patch(role_management::update_handler)
                .delete(role_management::delete_handler),
        )
        .route(
            "/roleManagement/{provider}/{collection}/{segment}/{navigation}",
            get(role_management::navigation_handler).post(role_management::action_handler),
        )
        .route(
            "/roleManagement/{provider}/{collection}/{segment}/{navigation}/{item}",
            get(role_management::nested_handler),
        )
        .route_layer(from_fn_with_state(
            app_state.clone(),
            middleware::require_gateway_identity,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .merge(role_management_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
