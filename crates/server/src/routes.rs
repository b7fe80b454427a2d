//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/capabilities", get(handlers::get_capabilities))
        .route("/v1/health", get(handlers::health_check))
        // Upload control plane
        .route(
            "/v1/uploads/{upload_id}",
            get(handlers::get_upload).delete(handlers::abandon_upload),
        )
        .route(
            "/v1/uploads/{upload_id}/chunks",
            post(handlers::post_chunk),
        )
        .route(
            "/v1/uploads/{upload_id}/chunks/{sequence_key}",
            put(handlers::put_chunk),
        )
        .route(
            "/v1/uploads/{upload_id}/commit",
            post(handlers::commit_upload),
        )
        // Committed objects
        .route("/v1/objects/{object_name}", get(handlers::get_object));

    let mut router = Router::new().merge(api_routes);

    // When enabled, restrict /metrics to the scraper at the network level.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
