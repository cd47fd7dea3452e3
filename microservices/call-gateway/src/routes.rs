//! Router configuration for the call gateway API

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::auth;
use crate::handlers;
use crate::AppState;

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    // Call control, behind the bearer guard
    let protected = Router::new()
        .route("/v1/calls/dial", post(handlers::dial))
        .route("/v1/calls/hangup", post(handlers::hangup))
        .route("/v1/sessions/{uuid}", get(handlers::get_session))
        .route("/dial", post(handlers::dial))
        .route("/hangup", post(handlers::hangup))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        // Health & Metrics
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/stats", get(handlers::stats))
        .merge(protected)
        .with_state(state)
}
