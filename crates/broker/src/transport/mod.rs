// SPDX-License-Identifier: BUSL-1.1

//! HTTP + WebSocket transport for the glasses session broker.

pub mod auth;
pub mod http;
pub mod ws_app;
pub mod ws_glasses;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::BrokerState;

/// Build the axum `Router` with every broker route.
pub fn build_router(state: Arc<BrokerState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route(
            "/api/v1/sessions/{user_id}/apps/{package_name}/start",
            post(http::start_app),
        )
        .route(
            "/api/v1/sessions/{user_id}/apps/{package_name}/stop",
            post(http::stop_app),
        )
        .route("/ws/glasses", get(ws_glasses::ws_handler))
        .route("/ws/app", get(ws_app::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
