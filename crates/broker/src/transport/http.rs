// SPDX-License-Identifier: BUSL-1.1

//! HTTP handlers for the glasses session broker.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::session::SessionCommand;
use crate::state::BrokerState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub session_count: usize,
}

/// `GET /api/v1/health`
pub async fn health(State(state): State<Arc<BrokerState>>) -> impl IntoResponse {
    Json(HealthResponse { status: "running".to_owned(), session_count: state.session_count().await })
}

#[derive(Debug, Serialize)]
pub struct AppControlResponse {
    pub accepted: bool,
}

/// `POST /api/v1/sessions/{user_id}/apps/{package_name}/start`
///
/// External orchestration (launcher, app store) uses this to ask the
/// session to invoke the App's start webhook. The session is created on
/// demand, same as an inbound glasses connection would.
pub async fn start_app(
    State(state): State<Arc<BrokerState>>,
    Path((user_id, package_name)): Path<(String, String)>,
) -> impl IntoResponse {
    let session = state.attach(&user_id).await;
    session.send(SessionCommand::StartApp { package_name }).await;
    Json(AppControlResponse { accepted: true })
}

/// `POST /api/v1/sessions/{user_id}/apps/{package_name}/stop`
pub async fn stop_app(
    State(state): State<Arc<BrokerState>>,
    Path((user_id, package_name)): Path<(String, String)>,
) -> impl IntoResponse {
    let accepted = match state.get(&user_id).await {
        Some(session) => {
            session.send(SessionCommand::StopApp { package_name }).await;
            true
        }
        None => false,
    };
    Json(AppControlResponse { accepted })
}
