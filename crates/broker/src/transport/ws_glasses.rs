// SPDX-License-Identifier: BUSL-1.1

//! Glasses-side WebSocket endpoint (§6.1): one connection per pair of
//! smart glasses, attached to the userId's session actor.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::router::{self, ProtocolErrorTracker};
use crate::session::handle::TransportHandle;
use crate::session::SessionCommand;
use crate::state::BrokerState;
use crate::transport::auth;

#[derive(Debug, Deserialize)]
pub struct GlassesWsQuery {
    pub user_id: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /ws/glasses?user_id=...&token=...`
pub async fn ws_handler(
    State(state): State<Arc<BrokerState>>,
    Query(query): Query<GlassesWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if auth::validate_ws_token(query.token.as_deref(), state.config.auth_token.as_deref()).is_err()
    {
        return auth::unauthorized_response("invalid token").into_response();
    }

    ws.on_upgrade(move |socket| handle_ws(socket, state, query.user_id))
}

async fn handle_ws(socket: WebSocket, state: Arc<BrokerState>, user_id: String) {
    let session = state.attach(&user_id).await;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let close = CancellationToken::new();
    let handle = TransportHandle::new(outbound_tx, close.clone());
    session.send(SessionCommand::GlassesConnected(handle)).await;

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut heartbeat = interval(state.config.glasses_heartbeat_interval());
    let timeout = state.config.glasses_timeout();
    let mut last_activity = Instant::now();
    let mut errors = ProtocolErrorTracker::new(
        state.config.protocol_error_threshold,
        state.config.protocol_error_window(),
    );

    loop {
        tokio::select! {
            _ = close.cancelled() => break,

            _ = heartbeat.tick() => {
                if last_activity.elapsed() > timeout {
                    debug!(user_id = user_id.as_str(), "glasses transport timed out, no activity");
                    break;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            msg = outbound_rx.recv() => {
                match msg {
                    Some(msg) => {
                        let is_close = matches!(msg, Message::Close(_));
                        if ws_tx.send(msg).await.is_err() || is_close {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        let text = text.to_string();
                        if router::route_glasses_text(&session, &text).await.is_err()
                            && errors.record(Instant::now())
                        {
                            debug!(user_id = user_id.as_str(), "glasses protocol error threshold reached");
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(frame))) => {
                        last_activity = Instant::now();
                        router::route_glasses_binary(&session, frame.to_vec()).await;
                    }
                    Some(Ok(Message::Pong(_))) => last_activity = Instant::now(),
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(user_id = user_id.as_str(), error = %e, "glasses WS read error");
                        break;
                    }
                }
            }
        }
    }

    session.send(SessionCommand::GlassesDisconnected).await;
}
