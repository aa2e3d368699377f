// SPDX-License-Identifier: BUSL-1.1

//! App-side WebSocket endpoint (§6.2): a TPA's first frame must be
//! `tpa_connection_init`, which both authenticates the App and identifies,
//! by `sessionId` (not `userId` — an App never learns the userId it's
//! serving), the already-live session it joins.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::messages::{AppInbound, AppOutbound};
use crate::router::{self, ProtocolErrorTracker};
use crate::session::handle::TransportHandle;
use crate::session::SessionCommand;
use crate::state::BrokerState;

/// `GET /ws/app`
pub async fn ws_handler(State(state): State<Arc<BrokerState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<BrokerState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let raw = match tokio::time::timeout(state.config.app_start_timeout(), ws_rx.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text.to_string(),
        _ => {
            close_with(&mut ws_tx, 1008, "expected tpa_connection_init").await;
            return;
        }
    };

    let (package_name, api_key, session_id) = match serde_json::from_str::<AppInbound>(&raw) {
        Ok(AppInbound::TpaConnectionInit { package_name, api_key, session_id }) => {
            (package_name, api_key, session_id)
        }
        _ => {
            close_with(&mut ws_tx, 1008, "first message must be tpa_connection_init").await;
            return;
        }
    };

    if !state.collaborators.store.validate_api_key(&package_name, &api_key).await {
        debug!(package_name = package_name.as_str(), "app connection rejected, bad api key");
        close_with(&mut ws_tx, 1008, "invalid api key").await;
        return;
    }

    // The App only ever learns a session's `sessionId`, handed to it in the
    // start webhook payload (§4.4); it never sees the userId the registry is
    // keyed by. Looking the session up this way is the validation itself —
    // an unrecognized or stale sessionId simply finds nothing.
    let Some(session) = state.get_by_session_id(&session_id).await else {
        debug!(package_name = package_name.as_str(), "app connection rejected, unknown session id");
        close_with(&mut ws_tx, 1008, "unknown session id").await;
        return;
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let close = CancellationToken::new();
    let handle = TransportHandle::new(outbound_tx, close.clone());
    session
        .send(SessionCommand::AppConnected { package_name: package_name.clone(), handle: handle.clone() })
        .await;
    handle.send_json(&AppOutbound::ConnectionAck { session_id: session.session_id.clone() });

    let mut errors = ProtocolErrorTracker::new(
        state.config.protocol_error_threshold,
        state.config.protocol_error_window(),
    );

    loop {
        tokio::select! {
            _ = close.cancelled() => break,

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
                        let text = text.to_string();
                        if router::route_app_text(&session, &package_name, &text).await.is_err()
                            && errors.record(Instant::now())
                        {
                            debug!(package_name = package_name.as_str(), "app protocol error threshold reached");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        debug!(package_name = package_name.as_str(), error = %e, "app WS read error");
                        break;
                    }
                }
            }
        }
    }

    session.send(SessionCommand::AppDisconnected { package_name }).await;
}

async fn close_with(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    code: u16,
    reason: &'static str,
) {
    let _ = ws_tx.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
}
