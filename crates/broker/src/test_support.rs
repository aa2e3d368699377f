// SPDX-License-Identifier: BUSL-1.1

//! Shared test infrastructure: a default config and an in-process HTTP+WS
//! server, used by both unit and integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{Collaborators, InMemoryMediaBackend, InMemoryStore};
use crate::config::BrokerConfig;
use crate::state::BrokerState;
use crate::transport::build_router;

/// A `BrokerConfig` with every timer slowed down to a value tests will never
/// hit by accident, so integration tests only observe the timers they
/// deliberately trigger (via `tokio::time::pause`/`advance` or by waiting
/// past a short override).
pub fn test_config() -> BrokerConfig {
    BrokerConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        auth_token: None,
        glasses_heartbeat_ms: 60_000,
        glasses_timeout_ms: 120_000,
        glasses_grace_ms: 120_000,
        app_start_timeout_ms: 60_000,
        app_stop_grace_ms: 60_000,
        display_rate_limit_ms: 1,
        audio_ring_seconds: 10,
        audio_bytes_per_second: 16_000,
        stream_keepalive_interval_ms: 60_000,
        stream_ack_timeout_ms: 60_000,
        stream_missed_ack_threshold: 3,
        stream_direct_stop_grace_ms: 60_000,
        stream_managed_grace_ms: 60_000,
        stream_max_outputs_per_stream: 10,
        stream_max_outputs_per_app: 10,
        photo_request_timeout_ms: 60_000,
        protocol_error_threshold: 3,
        protocol_error_window_ms: 60_000,
    }
}

/// Build broker state backed by fresh in-memory collaborators.
pub fn test_state() -> Arc<BrokerState> {
    let collaborators = Collaborators {
        store: Arc::new(InMemoryStore::new()),
        media_backend: Arc::new(InMemoryMediaBackend::new()),
    };
    Arc::new(BrokerState::new(Arc::new(test_config()), collaborators, CancellationToken::new()))
}

/// Spawn the broker's HTTP+WS router on a loopback TCP port for integration
/// tests that need real WebSocket connections.
pub async fn spawn_server(state: Arc<BrokerState>) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}
