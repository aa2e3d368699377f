// SPDX-License-Identifier: BUSL-1.1

//! Glasses session broker: a WebSocket hub between a pair of smart glasses
//! and the third-party Apps ("TPAs") subscribed to their data streams.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod managers;
pub mod messages;
pub mod ring;
pub mod router;
pub mod session;
pub mod state;
pub mod test_support;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{Collaborators, InMemoryMediaBackend, InMemoryStore};
use crate::config::BrokerConfig;
use crate::state::BrokerState;
use crate::transport::build_router;

/// Run the broker until shutdown.
pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let collaborators =
        Collaborators { store: Arc::new(InMemoryStore::new()), media_backend: Arc::new(InMemoryMediaBackend::new()) };

    let state = Arc::new(BrokerState::new(Arc::new(config), collaborators, shutdown.clone()));

    tracing::info!("glasses-broker listening on {addr}");
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;

    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    state.dispose_all().await;
    Ok(())
}
