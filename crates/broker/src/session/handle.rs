// SPDX-License-Identifier: BUSL-1.1

//! Outbound handles the session actor holds for its attached transports.
//!
//! The actor never touches a raw socket directly — each connection's reader
//! task owns the socket and only ever exposes an unbounded sender plus a
//! cancellation token for forced close, so the actor can fan out without
//! awaiting backpressure from a slow client.

use axum::extract::ws::{CloseFrame, Message};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<Message>,
    close: CancellationToken,
}

impl TransportHandle {
    pub fn new(outbound: mpsc::UnboundedSender<Message>, close: CancellationToken) -> Self {
        Self { outbound, close }
    }

    /// Serialize and send a message. Returns `false` if the transport is gone.
    pub fn send_json(&self, value: &impl Serialize) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.outbound.send(Message::Text(text.into())).is_ok(),
            Err(e) => {
                debug!(error = %e, "failed to serialize outbound message");
                false
            }
        }
    }

    pub fn close_with(&self, code: u16, reason: &'static str) {
        let _ = self.outbound.send(Message::Close(Some(CloseFrame { code, reason: reason.into() })));
        self.close.cancel();
    }

    pub fn close(&self) {
        self.close.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }
}
