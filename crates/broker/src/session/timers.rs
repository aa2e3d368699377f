// SPDX-License-Identifier: BUSL-1.1

//! Named, re-armable one-shot timers that post a [`SessionCommand`] back to
//! the owning session actor on fire.
//!
//! Every outstanding keep-alive, ACK, grace, and expiry window in §5 is owned
//! by the session worker and canceled on disposal; this registry is the one
//! place that bookkeeping lives so the manager modules stay free of
//! `tokio::spawn` calls.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::SessionCommand;

#[derive(Default)]
pub struct TimerRegistry {
    tokens: HashMap<String, CancellationToken>,
    parent: CancellationToken,
}

impl TimerRegistry {
    pub fn new(parent: CancellationToken) -> Self {
        Self { tokens: HashMap::new(), parent }
    }

    /// Arm a one-shot timer under `key`, canceling any existing timer with
    /// that key first.
    pub fn arm(&mut self, key: impl Into<String>, delay: Duration, command: SessionCommand, tx: mpsc::Sender<SessionCommand>) {
        let key = key.into();
        self.cancel(&key);

        let token = self.parent.child_token();
        let spawned = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(command).await;
                }
                _ = spawned.cancelled() => {}
            }
        });
        self.tokens.insert(key, token);
    }

    pub fn cancel(&mut self, key: &str) {
        if let Some(token) = self.tokens.remove(key) {
            token.cancel();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, token) in self.tokens.drain() {
            token.cancel();
        }
    }
}
