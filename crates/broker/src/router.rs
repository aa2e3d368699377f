// SPDX-License-Identifier: BUSL-1.1

//! MessageRouter (§4.8): parses inbound envelopes and forwards them to the
//! owning session actor. Unknown message types are dropped with a `warn`;
//! malformed JSON is the caller's responsibility to count toward the
//! per-transport protocol-error threshold via [`ProtocolErrorTracker`].

use std::time::{Duration, Instant};

use tracing::warn;

use crate::messages::{AppInbound, GlassesInbound};
use crate::session::SessionCommand;
use crate::state::SessionHandle;

/// Parse a glasses→cloud frame and forward it to the session actor.
pub async fn route_glasses_text(session: &SessionHandle, raw: &str) -> Result<(), serde_json::Error> {
    let msg: GlassesInbound = serde_json::from_str(raw)?;
    session.send(SessionCommand::GlassesMessage(msg)).await;
    Ok(())
}

pub async fn route_glasses_binary(session: &SessionHandle, frame: Vec<u8>) {
    session.send(SessionCommand::GlassesAudioFrame(frame)).await;
}

/// Parse an App→cloud frame and forward it to the session actor.
pub async fn route_app_text(
    session: &SessionHandle,
    package_name: &str,
    raw: &str,
) -> Result<(), serde_json::Error> {
    let msg: AppInbound = serde_json::from_str(raw)?;
    session.send(SessionCommand::AppMessage { package_name: package_name.to_owned(), message: msg }).await;
    Ok(())
}

/// Tracks malformed-message counts for one transport connection (§4.8, §7):
/// after `threshold` protocol errors within `window`, the caller should
/// close the socket.
pub struct ProtocolErrorTracker {
    count: u32,
    window_start: Option<Instant>,
    threshold: u32,
    window: Duration,
}

impl ProtocolErrorTracker {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self { count: 0, window_start: None, threshold, window }
    }

    /// Record a protocol error at `now`. Returns `true` if the transport
    /// should be closed.
    pub fn record(&mut self, now: Instant) -> bool {
        match self.window_start {
            Some(start) if now.duration_since(start) <= self.window => {
                self.count += 1;
            }
            _ => {
                self.window_start = Some(now);
                self.count = 1;
            }
        }
        warn!(count = self.count, threshold = self.threshold, "protocol error recorded");
        self.count >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closes_after_threshold_within_window() {
        let mut tracker = ProtocolErrorTracker::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert!(!tracker.record(now));
        assert!(!tracker.record(now + Duration::from_secs(1)));
        assert!(tracker.record(now + Duration::from_secs(2)));
    }

    #[test]
    fn window_reset_after_expiry() {
        let mut tracker = ProtocolErrorTracker::new(3, Duration::from_secs(60));
        let now = Instant::now();
        tracker.record(now);
        tracker.record(now + Duration::from_secs(1));
        assert!(!tracker.record(now + Duration::from_secs(120)));
    }
}
