// SPDX-License-Identifier: BUSL-1.1

//! App lifecycle state machine (§4.4).
//!
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`, with a terminal
//! `Failed` state reachable from `Starting` or `Running`. The session actor
//! drives transitions in response to webhook results, App WS connects, and
//! its own stop-grace timers; this module only holds the state and the rules
//! for what transition is legal from where.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::collaborators::AppRecord;
use crate::error::BrokerError;

/// Lifecycle state of one App within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

#[derive(Debug)]
struct AppEntry {
    state: AppState,
}

/// Tracks every App's lifecycle state within one session.
#[derive(Debug, Default)]
pub struct AppManager {
    apps: HashMap<String, AppEntry>,
}

impl AppManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_of(&self, package_name: &str) -> AppState {
        self.apps.get(package_name).map(|e| e.state).unwrap_or(AppState::Stopped)
    }

    /// Begin starting an App. Rejects with `Busy` if the App is mid-stop, and
    /// is a no-op returning `Ok` if it is already starting or running.
    pub fn begin_starting(&mut self, package_name: &str) -> Result<(), BrokerError> {
        match self.state_of(package_name) {
            AppState::Stopping => Err(BrokerError::Busy),
            AppState::Starting | AppState::Running => Ok(()),
            AppState::Stopped | AppState::Failed => {
                self.apps.insert(package_name.to_owned(), AppEntry { state: AppState::Starting });
                Ok(())
            }
        }
    }

    /// The App's WebSocket connected with a valid `TpaConnectionInit`.
    pub fn mark_running(&mut self, package_name: &str) {
        self.set_state(package_name, AppState::Running);
    }

    /// Begin stopping an App; a no-op if it is already stopped.
    pub fn begin_stopping(&mut self, package_name: &str) -> bool {
        if self.state_of(package_name) == AppState::Stopped {
            return false;
        }
        self.set_state(package_name, AppState::Stopping);
        true
    }

    /// Finalize a stop after the grace period, or on transport close.
    pub fn mark_stopped(&mut self, package_name: &str) {
        self.apps.remove(package_name);
    }

    pub fn mark_failed(&mut self, package_name: &str, reason: &str) {
        warn!(package_name, reason, "app entered failed state");
        self.set_state(package_name, AppState::Failed);
    }

    fn set_state(&mut self, package_name: &str, state: AppState) {
        self.apps
            .entry(package_name.to_owned())
            .and_modify(|e| e.state = state)
            .or_insert(AppEntry { state });
    }

    pub fn running_packages(&self) -> Vec<String> {
        self.apps
            .iter()
            .filter(|(_, e)| e.state == AppState::Running)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn loading_packages(&self) -> Vec<String> {
        self.apps
            .iter()
            .filter(|(_, e)| e.state == AppState::Starting)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// HTTP client wrapper for invoking an App's `webhook_url` (§4.4, §6.2).
#[derive(Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct WebhookStartPayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
    #[serde(rename = "userId")]
    user_id: &'a str,
    #[serde(rename = "apiKey")]
    api_key: &'a str,
}

impl WebhookClient {
    pub fn new(connect_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(connect_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    /// Invoke the App's webhook to request it connect, carrying the session's
    /// `apiKey` so the App can authenticate the `tpa_connection_init` it sends
    /// back. Returns once the HTTP request has been acknowledged; the App's
    /// actual WS connect is a separate, later event the session actor waits
    /// on with its own timer.
    pub async fn start(&self, app: &AppRecord, session_id: &str, user_id: &str) -> Result<(), BrokerError> {
        let payload = WebhookStartPayload { kind: "session_request", session_id, user_id, api_key: &app.api_key };
        let resp = self
            .http
            .post(&app.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                debug!(package_name = app.package_name.as_str(), error = %e, "webhook call failed");
                BrokerError::Transient
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            warn!(
                package_name = app.package_name.as_str(),
                status = resp.status().as_u16(),
                "webhook rejected session request"
            );
            Err(BrokerError::Transient)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_twice_is_idempotent() {
        let mut mgr = AppManager::new();
        mgr.begin_starting("com.example.app").unwrap();
        mgr.begin_starting("com.example.app").unwrap();
        assert_eq!(mgr.state_of("com.example.app"), AppState::Starting);
    }

    #[test]
    fn start_rejected_while_stopping() {
        let mut mgr = AppManager::new();
        mgr.begin_starting("com.example.app").unwrap();
        mgr.mark_running("com.example.app");
        mgr.begin_stopping("com.example.app");
        assert_eq!(mgr.begin_starting("com.example.app"), Err(BrokerError::Busy));
    }

    #[test]
    fn running_and_loading_sets_are_disjoint() {
        let mut mgr = AppManager::new();
        mgr.begin_starting("com.example.loading").unwrap();
        mgr.begin_starting("com.example.running").unwrap();
        mgr.mark_running("com.example.running");

        assert_eq!(mgr.running_packages(), vec!["com.example.running".to_owned()]);
        assert_eq!(mgr.loading_packages(), vec!["com.example.loading".to_owned()]);
    }

    #[test]
    fn mark_stopped_clears_entry() {
        let mut mgr = AppManager::new();
        mgr.begin_starting("com.example.app").unwrap();
        mgr.mark_stopped("com.example.app");
        assert_eq!(mgr.state_of("com.example.app"), AppState::Stopped);
    }
}
