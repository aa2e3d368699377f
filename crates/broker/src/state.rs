// SPDX-License-Identifier: BUSL-1.1

//! Shared broker state: the session registry (§4.2) and the collaborator
//! handles threaded into every session actor.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::collaborators::Collaborators;
use crate::config::BrokerConfig;
use crate::session::{SessionCommand, UserSession};

/// A live session's command channel plus enough to dispose or reattach it.
///
/// `session_id` is the broker-generated identity for this session (§3):
/// distinct from the `user_id` the registry is keyed by, it's the value
/// handed to an App (via its start webhook, then echoed back in
/// `tpa_connection_init`) so the App's connection can be tied to the
/// specific session that triggered it, without ever learning the userId.
#[derive(Clone)]
pub struct SessionHandle {
    pub tx: mpsc::Sender<SessionCommand>,
    pub cancel: CancellationToken,
    pub session_id: String,
}

impl SessionHandle {
    pub async fn send(&self, cmd: SessionCommand) {
        let _ = self.tx.send(cmd).await;
    }
}

/// Cross-session shared state. Exactly one `UserSession` per userId
/// (§8 invariant); the registry is the one place that mapping is
/// authoritative. `by_session_id` is a secondary index so an App, which only
/// ever learns a session's `sessionId` and never its `userId`, can find its
/// way back to the right session.
pub struct BrokerState {
    pub config: Arc<BrokerConfig>,
    pub collaborators: Collaborators,
    pub shutdown: CancellationToken,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    by_session_id: RwLock<HashMap<String, String>>,
}

impl BrokerState {
    pub fn new(config: Arc<BrokerConfig>, collaborators: Collaborators, shutdown: CancellationToken) -> Self {
        Self {
            config,
            collaborators,
            shutdown,
            sessions: RwLock::new(HashMap::new()),
            by_session_id: RwLock::new(HashMap::new()),
        }
    }

    /// Get the existing session for `user_id`, or spawn a new one.
    pub async fn attach(&self, user_id: &str) -> SessionHandle {
        {
            let sessions = self.sessions.read().await;
            if let Some(handle) = sessions.get(user_id) {
                if !handle.cancel.is_cancelled() {
                    return handle.clone();
                }
            }
        }

        let mut sessions = self.sessions.write().await;
        // Re-check after acquiring the write lock: another task may have
        // created the session while we waited.
        if let Some(handle) = sessions.get(user_id) {
            if !handle.cancel.is_cancelled() {
                return handle.clone();
            }
        }

        let cancel = self.shutdown.child_token();
        let (tx, rx) = mpsc::channel(256);
        let session_id = Uuid::new_v4().to_string();
        let handle = SessionHandle { tx: tx.clone(), cancel: cancel.clone(), session_id: session_id.clone() };

        let session = UserSession::new(
            user_id.to_owned(),
            session_id.clone(),
            Arc::clone(&self.config),
            self.collaborators.clone(),
            tx,
            cancel,
        );
        tokio::spawn(session.run(rx));

        info!(user_id, session_id = session_id.as_str(), "session created");
        sessions.insert(user_id.to_owned(), handle.clone());
        self.by_session_id.write().await.insert(session_id, user_id.to_owned());
        handle
    }

    pub async fn get(&self, user_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(user_id).cloned()
    }

    /// Look up a session by the `sessionId` an App reported in its
    /// `tpa_connection_init`, the only identity an App is ever given.
    pub async fn get_by_session_id(&self, session_id: &str) -> Option<SessionHandle> {
        let user_id = self.by_session_id.read().await.get(session_id).cloned()?;
        self.get(&user_id).await
    }

    /// Dispose a session, e.g. on the grace-window reconnect timer expiring.
    pub async fn dispose(&self, user_id: &str) {
        if let Some(handle) = self.sessions.write().await.remove(user_id) {
            handle.cancel.cancel();
            self.by_session_id.write().await.remove(&handle.session_id);
        }
    }

    /// Drop every reference to sessions whose actor has already torn itself
    /// down, so the map doesn't grow unbounded across reconnect churn.
    pub async fn reap_canceled(&self) {
        let mut sessions = self.sessions.write().await;
        let dead: Vec<String> = sessions
            .iter()
            .filter(|(_, handle)| handle.cancel.is_cancelled())
            .map(|(_, handle)| handle.session_id.clone())
            .collect();
        sessions.retain(|_, handle| !handle.cancel.is_cancelled());
        drop(sessions);
        if !dead.is_empty() {
            let mut by_session_id = self.by_session_id.write().await;
            by_session_id.retain(|session_id, _| !dead.contains(session_id));
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Signal every live session to dispose, for process shutdown (§5).
    pub async fn dispose_all(&self) {
        let handles: Vec<_> = self.sessions.read().await.values().cloned().collect();
        for handle in handles {
            handle.cancel.cancel();
        }
    }
}
