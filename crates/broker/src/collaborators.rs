// SPDX-License-Identifier: BUSL-1.1

//! Narrow collaborator traits the core depends on but does not own (§6.3, §6.4).
//!
//! Persistence, user/app lookup, and the managed-streaming media backend are all
//! external concerns in the real deployment; the broker only ever reaches them
//! through these traits. The in-memory implementations below back the default
//! binary and the integration test suite.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::BrokerError;
use crate::messages::AccessUrls;

/// A user record as the broker needs it.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: String,
}

/// An App manifest entry as the broker needs it.
#[derive(Debug, Clone)]
pub struct AppRecord {
    pub package_name: String,
    pub api_key: String,
    pub webhook_url: String,
}

/// Opaque persistence boundary (§6.4). Durability is the implementor's concern.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Option<UserRecord>;
    async fn get_app(&self, package_name: &str) -> Option<AppRecord>;
    async fn validate_api_key(&self, package_name: &str, api_key: &str) -> bool;
    async fn record_app_active(&self, user_id: &str, package_name: &str);
}

/// Allocation result for a managed (cloud-mediated) RTMP stream (§6.3).
#[derive(Debug, Clone)]
pub struct IngestAllocation {
    pub cf_ingest_url: String,
    pub cf_live_input_id: String,
    pub access_urls: AccessUrls,
}

/// Managed-streaming media backend collaborator (§6.3).
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn allocate_ingest(&self, stream_id: &str) -> Result<IngestAllocation, BrokerError>;
    async fn add_restream_output(
        &self,
        stream_id: &str,
        url: &str,
        name: &str,
    ) -> Result<String, BrokerError>;
    async fn remove_restream_output(&self, stream_id: &str, output_id: &str);
    async fn release_ingest(&self, stream_id: &str);
}

/// In-memory `Store` used by the dev/default binary mode and by tests.
#[derive(Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<String, UserRecord>>,
    apps: RwLock<HashMap<String, AppRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_user(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        self.users.write().await.insert(user_id.clone(), UserRecord { user_id });
    }

    pub async fn seed_app(&self, package_name: impl Into<String>, api_key: impl Into<String>, webhook_url: impl Into<String>) {
        let package_name = package_name.into();
        self.apps.write().await.insert(
            package_name.clone(),
            AppRecord { package_name, api_key: api_key.into(), webhook_url: webhook_url.into() },
        );
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_user(&self, user_id: &str) -> Option<UserRecord> {
        self.users.read().await.get(user_id).cloned()
    }

    async fn get_app(&self, package_name: &str) -> Option<AppRecord> {
        self.apps.read().await.get(package_name).cloned()
    }

    async fn validate_api_key(&self, package_name: &str, api_key: &str) -> bool {
        match self.apps.read().await.get(package_name) {
            Some(app) => app.api_key == api_key,
            None => false,
        }
    }

    async fn record_app_active(&self, _user_id: &str, _package_name: &str) {
        // Opaque write in the real deployment; nothing to do in memory.
    }
}

/// In-memory `MediaBackend` used by the dev/default binary mode and by tests.
pub struct InMemoryMediaBackend {
    next_id: std::sync::atomic::AtomicU64,
}

impl Default for InMemoryMediaBackend {
    fn default() -> Self {
        Self { next_id: std::sync::atomic::AtomicU64::new(1) }
    }
}

impl InMemoryMediaBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaBackend for InMemoryMediaBackend {
    async fn allocate_ingest(&self, stream_id: &str) -> Result<IngestAllocation, BrokerError> {
        let live_input_id = format!("live-{stream_id}");
        Ok(IngestAllocation {
            cf_ingest_url: format!("rtmps://ingest.example.test/live/{live_input_id}"),
            cf_live_input_id: live_input_id,
            access_urls: AccessUrls {
                hls: format!("https://cdn.example.test/{stream_id}/index.m3u8"),
                rtmp: format!("rtmp://cdn.example.test/{stream_id}"),
                dash: format!("https://cdn.example.test/{stream_id}/index.mpd"),
            },
        })
    }

    async fn add_restream_output(
        &self,
        _stream_id: &str,
        _url: &str,
        _name: &str,
    ) -> Result<String, BrokerError> {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(format!("output-{id}"))
    }

    async fn remove_restream_output(&self, _stream_id: &str, _output_id: &str) {}

    async fn release_ingest(&self, _stream_id: &str) {}
}

/// Shared collaborator handles threaded through the broker state.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub media_backend: Arc<dyn MediaBackend>,
}
