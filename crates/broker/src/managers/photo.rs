// SPDX-License-Identifier: BUSL-1.1

//! Photo request correlation and expiry (§4.9).
//!
//! Every `photo_request` comes from an App; the tracker's only job is to
//! remember which App to route the eventual `photo_response` back to, and to
//! forget requests that never get one (the session actor arms a per-request
//! expiry timer rather than polling for expired entries).

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct PhotoRequest {
    package_name: String,
    created_at: Instant,
}

#[derive(Debug, Default)]
pub struct PhotoRequestTracker {
    requests: HashMap<String, PhotoRequest>,
    ttl: Duration,
}

impl PhotoRequestTracker {
    pub fn new(ttl: Duration) -> Self {
        Self { requests: HashMap::new(), ttl }
    }

    pub fn create_for_app(&mut self, request_id: String, pkg: &str, now: Instant) -> String {
        self.requests.insert(request_id.clone(), PhotoRequest { package_name: pkg.to_owned(), created_at: now });
        request_id
    }

    /// Resolve a pending request. Returns the package name it should be
    /// correlated to, or `None` if the request is unknown or already expired.
    pub fn resolve(&mut self, request_id: &str) -> Option<String> {
        self.requests.remove(request_id).map(|r| r.package_name)
    }

    pub fn expire(&mut self, request_id: &str) {
        self.requests.remove(request_id);
    }

    #[cfg(test)]
    fn created_at(&self, request_id: &str) -> Option<Instant> {
        self.requests.get(request_id).map(|r| r.created_at)
    }

    #[cfg(test)]
    fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_returns_and_clears_requester() {
        let mut tracker = PhotoRequestTracker::new(Duration::from_secs(30));
        let now = Instant::now();
        tracker.create_for_app("req1".into(), "app.a", now);
        assert_eq!(tracker.resolve("req1").as_deref(), Some("app.a"));
        assert!(tracker.resolve("req1").is_none());
    }

    #[test]
    fn expire_clears_unresolved_request() {
        let mut tracker = PhotoRequestTracker::new(Duration::from_millis(10));
        let now = Instant::now();
        tracker.create_for_app("req1".into(), "app.a", now);
        assert!(tracker.created_at("req1").is_some());
        assert_eq!(tracker.ttl(), Duration::from_millis(10));
        tracker.expire("req1");
        assert!(tracker.resolve("req1").is_none());
    }
}
