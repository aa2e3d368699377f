// SPDX-License-Identifier: BUSL-1.1

//! Subscription bookkeeping and fan-out scoping (§4.3).
//!
//! Holds each connected App's declared interest set and answers "who gets
//! this event" for the router and the other managers. The privacy rules for
//! `RTMP_STATUS` and `CLOUD_RTMP` live here rather than at the call sites so
//! there is exactly one place that can get the scoping wrong.

use std::collections::{HashMap, HashSet};

use crate::messages::StreamType;

/// Tracks each App's subscribed stream types within one session.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscriptions: HashMap<String, HashSet<StreamType>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace an App's subscription set (`SUBSCRIPTION_UPDATE` is not additive).
    pub fn set_subscriptions(&mut self, app_id: &str, subscriptions: Vec<StreamType>) {
        self.subscriptions.insert(app_id.to_owned(), subscriptions.into_iter().collect());
    }

    /// Drop an App's subscriptions entirely, typically on disconnect.
    pub fn clear(&mut self, app_id: &str) {
        self.subscriptions.remove(app_id);
    }

    pub fn is_subscribed(&self, app_id: &str, stream_type: StreamType) -> bool {
        self.subscriptions.get(app_id).is_some_and(|s| s.contains(&stream_type))
    }

    /// Every App subscribed to `stream_type`, with no additional scoping.
    /// Correct for every stream type except `RTMP_STATUS` and `CLOUD_RTMP`,
    /// which have their own privacy-scoped accessors below.
    pub fn subscribers_for(&self, stream_type: StreamType) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter(|(_, set)| set.contains(&stream_type))
            .map(|(app_id, _)| app_id.clone())
            .collect()
    }

    /// `RTMP_STATUS` recipients for a direct stream's status update: the
    /// requesting App only, never the broader subscriber set.
    pub fn rtmp_status_direct_recipients(&self, requester_app_id: &str) -> Vec<String> {
        vec![requester_app_id.to_owned()]
    }

    /// `RTMP_STATUS` recipients for a `busy` rejection: broadcast to every
    /// `RTMP_STATUS` subscriber, the one carve-out where a direct stream's
    /// status is not requester-scoped.
    pub fn rtmp_status_busy_recipients(&self) -> Vec<String> {
        self.subscribers_for(StreamType::RtmpStatus)
    }

    /// `CLOUD_RTMP` recipients: only Apps that have subscribed as viewers,
    /// never implicitly including the stream's own requester.
    pub fn cloud_rtmp_recipients(&self) -> Vec<String> {
        self.subscribers_for(StreamType::CloudRtmp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_is_not_additive() {
        let mut mgr = SubscriptionManager::new();
        mgr.set_subscriptions("app.a", vec![StreamType::ButtonPress, StreamType::Location]);
        mgr.set_subscriptions("app.a", vec![StreamType::Location]);
        assert!(!mgr.is_subscribed("app.a", StreamType::ButtonPress));
        assert!(mgr.is_subscribed("app.a", StreamType::Location));
    }

    #[test]
    fn subscribers_for_collects_all_matching_apps() {
        let mut mgr = SubscriptionManager::new();
        mgr.set_subscriptions("app.a", vec![StreamType::AudioChunk]);
        mgr.set_subscriptions("app.b", vec![StreamType::AudioChunk, StreamType::PhotoTaken]);
        let mut subs = mgr.subscribers_for(StreamType::AudioChunk);
        subs.sort();
        assert_eq!(subs, vec!["app.a".to_owned(), "app.b".to_owned()]);
    }

    #[test]
    fn clear_removes_all_subscriptions_for_app() {
        let mut mgr = SubscriptionManager::new();
        mgr.set_subscriptions("app.a", vec![StreamType::Location]);
        mgr.clear("app.a");
        assert!(!mgr.is_subscribed("app.a", StreamType::Location));
        assert!(mgr.subscribers_for(StreamType::Location).is_empty());
    }

    #[test]
    fn rtmp_status_direct_recipients_is_requester_only() {
        let mut mgr = SubscriptionManager::new();
        mgr.set_subscriptions("app.a", vec![StreamType::RtmpStatus]);
        mgr.set_subscriptions("app.b", vec![StreamType::RtmpStatus]);
        assert_eq!(mgr.rtmp_status_direct_recipients("app.a"), vec!["app.a".to_owned()]);
    }

    #[test]
    fn rtmp_status_busy_recipients_broadcasts() {
        let mut mgr = SubscriptionManager::new();
        mgr.set_subscriptions("app.a", vec![StreamType::RtmpStatus]);
        mgr.set_subscriptions("app.b", vec![StreamType::RtmpStatus]);
        let mut recipients = mgr.rtmp_status_busy_recipients();
        recipients.sort();
        assert_eq!(recipients, vec!["app.a".to_owned(), "app.b".to_owned()]);
    }
}
