// SPDX-License-Identifier: BUSL-1.1

//! Direct and managed RTMP stream supervision, with a keep-alive/ACK
//! reliability protocol layered over both (§4.7).
//!
//! This manager is deliberately not a pure state machine: allocating and
//! releasing managed-stream ingest goes through the `MediaBackend`
//! collaborator, an awaited call. Because the session actor is the single
//! writer for all of a session's state, there is no concurrency hazard in
//! awaiting inside these methods — no other task can observe or mutate this
//! supervisor's state mid-call.
//!
//! Everything else — which sockets to write to, which timers to arm — is
//! returned as a list of `StreamEffect`s for the session actor to execute,
//! keeping the transition logic itself synchronous and unit-testable.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::collaborators::MediaBackend;
use crate::error::BrokerError;
use crate::messages::{AccessUrls, AppOutbound, GlassesOutbound, StreamStatus};

#[derive(Debug, Clone)]
pub enum StreamKind {
    Direct { requester_app_id: String },
    Managed { access_urls: AccessUrls },
}

#[derive(Debug, Clone)]
pub struct OutputEntry {
    pub url: String,
    pub name: String,
    pub added_by: String,
}

#[derive(Debug, Clone)]
pub struct StreamEntity {
    pub stream_id: String,
    pub kind: StreamKind,
    pub status: StreamStatus,
    pub rtmp_url: String,
    pub viewers: HashSet<String>,
    pub outputs: HashMap<String, OutputEntry>,
    pub missed_acks: u32,
    pub pending_ack_id: Option<String>,
    pub keep_alive_active: bool,
}

impl StreamEntity {
    fn is_direct(&self) -> bool {
        matches!(self.kind, StreamKind::Direct { .. })
    }
}

/// Side effects the session actor must carry out in response to a
/// supervisor transition: sockets to write, timers to (re)arm or cancel.
#[derive(Debug, Clone)]
pub enum StreamEffect {
    SendToGlasses(GlassesOutbound),
    NotifyApps { app_ids: Vec<String>, message: AppOutbound },
    /// Resolve recipients via the session's `RTMP_STATUS` subscriber set.
    BroadcastBusy { message: AppOutbound },
    StartKeepAlive { stream_id: String },
    CancelKeepAlive { stream_id: String },
    ScheduleAckTimeout { stream_id: String, ack_id: String },
    ScheduleManagedGrace { stream_id: String },
    ScheduleDirectStopFinalize { stream_id: String },
}

#[derive(Default)]
pub struct StreamSupervisor {
    streams: HashMap<String, StreamEntity>,
    direct_stream_id: Option<String>,
    managed_stream_id: Option<String>,
    outputs_by_app: HashMap<String, usize>,
    max_outputs_per_stream: usize,
    max_outputs_per_app: usize,
    missed_ack_threshold: u32,
}

impl StreamSupervisor {
    pub fn new(max_outputs_per_stream: usize, max_outputs_per_app: usize, missed_ack_threshold: u32) -> Self {
        Self { max_outputs_per_stream, max_outputs_per_app, missed_ack_threshold, ..Self::default() }
    }

    pub fn get(&self, stream_id: &str) -> Option<&StreamEntity> {
        self.streams.get(stream_id)
    }

    pub fn direct_stream_id(&self) -> Option<&str> {
        self.direct_stream_id.as_deref()
    }

    pub fn managed_stream_id(&self) -> Option<&str> {
        self.managed_stream_id.as_deref()
    }

    // -- 4.7.1 Direct streaming ------------------------------------------

    pub fn request_direct(
        &mut self,
        pkg: &str,
        rtmp_url: String,
        stream_id: String,
        params: (Option<serde_json::Value>, Option<serde_json::Value>, Option<serde_json::Value>),
    ) -> Vec<StreamEffect> {
        if let Some(active) = &self.direct_stream_id {
            let active = active.clone();
            return vec![
                StreamEffect::NotifyApps {
                    app_ids: vec![pkg.to_owned()],
                    message: AppOutbound::RtmpStreamStatus {
                        stream_id: active.clone(),
                        status: StreamStatus::Busy,
                        access_urls: None,
                        error_details: None,
                    },
                },
                StreamEffect::BroadcastBusy {
                    message: AppOutbound::RtmpStreamStatus {
                        stream_id: active,
                        status: StreamStatus::Busy,
                        access_urls: None,
                        error_details: None,
                    },
                },
            ];
        }

        let (video, audio, stream) = params;
        self.streams.insert(
            stream_id.clone(),
            StreamEntity {
                stream_id: stream_id.clone(),
                kind: StreamKind::Direct { requester_app_id: pkg.to_owned() },
                status: StreamStatus::Initializing,
                rtmp_url: rtmp_url.clone(),
                viewers: HashSet::new(),
                outputs: HashMap::new(),
                missed_acks: 0,
                pending_ack_id: None,
                keep_alive_active: true,
            },
        );
        self.direct_stream_id = Some(stream_id.clone());

        vec![
            StreamEffect::SendToGlasses(GlassesOutbound::StartRtmpStream {
                stream_id: stream_id.clone(),
                rtmp_url,
                video,
                audio,
                stream,
            }),
            StreamEffect::StartKeepAlive { stream_id },
        ]
    }

    /// Returns `None` if `stream_id` does not belong to `pkg`'s direct stream.
    pub fn stop_direct(&mut self, pkg: &str, stream_id: &str) -> Option<Vec<StreamEffect>> {
        let entity = self.streams.get_mut(stream_id)?;
        match &entity.kind {
            StreamKind::Direct { requester_app_id } if requester_app_id == pkg => {}
            _ => return None,
        }

        entity.status = StreamStatus::Stopping;
        entity.keep_alive_active = false;

        Some(vec![
            StreamEffect::CancelKeepAlive { stream_id: stream_id.to_owned() },
            StreamEffect::SendToGlasses(GlassesOutbound::StopRtmpStream { app_id: Some(pkg.to_owned()) }),
            StreamEffect::ScheduleDirectStopFinalize { stream_id: stream_id.to_owned() },
        ])
    }

    /// Direct-stop grace timer fired; force-finalize if glasses never confirmed.
    pub fn finalize_direct_stop(&mut self, stream_id: &str) -> Vec<StreamEffect> {
        let Some(entity) = self.streams.get(stream_id) else { return vec![] };
        if entity.status == StreamStatus::Stopped {
            return vec![];
        }
        self.terminate(stream_id, StreamStatus::Stopped)
    }

    // -- 4.7.2 Managed streaming ------------------------------------------

    /// A subscriber joined `CLOUD_RTMP`. If no managed stream is active,
    /// allocates ingest via the `MediaBackend` collaborator and starts one.
    pub async fn subscribe_cloud_rtmp(
        &mut self,
        pkg: &str,
        stream_id_for_new: impl FnOnce() -> String,
        media: &dyn MediaBackend,
    ) -> Result<Vec<StreamEffect>, BrokerError> {
        if let Some(stream_id) = self.managed_stream_id.clone() {
            let entity = self.streams.get_mut(&stream_id).expect("managed stream entity must exist");
            entity.viewers.insert(pkg.to_owned());
            let StreamKind::Managed { access_urls } = entity.kind.clone() else {
                unreachable!("managed_stream_id only ever points at a Managed entity")
            };
            return Ok(vec![StreamEffect::NotifyApps {
                app_ids: vec![pkg.to_owned()],
                message: AppOutbound::RtmpStreamStatus {
                    stream_id,
                    status: entity.status,
                    access_urls: Some(access_urls),
                    error_details: None,
                },
            }]);
        }

        let stream_id = stream_id_for_new();
        let allocation = media.allocate_ingest(&stream_id).await?;

        self.streams.insert(
            stream_id.clone(),
            StreamEntity {
                stream_id: stream_id.clone(),
                kind: StreamKind::Managed { access_urls: allocation.access_urls.clone() },
                status: StreamStatus::Initializing,
                rtmp_url: allocation.cf_ingest_url.clone(),
                viewers: HashSet::from([pkg.to_owned()]),
                outputs: HashMap::new(),
                missed_acks: 0,
                pending_ack_id: None,
                keep_alive_active: true,
            },
        );
        self.managed_stream_id = Some(stream_id.clone());

        Ok(vec![
            StreamEffect::SendToGlasses(GlassesOutbound::StartRtmpStream {
                stream_id: stream_id.clone(),
                rtmp_url: allocation.cf_ingest_url,
                video: None,
                audio: None,
                stream: None,
            }),
            StreamEffect::StartKeepAlive { stream_id: stream_id.clone() },
            StreamEffect::NotifyApps {
                app_ids: vec![pkg.to_owned()],
                message: AppOutbound::RtmpStreamStatus {
                    stream_id,
                    status: StreamStatus::Initializing,
                    access_urls: Some(allocation.access_urls),
                    error_details: None,
                },
            },
        ])
    }

    /// A viewer left. If `viewers` is now empty, arms the 30 s teardown grace.
    pub fn unsubscribe_cloud_rtmp(&mut self, pkg: &str) -> Vec<StreamEffect> {
        let Some(stream_id) = self.managed_stream_id.clone() else { return vec![] };
        let Some(entity) = self.streams.get_mut(&stream_id) else { return vec![] };
        entity.viewers.remove(pkg);

        if entity.viewers.is_empty() {
            vec![StreamEffect::ScheduleManagedGrace { stream_id }]
        } else {
            vec![]
        }
    }

    /// Managed-stream grace timer fired; stop only if still no viewers.
    pub fn managed_grace_expired(&mut self, stream_id: &str) -> Vec<StreamEffect> {
        let Some(entity) = self.streams.get(stream_id) else { return vec![] };
        if !entity.viewers.is_empty() {
            return vec![];
        }
        self.terminate(stream_id, StreamStatus::Stopped)
    }

    pub async fn add_output(
        &mut self,
        stream_id: &str,
        pkg: &str,
        url: String,
        name: String,
        media: &dyn MediaBackend,
    ) -> Result<String, BrokerError> {
        let entity = self.streams.get(stream_id).ok_or(BrokerError::NotFound)?;
        if !entity.viewers.contains(pkg) {
            return Err(BrokerError::AuthError);
        }
        if !(url.starts_with("rtmp://") || url.starts_with("rtmps://")) {
            return Err(BrokerError::ProtocolError);
        }
        if entity.outputs.values().any(|o| o.url == url) {
            return Err(BrokerError::ProtocolError);
        }
        if entity.outputs.len() >= self.max_outputs_per_stream {
            return Err(BrokerError::ResourceExhausted);
        }
        if *self.outputs_by_app.get(pkg).unwrap_or(&0) >= self.max_outputs_per_app {
            return Err(BrokerError::ResourceExhausted);
        }

        let output_id = media.add_restream_output(stream_id, &url, &name).await?;
        let entity = self.streams.get_mut(stream_id).ok_or(BrokerError::NotFound)?;
        entity.outputs.insert(
            output_id.clone(),
            OutputEntry { url, name, added_by: pkg.to_owned() },
        );
        *self.outputs_by_app.entry(pkg.to_owned()).or_insert(0) += 1;
        Ok(output_id)
    }

    pub async fn remove_output(
        &mut self,
        stream_id: &str,
        pkg: &str,
        output_id: &str,
        media: &dyn MediaBackend,
    ) -> Result<(), BrokerError> {
        let entity = self.streams.get(stream_id).ok_or(BrokerError::NotFound)?;
        if !entity.viewers.contains(pkg) {
            return Err(BrokerError::AuthError);
        }
        if !entity.outputs.contains_key(output_id) {
            return Err(BrokerError::NotFound);
        }

        media.remove_restream_output(stream_id, output_id).await;
        let entity = self.streams.get_mut(stream_id).ok_or(BrokerError::NotFound)?;
        if let Some(removed) = entity.outputs.remove(output_id) {
            if let Some(count) = self.outputs_by_app.get_mut(&removed.added_by) {
                *count = count.saturating_sub(1);
            }
        }
        Ok(())
    }

    // -- 4.7.3 Keep-alive / ACK protocol -----------------------------------

    /// The 15 s keep-alive timer fired for `stream_id`.
    pub fn keep_alive_tick(&mut self, stream_id: &str, ack_id: String, timestamp: u64) -> Vec<StreamEffect> {
        let Some(entity) = self.streams.get_mut(stream_id) else { return vec![] };
        if !entity.keep_alive_active {
            return vec![];
        }
        entity.pending_ack_id = Some(ack_id.clone());

        vec![
            StreamEffect::SendToGlasses(GlassesOutbound::KeepRtmpStreamAlive {
                stream_id: stream_id.to_owned(),
                ack_id: ack_id.clone(),
                timestamp,
            }),
            StreamEffect::ScheduleAckTimeout { stream_id: stream_id.to_owned(), ack_id },
        ]
    }

    pub fn on_keep_alive_ack(&mut self, stream_id: &str, ack_id: &str) {
        if let Some(entity) = self.streams.get_mut(stream_id) {
            if entity.pending_ack_id.as_deref() == Some(ack_id) {
                entity.pending_ack_id = None;
                entity.missed_acks = 0;
            }
        }
    }

    /// The 5 s ACK timer fired; ignored if the ACK already arrived or the
    /// stream moved on in the meantime.
    pub fn on_ack_timeout(&mut self, stream_id: &str, ack_id: &str) -> Vec<StreamEffect> {
        let Some(entity) = self.streams.get_mut(stream_id) else { return vec![] };
        if entity.pending_ack_id.as_deref() != Some(ack_id) {
            return vec![];
        }
        entity.pending_ack_id = None;
        entity.missed_acks += 1;

        if entity.missed_acks >= self.missed_ack_threshold {
            entity.keep_alive_active = false;
            self.terminate(stream_id, StreamStatus::Timeout)
        } else {
            vec![]
        }
    }

    // -- 4.7.5 Status fan-out -----------------------------------------------

    pub fn on_status_update(
        &mut self,
        stream_id: &str,
        raw_status: &str,
        error_details: Option<String>,
    ) -> Vec<StreamEffect> {
        let Some(entity) = self.streams.get_mut(stream_id) else {
            warn!(stream_id, "status update for unknown stream");
            return vec![];
        };

        let status = StreamStatus::normalize(raw_status);
        entity.status = status;
        if matches!(status, StreamStatus::Stopped | StreamStatus::Timeout | StreamStatus::Error) {
            entity.keep_alive_active = false;
        }

        let message = AppOutbound::RtmpStreamStatus {
            stream_id: stream_id.to_owned(),
            status,
            access_urls: None,
            error_details,
        };

        let app_ids = match &entity.kind {
            StreamKind::Direct { requester_app_id } => vec![requester_app_id.clone()],
            StreamKind::Managed { .. } => entity.viewers.iter().cloned().collect(),
        };

        let mut effects = vec![StreamEffect::NotifyApps { app_ids, message }];
        if matches!(status, StreamStatus::Stopped | StreamStatus::Timeout) {
            effects.push(StreamEffect::CancelKeepAlive { stream_id: stream_id.to_owned() });
        }
        effects
    }

    // -- 4.7.6 Session teardown ---------------------------------------------

    /// Every stream owned by the session, for teardown notification and
    /// `ReleaseIngest` bookkeeping. Caller still must invoke the collaborator.
    pub fn all_stream_ids(&self) -> Vec<String> {
        self.streams.keys().cloned().collect()
    }

    pub fn is_managed(&self, stream_id: &str) -> bool {
        self.streams.get(stream_id).is_some_and(|e| !e.is_direct())
    }

    fn terminate(&mut self, stream_id: &str, status: StreamStatus) -> Vec<StreamEffect> {
        let Some(entity) = self.streams.get_mut(stream_id) else { return vec![] };
        entity.status = status;
        entity.keep_alive_active = false;

        let message = AppOutbound::RtmpStreamStatus {
            stream_id: stream_id.to_owned(),
            status,
            access_urls: None,
            error_details: None,
        };
        let app_ids = match &entity.kind {
            StreamKind::Direct { requester_app_id } => vec![requester_app_id.clone()],
            StreamKind::Managed { .. } => entity.viewers.iter().cloned().collect(),
        };

        if self.direct_stream_id.as_deref() == Some(stream_id) {
            self.direct_stream_id = None;
        }
        if self.managed_stream_id.as_deref() == Some(stream_id) {
            self.managed_stream_id = None;
        }

        vec![
            StreamEffect::CancelKeepAlive { stream_id: stream_id.to_owned() },
            StreamEffect::SendToGlasses(GlassesOutbound::StopRtmpStream { app_id: None }),
            StreamEffect::NotifyApps { app_ids, message },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryMediaBackend;

    #[test]
    fn second_direct_request_is_rejected_busy() {
        let mut sup = StreamSupervisor::new(10, 10, 3);
        sup.request_direct("app.a", "rtmp://x/k".into(), "s1".into(), (None, None, None));
        let effects = sup.request_direct("app.b", "rtmp://y/k".into(), "s2".into(), (None, None, None));
        assert_eq!(effects.len(), 2);
        assert!(sup.get("s2").is_none());
    }

    #[test]
    fn missed_acks_threshold_times_out_stream() {
        let mut sup = StreamSupervisor::new(10, 10, 3);
        sup.request_direct("app.a", "rtmp://x/k".into(), "s1".into(), (None, None, None));
        sup.keep_alive_tick("s1", "k1".into(), 0);
        sup.on_ack_timeout("s1", "k1");
        sup.keep_alive_tick("s1", "k2".into(), 0);
        sup.on_ack_timeout("s1", "k2");
        sup.keep_alive_tick("s1", "k3".into(), 0);
        let effects = sup.on_ack_timeout("s1", "k3");
        assert_eq!(sup.get("s1").unwrap().status, StreamStatus::Timeout);
        assert!(!effects.is_empty());
    }

    #[test]
    fn ack_before_timeout_resets_missed_count() {
        let mut sup = StreamSupervisor::new(10, 10, 3);
        sup.request_direct("app.a", "rtmp://x/k".into(), "s1".into(), (None, None, None));
        sup.keep_alive_tick("s1", "k1".into(), 0);
        sup.on_ack_timeout("s1", "k1");
        sup.keep_alive_tick("s1", "k2".into(), 0);
        sup.on_keep_alive_ack("s1", "k2");
        assert_eq!(sup.get("s1").unwrap().missed_acks, 0);
    }

    #[tokio::test]
    async fn second_viewer_joins_existing_managed_stream() {
        let mut sup = StreamSupervisor::new(10, 10, 3);
        let media = InMemoryMediaBackend::new();
        sup.subscribe_cloud_rtmp("app.a", || "s1".into(), &media).await.unwrap();
        let effects = sup.subscribe_cloud_rtmp("app.b", || "s2".into(), &media).await.unwrap();
        assert_eq!(effects.len(), 1);
        assert!(sup.get("s2").is_none());
        assert_eq!(sup.get("s1").unwrap().viewers.len(), 2);
    }

    #[tokio::test]
    async fn outputs_per_stream_cap_enforced() {
        let mut sup = StreamSupervisor::new(1, 10, 3);
        let media = InMemoryMediaBackend::new();
        sup.subscribe_cloud_rtmp("app.a", || "s1".into(), &media).await.unwrap();
        sup.add_output("s1", "app.a", "rtmp://out/1".into(), "first".into(), &media).await.unwrap();
        let err = sup
            .add_output("s1", "app.a", "rtmp://out/2".into(), "second".into(), &media)
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::ResourceExhausted);
    }

    #[tokio::test]
    async fn output_url_must_be_rtmp_scheme() {
        let mut sup = StreamSupervisor::new(10, 10, 3);
        let media = InMemoryMediaBackend::new();
        sup.subscribe_cloud_rtmp("app.a", || "s1".into(), &media).await.unwrap();
        let err = sup
            .add_output("s1", "app.a", "https://out/1".into(), "bad".into(), &media)
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::ProtocolError);
    }
}
