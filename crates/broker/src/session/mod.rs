// SPDX-License-Identifier: BUSL-1.1

//! The single-writer session actor (§5).
//!
//! One `UserSession` owns every piece of mutable state for one logical user:
//! the attached glasses transport, connected Apps, and every C3-C9 manager.
//! It is driven exclusively by a merged command queue — no other task ever
//! touches this state directly, which is what lets every manager above skip
//! interior locking entirely.

pub mod handle;
mod timers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::Collaborators;
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::managers::app_manager::{AppManager, WebhookClient};
use crate::managers::audio::AudioManager;
use crate::managers::display::DisplayManager;
use crate::managers::photo::PhotoRequestTracker;
use crate::managers::stream_supervisor::{StreamEffect, StreamSupervisor};
use crate::managers::subscription::SubscriptionManager;
use crate::messages::{AppInbound, AppOutbound, GlassesInbound, GlassesOutbound, HeadPosition, StreamType, View};

use handle::TransportHandle;
use timers::TimerRegistry;

/// Commands the session actor reacts to. Every source of state mutation —
/// inbound socket traffic, timer expiry, registry-driven disposal — funnels
/// through this one type so the actor's `select!` loop is the only place
/// session state is ever touched.
pub enum SessionCommand {
    GlassesConnected(TransportHandle),
    GlassesDisconnected,
    GlassesMessage(GlassesInbound),
    GlassesAudioFrame(Vec<u8>),
    GlassesGraceExpired,

    AppConnected { package_name: String, handle: TransportHandle },
    AppDisconnected { package_name: String },
    AppMessage { package_name: String, message: AppInbound },
    StartApp { package_name: String },
    StopApp { package_name: String },
    AppStartTimeoutExpired { package_name: String },
    AppStopGraceExpired { package_name: String },

    DisplayCoalesceExpired,

    StreamKeepAliveTick { stream_id: String },
    StreamAckTimeout { stream_id: String, ack_id: String },
    StreamManagedGraceExpired { stream_id: String },
    StreamDirectStopFinalize { stream_id: String },

    PhotoExpireTick { request_id: String },

    Dispose,
}

pub struct UserSession {
    user_id: String,
    session_id: String,
    config: Arc<BrokerConfig>,
    collaborators: Collaborators,

    subscriptions: SubscriptionManager,
    apps: AppManager,
    display: DisplayManager,
    audio: AudioManager,
    streams: StreamSupervisor,
    photos: PhotoRequestTracker,
    webhook: WebhookClient,

    glasses: Option<TransportHandle>,
    app_handles: HashMap<String, TransportHandle>,

    timers: TimerRegistry,
    tx: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
}

impl UserSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: String,
        session_id: String,
        config: Arc<BrokerConfig>,
        collaborators: Collaborators,
        tx: mpsc::Sender<SessionCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            subscriptions: SubscriptionManager::new(),
            apps: AppManager::new(),
            display: DisplayManager::new(config.display_rate_limit()),
            audio: AudioManager::new(config.audio_ring_capacity_bytes()),
            streams: StreamSupervisor::new(
                config.stream_max_outputs_per_stream,
                config.stream_max_outputs_per_app,
                config.stream_missed_ack_threshold,
            ),
            photos: PhotoRequestTracker::new(config.photo_request_timeout()),
            webhook: WebhookClient::new(config.app_start_timeout()),
            glasses: None,
            app_handles: HashMap::new(),
            timers: TimerRegistry::new(cancel.child_token()),
            user_id,
            session_id,
            config,
            collaborators,
            tx,
            cancel,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        info!(user_id = self.user_id.as_str(), "session started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                cmd = rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Dispose) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
            }
        }
        self.dispose().await;
        info!(user_id = self.user_id.as_str(), "session disposed");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Dispose => {}
            SessionCommand::GlassesConnected(handle) => {
                self.timers.cancel("glasses_grace");
                self.glasses = Some(handle);
            }
            SessionCommand::GlassesDisconnected => {
                self.glasses = None;
                self.timers.arm(
                    "glasses_grace",
                    self.config.glasses_grace(),
                    SessionCommand::GlassesGraceExpired,
                    self.tx.clone(),
                );
            }
            SessionCommand::GlassesGraceExpired => {
                if self.glasses.is_none() {
                    self.cancel.cancel();
                }
            }
            SessionCommand::GlassesMessage(msg) => self.handle_glasses_message(msg).await,
            SessionCommand::GlassesAudioFrame(frame) => self.handle_audio_frame(frame),

            SessionCommand::AppConnected { package_name, handle } => {
                self.timers.cancel(&format!("app_start:{package_name}"));
                self.app_handles.insert(package_name.clone(), handle);
                self.apps.mark_running(&package_name);
                self.collaborators.store.record_app_active(&self.user_id, &package_name).await;
                self.broadcast_app_state();
            }
            SessionCommand::AppDisconnected { package_name } => self.handle_app_disconnect(&package_name),
            SessionCommand::AppMessage { package_name, message } => {
                self.handle_app_message(&package_name, message).await
            }
            SessionCommand::StartApp { package_name } => self.start_app(package_name).await,
            SessionCommand::StopApp { package_name } => self.request_stop_app(&package_name),
            SessionCommand::AppStartTimeoutExpired { package_name } => {
                if self.apps.state_of(&package_name) == crate::managers::app_manager::AppState::Starting {
                    self.apps.mark_failed(&package_name, "webhook connect timeout");
                    self.broadcast_app_state();
                }
            }
            SessionCommand::AppStopGraceExpired { package_name } => {
                if let Some(handle) = self.app_handles.remove(&package_name) {
                    handle.close_with(1000, "stop grace expired");
                }
                self.apps.mark_stopped(&package_name);
                self.subscriptions.clear(&package_name);
                self.broadcast_app_state();
            }

            SessionCommand::DisplayCoalesceExpired => self.emit_display_event(Instant::now()),

            SessionCommand::StreamKeepAliveTick { stream_id } => {
                let ack_id = Uuid::new_v4().to_string();
                let timestamp = now_millis();
                let effects = self.streams.keep_alive_tick(&stream_id, ack_id, timestamp);
                self.apply_stream_effects(effects);
            }
            SessionCommand::StreamAckTimeout { stream_id, ack_id } => {
                let effects = self.streams.on_ack_timeout(&stream_id, &ack_id);
                self.apply_stream_effects(effects);
            }
            SessionCommand::StreamManagedGraceExpired { stream_id } => {
                let effects = self.streams.managed_grace_expired(&stream_id);
                self.apply_stream_effects(effects);
            }
            SessionCommand::StreamDirectStopFinalize { stream_id } => {
                let effects = self.streams.finalize_direct_stop(&stream_id);
                self.apply_stream_effects(effects);
            }

            SessionCommand::PhotoExpireTick { request_id } => {
                self.photos.expire(&request_id);
            }
        }
    }

    // -- Glasses inbound ----------------------------------------------------

    async fn handle_glasses_message(&mut self, msg: GlassesInbound) {
        match msg {
            GlassesInbound::ConnectionInit { user_id, device_model, .. } => {
                debug!(user_id, device_model, "glasses connection_init");
            }
            GlassesInbound::RtmpStreamStatus { stream_id, status, stats: _, error_details } => {
                let effects = self.streams.on_status_update(&stream_id, &status, error_details);
                self.apply_stream_effects(effects);
            }
            GlassesInbound::KeepAliveAck { stream_id, ack_id, .. } => {
                self.streams.on_keep_alive_ack(&stream_id, &ack_id);
                self.timers.cancel(&format!("ack:{stream_id}"));
            }
            GlassesInbound::ButtonPress { button_id, press_type } => {
                self.broadcast_data_stream(
                    StreamType::ButtonPress,
                    serde_json::json!({ "buttonId": button_id, "pressType": press_type }),
                );
            }
            GlassesInbound::HeadPosition { position } => {
                let view = match position {
                    HeadPosition::Up => View::Dashboard,
                    HeadPosition::Down => View::Main,
                };
                self.display.set_view(view);
                self.broadcast_data_stream(
                    StreamType::HeadPosition,
                    serde_json::json!({ "position": position }),
                );
                self.emit_display_event(Instant::now());
            }
            GlassesInbound::LocationUpdate { lat, lng, accuracy } => {
                self.broadcast_data_stream(
                    StreamType::Location,
                    serde_json::json!({ "lat": lat, "lng": lng, "accuracy": accuracy }),
                );
            }
            GlassesInbound::PhotoResponse { request_id, image_url, error } => {
                self.resolve_photo(request_id, image_url, error);
            }
        }
    }

    fn handle_audio_frame(&mut self, frame: Vec<u8>) {
        if !self.subscriptions.subscribers_for(StreamType::AudioChunk).is_empty() {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&frame);
            self.broadcast_data_stream(StreamType::AudioChunk, serde_json::json!({ "data": encoded }));
        }
        if let Some(transition) = self.audio.append(&frame) {
            self.broadcast_data_stream(
                StreamType::Vad,
                serde_json::json!({ "from": format!("{:?}", transition.from), "to": format!("{:?}", transition.to) }),
            );
        }
    }

    fn resolve_photo(&mut self, request_id: String, image_url: Option<String>, error: Option<String>) {
        let Some(pkg) = self.photos.resolve(&request_id) else {
            warn!(request_id, "photo response for unknown or expired request");
            return;
        };

        let data = serde_json::json!({ "requestId": request_id, "imageUrl": image_url, "error": error });
        if let Some(handle) = self.app_handles.get(&pkg) {
            handle.send_json(&AppOutbound::DataStream { stream_type: StreamType::PhotoTaken, data });
        }
    }

    // -- App inbound ----------------------------------------------------------

    async fn handle_app_message(&mut self, pkg: &str, msg: AppInbound) {
        match msg {
            AppInbound::TpaConnectionInit { .. } => {
                // Connection establishment is handled by the transport layer
                // before an `AppConnected` command is posted; a second
                // `tpa_connection_init` on an already-running App is ignored.
            }
            AppInbound::SubscriptionUpdate { subscriptions } => {
                self.subscriptions.set_subscriptions(pkg, subscriptions);
            }
            AppInbound::DisplayRequest { view, content, layout, duration_ms } => {
                let now = Instant::now();
                self.display.push(view, pkg, content, layout, duration_ms.map(Duration::from_millis), now);
                self.emit_display_event(now);
            }
            AppInbound::RtmpStreamRequest { rtmp_url, video, audio, stream } => {
                let stream_id = Uuid::new_v4().to_string();
                let effects = self.streams.request_direct(pkg, rtmp_url, stream_id, (video, audio, stream));
                self.apply_stream_effects(effects);
            }
            AppInbound::RtmpStreamStop { stream_id } => {
                let target = stream_id.or_else(|| self.streams.direct_stream_id().map(str::to_owned));
                if let Some(stream_id) = target {
                    if let Some(effects) = self.streams.stop_direct(pkg, &stream_id) {
                        self.apply_stream_effects(effects);
                    }
                }
            }
            AppInbound::PhotoRequest { save_to_gallery } => {
                let request_id = Uuid::new_v4().to_string();
                self.photos.create_for_app(request_id.clone(), pkg, Instant::now());
                self.timers.arm(
                    format!("photo:{request_id}"),
                    self.config.photo_request_timeout(),
                    SessionCommand::PhotoExpireTick { request_id: request_id.clone() },
                    self.tx.clone(),
                );
                if let Some(glasses) = &self.glasses {
                    glasses.send_json(&GlassesOutbound::RequestPhoto { request_id, save_to_gallery });
                }
            }
            AppInbound::AddOutput { stream_id, url, name } => {
                let media = Arc::clone(&self.collaborators.media_backend);
                let result = self.streams.add_output(&stream_id, pkg, url, name, media.as_ref()).await;
                if let Err(e) = result {
                    self.send_app_error(pkg, e, "add_output failed");
                }
            }
            AppInbound::RemoveOutput { stream_id, output_id } => {
                let media = Arc::clone(&self.collaborators.media_backend);
                let result = self.streams.remove_output(&stream_id, pkg, &output_id, media.as_ref()).await;
                if let Err(e) = result {
                    self.send_app_error(pkg, e, "remove_output failed");
                }
            }
        }
    }

    fn handle_app_disconnect(&mut self, pkg: &str) {
        self.app_handles.remove(pkg);
        self.apps.mark_stopped(pkg);
        self.subscriptions.clear(pkg);
        self.display.clear_app(pkg, None);
        self.streams.unsubscribe_cloud_rtmp(pkg);
        self.broadcast_app_state();
    }

    // -- App lifecycle ----------------------------------------------------

    async fn start_app(&mut self, package_name: String) {
        if self.apps.begin_starting(&package_name).is_err() {
            warn!(package_name = package_name.as_str(), "app start rejected, stream teardown in progress");
            return;
        }

        let Some(app) = self.collaborators.store.get_app(&package_name).await else {
            self.apps.mark_failed(&package_name, "unknown app package");
            return;
        };

        self.timers.arm(
            format!("app_start:{package_name}"),
            self.config.app_start_timeout(),
            SessionCommand::AppStartTimeoutExpired { package_name: package_name.clone() },
            self.tx.clone(),
        );

        if let Err(e) = self.webhook.start(&app, &self.session_id, &self.user_id).await {
            warn!(package_name = package_name.as_str(), error = %e, "webhook start failed");
            self.apps.mark_failed(&package_name, "webhook start failed");
            self.timers.cancel(&format!("app_start:{package_name}"));
        }

        self.broadcast_app_state();
    }

    fn request_stop_app(&mut self, package_name: &str) {
        if !self.apps.begin_stopping(package_name) {
            return;
        }
        if let Some(handle) = self.app_handles.get(package_name) {
            handle.close_with(1000, "app stopped");
        }
        self.timers.arm(
            format!("app_stop:{package_name}"),
            self.config.app_stop_grace(),
            SessionCommand::AppStopGraceExpired { package_name: package_name.to_owned() },
            self.tx.clone(),
        );
        self.broadcast_app_state();
    }

    // -- Fan-out helpers ----------------------------------------------------

    fn broadcast_data_stream(&self, stream_type: StreamType, data: Value) {
        for app_id in self.subscriptions.subscribers_for(stream_type) {
            if let Some(handle) = self.app_handles.get(&app_id) {
                handle.send_json(&AppOutbound::DataStream { stream_type, data: data.clone() });
            }
        }
    }

    fn broadcast_app_state(&self) {
        let message = AppOutbound::AppStateChange {
            running: self.apps.running_packages(),
            loading: self.apps.loading_packages(),
        };
        for handle in self.app_handles.values() {
            handle.send_json(&message);
        }
        if let Some(glasses) = &self.glasses {
            glasses.send_json(&GlassesOutbound::AppStateChange {
                running: self.apps.running_packages(),
                loading: self.apps.loading_packages(),
            });
        }
    }

    fn emit_display_event(&mut self, now: Instant) {
        if !self.display.should_emit_now(now) {
            self.timers.arm(
                "display_coalesce",
                self.config.display_rate_limit(),
                SessionCommand::DisplayCoalesceExpired,
                self.tx.clone(),
            );
            return;
        }
        self.display.mark_emitted(now);
        let Some(glasses) = &self.glasses else { return };
        let (content, layout) = match self.display.visible_content() {
            Some(item) => (item.content.clone(), item.layout.clone()),
            None => (Value::Null, Value::Null),
        };
        glasses.send_json(&GlassesOutbound::DisplayEvent {
            view: self.display.active_view(),
            content,
            layout,
            timestamp: now_millis(),
        });
    }

    fn send_app_error(&self, pkg: &str, error: BrokerError, message: &str) {
        if let Some(handle) = self.app_handles.get(pkg) {
            handle.send_json(&AppOutbound::ProtocolError { message: format!("{error}: {message}") });
        }
    }

    fn apply_stream_effects(&mut self, effects: Vec<StreamEffect>) {
        for effect in effects {
            match effect {
                StreamEffect::SendToGlasses(msg) => {
                    if let Some(glasses) = &self.glasses {
                        glasses.send_json(&msg);
                    }
                }
                StreamEffect::NotifyApps { app_ids, message } => {
                    for app_id in app_ids {
                        if let Some(handle) = self.app_handles.get(&app_id) {
                            handle.send_json(&message);
                        }
                    }
                }
                StreamEffect::BroadcastBusy { message } => {
                    for app_id in self.subscriptions.rtmp_status_busy_recipients() {
                        if let Some(handle) = self.app_handles.get(&app_id) {
                            handle.send_json(&message);
                        }
                    }
                }
                StreamEffect::StartKeepAlive { stream_id } => {
                    self.timers.arm(
                        format!("keepalive:{stream_id}"),
                        self.config.stream_keepalive_interval(),
                        SessionCommand::StreamKeepAliveTick { stream_id },
                        self.tx.clone(),
                    );
                }
                StreamEffect::CancelKeepAlive { stream_id } => {
                    self.timers.cancel(&format!("keepalive:{stream_id}"));
                    self.timers.cancel(&format!("ack:{stream_id}"));
                }
                StreamEffect::ScheduleAckTimeout { stream_id, ack_id } => {
                    self.timers.arm(
                        format!("ack:{stream_id}"),
                        self.config.stream_ack_timeout(),
                        SessionCommand::StreamAckTimeout { stream_id: stream_id.clone(), ack_id },
                        self.tx.clone(),
                    );
                    // Re-arm the keep-alive cadence after sending this tick.
                    self.timers.arm(
                        format!("keepalive:{stream_id}"),
                        self.config.stream_keepalive_interval(),
                        SessionCommand::StreamKeepAliveTick { stream_id },
                        self.tx.clone(),
                    );
                }
                StreamEffect::ScheduleManagedGrace { stream_id } => {
                    self.timers.arm(
                        format!("managed_grace:{stream_id}"),
                        self.config.stream_managed_grace(),
                        SessionCommand::StreamManagedGraceExpired { stream_id },
                        self.tx.clone(),
                    );
                }
                StreamEffect::ScheduleDirectStopFinalize { stream_id } => {
                    self.timers.arm(
                        format!("direct_stop:{stream_id}"),
                        self.config.stream_direct_stop_grace(),
                        SessionCommand::StreamDirectStopFinalize { stream_id },
                        self.tx.clone(),
                    );
                }
            }
        }
    }

    // -- Teardown (§4.7.6) ----------------------------------------------------

    async fn dispose(&mut self) {
        for stream_id in self.streams.all_stream_ids() {
            if self.streams.is_managed(&stream_id) {
                self.collaborators.media_backend.release_ingest(&stream_id).await;
            }
        }
        self.timers.cancel_all();
        self.app_handles.clear();
        self.glasses = None;
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
