// SPDX-License-Identifier: BUSL-1.1

//! Wire-format message envelopes for the glasses and App WebSocket endpoints.
//!
//! Tagged enums mirror wire names exactly: `#[serde(rename_all = "snake_case")]`
//! on the tag picks the `"type"` discriminant, and a separate
//! `#[serde(rename_all = "camelCase")]` on every struct-like variant renames
//! its fields to match the existing glasses/App firmware and SDKs (the two
//! attributes are orthogonal — the tag's casing says nothing about field
//! casing). Adding a new message kind is an exhaustive-match compile error
//! everywhere it needs to be handled, never a silent no-op.

use serde::{Deserialize, Serialize};

/// Device capability descriptor reported at `connection_init`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    #[serde(default)]
    pub has_camera: bool,
    #[serde(default)]
    pub has_display: bool,
    #[serde(default)]
    pub has_microphone: bool,
    #[serde(default)]
    pub has_buttons: bool,
}

/// Typed stream a subscription can target (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    ButtonPress,
    Location,
    HeadPosition,
    Transcription,
    PhotoTaken,
    AudioChunk,
    RtmpStatus,
    CloudRtmp,
    Vad,
}

/// Head position reported by glasses; selects the active display view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadPosition {
    Up,
    Down,
}

/// Display view a `DisplayRequest` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Dashboard,
    Main,
}

/// Lifecycle status of an RTMP stream, normalized from the wire values glasses send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Initializing,
    Active,
    Stopping,
    Stopped,
    Timeout,
    Error,
    /// Only ever sent to the requester of a rejected direct stream, and broadcast
    /// on `RTMP_STATUS` per the privacy carve-out in §4.3.
    Busy,
}

impl StreamStatus {
    /// Normalize a glasses-reported status string (§6.1) onto the stream lifecycle.
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "connecting" | "initializing" => Self::Initializing,
            "active" | "streaming" => Self::Active,
            "stopping" => Self::Stopping,
            "stopped" | "disconnected" => Self::Stopped,
            "timeout" => Self::Timeout,
            _ => Self::Error,
        }
    }
}

// -- Glasses -> Cloud ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GlassesInbound {
    #[serde(rename_all = "camelCase")]
    ConnectionInit { user_id: String, device_model: String, capabilities: DeviceCapabilities },
    #[serde(rename_all = "camelCase")]
    RtmpStreamStatus {
        stream_id: String,
        status: String,
        #[serde(default)]
        stats: Option<serde_json::Value>,
        #[serde(default)]
        error_details: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    KeepAliveAck { stream_id: String, ack_id: String, timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    ButtonPress { button_id: String, press_type: String },
    HeadPosition { position: HeadPosition },
    LocationUpdate { lat: f64, lng: f64, #[serde(default)] accuracy: Option<f64> },
    #[serde(rename_all = "camelCase")]
    PhotoResponse {
        request_id: String,
        #[serde(default)]
        image_url: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

// -- Cloud -> Glasses ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GlassesOutbound {
    #[serde(rename_all = "camelCase")]
    StartRtmpStream {
        stream_id: String,
        rtmp_url: String,
        #[serde(default)]
        video: Option<serde_json::Value>,
        #[serde(default)]
        audio: Option<serde_json::Value>,
        #[serde(default)]
        stream: Option<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    StopRtmpStream {
        #[serde(default)]
        app_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    KeepRtmpStreamAlive { stream_id: String, ack_id: String, timestamp: u64 },
    DisplayEvent { view: View, content: serde_json::Value, layout: serde_json::Value, timestamp: u64 },
    AppStateChange { running: Vec<String>, loading: Vec<String> },
    MicrophoneStateChange { enabled: bool },
    #[serde(rename_all = "camelCase")]
    RequestPhoto { request_id: String, save_to_gallery: bool },
    ProtocolError { message: String },
}

// -- App -> Cloud ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppInbound {
    #[serde(rename_all = "camelCase")]
    TpaConnectionInit { package_name: String, api_key: String, session_id: String },
    SubscriptionUpdate { subscriptions: Vec<StreamType> },
    DisplayRequest {
        view: View,
        content: serde_json::Value,
        layout: serde_json::Value,
        #[serde(default, rename = "durationMs")]
        duration_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    RtmpStreamRequest {
        rtmp_url: String,
        #[serde(default)]
        video: Option<serde_json::Value>,
        #[serde(default)]
        audio: Option<serde_json::Value>,
        #[serde(default)]
        stream: Option<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    RtmpStreamStop {
        #[serde(default)]
        stream_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    PhotoRequest {
        #[serde(default)]
        save_to_gallery: bool,
    },
    #[serde(rename_all = "camelCase")]
    AddOutput { stream_id: String, url: String, name: String },
    #[serde(rename_all = "camelCase")]
    RemoveOutput { stream_id: String, output_id: String },
}

// -- Cloud -> App ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppOutbound {
    #[serde(rename_all = "camelCase")]
    ConnectionAck { session_id: String },
    #[serde(rename_all = "camelCase")]
    DataStream { stream_type: StreamType, data: serde_json::Value },
    #[serde(rename_all = "camelCase")]
    RtmpStreamStatus {
        stream_id: String,
        status: StreamStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        access_urls: Option<AccessUrls>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_details: Option<String>,
    },
    SettingsUpdate { settings: serde_json::Value },
    AppStateChange { running: Vec<String>, loading: Vec<String> },
    ProtocolError { message: String },
}

/// Viewer-facing URLs for a managed stream (§3, §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessUrls {
    pub hls: String,
    pub rtmp: String,
    pub dash: String,
}
