// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;

/// Configuration for the glasses session broker.
#[derive(Debug, Clone, clap::Args)]
pub struct BrokerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "BROKER_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8900, env = "BROKER_PORT")]
    pub port: u16,

    /// Bearer token for HTTP/WS auth. If unset, auth is disabled.
    #[arg(long, env = "BROKER_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Glasses heartbeat ping interval in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "BROKER_GLASSES_HEARTBEAT_MS")]
    pub glasses_heartbeat_ms: u64,

    /// Glasses transport is considered dead after this much silence.
    #[arg(long, default_value_t = 30_000, env = "BROKER_GLASSES_TIMEOUT_MS")]
    pub glasses_timeout_ms: u64,

    /// Grace window after glasses disconnect before the session is disposed.
    #[arg(long, default_value_t = 60_000, env = "BROKER_GLASSES_GRACE_MS")]
    pub glasses_grace_ms: u64,

    /// Max time to wait for an App to open its WebSocket after `webhook_start`.
    #[arg(long, default_value_t = 10_000, env = "BROKER_APP_START_TIMEOUT_MS")]
    pub app_start_timeout_ms: u64,

    /// Grace period between sending `STOP` and force-closing an App transport.
    #[arg(long, default_value_t = 2_000, env = "BROKER_APP_STOP_GRACE_MS")]
    pub app_stop_grace_ms: u64,

    /// Minimum interval between `DISPLAY_EVENT` emissions for a session.
    #[arg(long, default_value_t = 50, env = "BROKER_DISPLAY_RATE_LIMIT_MS")]
    pub display_rate_limit_ms: u64,

    /// Seconds of audio retained in the rolling ring buffer.
    #[arg(long, default_value_t = 10, env = "BROKER_AUDIO_RING_SECONDS")]
    pub audio_ring_seconds: u64,

    /// Bytes/second assumed for sizing the audio ring buffer.
    #[arg(long, default_value_t = 16_000, env = "BROKER_AUDIO_BYTES_PER_SECOND")]
    pub audio_bytes_per_second: u64,

    /// Keep-alive cadence for active RTMP streams.
    #[arg(long, default_value_t = 15_000, env = "BROKER_STREAM_KEEPALIVE_INTERVAL_MS")]
    pub stream_keepalive_interval_ms: u64,

    /// Window to wait for a keep-alive ACK before counting it as missed.
    #[arg(long, default_value_t = 5_000, env = "BROKER_STREAM_ACK_TIMEOUT_MS")]
    pub stream_ack_timeout_ms: u64,

    /// Consecutive missed ACKs before a stream is marked `timeout`.
    #[arg(long, default_value_t = 3, env = "BROKER_STREAM_MISSED_ACK_THRESHOLD")]
    pub stream_missed_ack_threshold: u32,

    /// Max time to wait for glasses to confirm a direct-stream stop.
    #[arg(long, default_value_t = 15_000, env = "BROKER_STREAM_DIRECT_STOP_GRACE_MS")]
    pub stream_direct_stop_grace_ms: u64,

    /// Grace period after the last managed-stream viewer leaves before teardown.
    #[arg(long, default_value_t = 30_000, env = "BROKER_STREAM_MANAGED_GRACE_MS")]
    pub stream_managed_grace_ms: u64,

    /// Cap on outputs per managed stream.
    #[arg(long, default_value_t = 10, env = "BROKER_STREAM_MAX_OUTPUTS_PER_STREAM")]
    pub stream_max_outputs_per_stream: usize,

    /// Cap on outputs added by a single App across all of a session's managed streams.
    #[arg(long, default_value_t = 10, env = "BROKER_STREAM_MAX_OUTPUTS_PER_APP")]
    pub stream_max_outputs_per_app: usize,

    /// Photo request expiry.
    #[arg(long, default_value_t = 30_000, env = "BROKER_PHOTO_REQUEST_TIMEOUT_MS")]
    pub photo_request_timeout_ms: u64,

    /// Malformed-message threshold before a transport is closed.
    #[arg(long, default_value_t = 3, env = "BROKER_PROTOCOL_ERROR_THRESHOLD")]
    pub protocol_error_threshold: u32,

    /// Rolling window over which `protocol_error_threshold` is counted.
    #[arg(long, default_value_t = 60_000, env = "BROKER_PROTOCOL_ERROR_WINDOW_MS")]
    pub protocol_error_window_ms: u64,
}

impl BrokerConfig {
    pub fn glasses_heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.glasses_heartbeat_ms)
    }

    pub fn glasses_timeout(&self) -> Duration {
        Duration::from_millis(self.glasses_timeout_ms)
    }

    pub fn glasses_grace(&self) -> Duration {
        Duration::from_millis(self.glasses_grace_ms)
    }

    pub fn app_start_timeout(&self) -> Duration {
        Duration::from_millis(self.app_start_timeout_ms)
    }

    pub fn app_stop_grace(&self) -> Duration {
        Duration::from_millis(self.app_stop_grace_ms)
    }

    pub fn display_rate_limit(&self) -> Duration {
        Duration::from_millis(self.display_rate_limit_ms)
    }

    pub fn audio_ring_capacity_bytes(&self) -> usize {
        (self.audio_ring_seconds * self.audio_bytes_per_second) as usize
    }

    pub fn stream_keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.stream_keepalive_interval_ms)
    }

    pub fn stream_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_ack_timeout_ms)
    }

    pub fn stream_direct_stop_grace(&self) -> Duration {
        Duration::from_millis(self.stream_direct_stop_grace_ms)
    }

    pub fn stream_managed_grace(&self) -> Duration {
        Duration::from_millis(self.stream_managed_grace_ms)
    }

    pub fn photo_request_timeout(&self) -> Duration {
        Duration::from_millis(self.photo_request_timeout_ms)
    }

    pub fn protocol_error_window(&self) -> Duration {
        Duration::from_millis(self.protocol_error_window_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8900,
            auth_token: None,
            glasses_heartbeat_ms: 10_000,
            glasses_timeout_ms: 30_000,
            glasses_grace_ms: 60_000,
            app_start_timeout_ms: 10_000,
            app_stop_grace_ms: 2_000,
            display_rate_limit_ms: 50,
            audio_ring_seconds: 10,
            audio_bytes_per_second: 16_000,
            stream_keepalive_interval_ms: 15_000,
            stream_ack_timeout_ms: 5_000,
            stream_missed_ack_threshold: 3,
            stream_direct_stop_grace_ms: 15_000,
            stream_managed_grace_ms: 30_000,
            stream_max_outputs_per_stream: 10,
            stream_max_outputs_per_app: 10,
            photo_request_timeout_ms: 30_000,
            protocol_error_threshold: 3,
            protocol_error_window_ms: 60_000,
        }
    }
}
