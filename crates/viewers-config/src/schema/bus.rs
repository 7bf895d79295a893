//! Broadcast bus connection settings.

use serde::{Deserialize, Serialize};

/// Where presence events are published and how the connection behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// WebSocket URL of the relay (`ws://` or `wss://`).
    pub url: String,
    /// Topic that carries presence events.
    pub topic: String,
    /// Replay position for new subscriptions: -1 = new events only,
    /// -2 = everything still retained, N >= 0 = after replay id N.
    pub replay_from: i64,
    /// Connect timeout in seconds (valid range: 1-120).
    pub connect_timeout_secs: u64,
    /// Ack timeout for publish/subscribe requests in milliseconds (valid range: 50-60000).
    pub request_timeout_ms: u64,
    /// Heartbeat interval in seconds (valid range: 5-300).
    pub heartbeat_interval_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8787/ws".into(),
            topic: "record-viewing".into(),
            replay_from: -1,
            connect_timeout_secs: 15,
            request_timeout_ms: 5000,
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }
}
