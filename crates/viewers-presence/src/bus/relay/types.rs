//! Configuration and command types for the relay client.

use std::time::Duration;

use tokio::sync::oneshot;
use viewers_common::{PublishError, SubscribeError};
use viewers_config::BusConfig;

use crate::bus::{Ack, DeliverySink, ReplayFrom};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to a relay.
#[derive(Clone)]
pub struct RelayConfig {
    /// WebSocket URL, e.g. `ws://127.0.0.1:8787/ws`.
    pub url: String,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// How long publish/subscribe wait for the relay's reply.
    pub request_timeout: Duration,
    /// Heartbeat interval in seconds (default: 25).
    pub heartbeat_interval_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("url", &self.redacted_url())
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout", &self.request_timeout)
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("max_reconnect_delay_secs", &self.max_reconnect_delay_secs)
            .finish()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from(&BusConfig::default())
    }
}

impl From<&BusConfig> for RelayConfig {
    fn from(bus: &BusConfig) -> Self {
        Self {
            url: bus.url.clone(),
            connect_timeout_secs: bus.connect_timeout_secs,
            request_timeout: Duration::from_millis(bus.request_timeout_ms),
            heartbeat_interval_secs: bus.heartbeat_interval_secs,
            reconnect_delay_secs: bus.reconnect_delay_secs,
            max_reconnect_delay_secs: bus.max_reconnect_delay_secs,
        }
    }
}

impl RelayConfig {
    /// URL without its query string, safe to log.
    pub(crate) fn redacted_url(&self) -> &str {
        self.url.split('?').next().unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands sent from `RelayBus` handles to the connection task.
#[derive(Debug)]
pub(crate) enum RelayCommand {
    Subscribe {
        topic: String,
        replay_from: ReplayFrom,
        id: u64,
        sink: DeliverySink,
        reply: oneshot::Sender<Result<(), SubscribeError>>,
    },
    Unsubscribe {
        topic: String,
        id: u64,
    },
    Publish {
        topic: String,
        payload: serde_json::Value,
        reply: oneshot::Sender<Result<Ack, PublishError>>,
    },
    Disconnect,
}
