//! One-call setup of a relay-backed tracker from configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use viewers_common::{RecordId, Result, ViewerId};
use viewers_config::ViewersConfig;

use crate::bus::{RelayBus, RelayConfig};
use crate::lifecycle::LocationDriver;
use crate::tracker::{PresenceTracker, TrackerOptions};

/// A relay connection plus the tracker running on it.
pub struct PresenceClient {
    bus: RelayBus,
    tracker: PresenceTracker,
}

impl PresenceClient {
    /// Validate `config`, connect to the relay and start a tracker for `self_id`.
    ///
    /// Waits up to the configured connect timeout for the first connection.
    /// If the relay is still unreachable the client starts anyway; activations
    /// fail with `NotConnected` until the background reconnect succeeds.
    pub async fn start(config: &ViewersConfig, self_id: ViewerId) -> Result<Self> {
        viewers_config::validation::validate(config)?;

        let bus = RelayBus::connect(RelayConfig::from(&config.bus));
        let connect_timeout = Duration::from_secs(config.bus.connect_timeout_secs);
        if bus.wait_connected(connect_timeout).await {
            info!(self_id = %self_id, topic = %config.bus.topic, "Presence client started");
        } else {
            warn!(
                timeout_secs = config.bus.connect_timeout_secs,
                "Relay not reachable yet, continuing in the background"
            );
        }

        let tracker = PresenceTracker::spawn(
            Arc::new(bus.clone()),
            self_id,
            TrackerOptions::from(config),
        );
        Ok(Self { bus, tracker })
    }

    pub fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }

    pub fn bus(&self) -> &RelayBus {
        &self.bus
    }

    /// Follow location signals until the source closes or the returned
    /// driver is unloaded.
    pub fn drive(&self, signals: mpsc::Receiver<Option<RecordId>>) -> LocationDriver {
        LocationDriver::spawn(self.tracker.clone(), signals, CancellationToken::new())
    }

    /// Leave the current record, stop the tracker and close the connection.
    pub async fn close(self) -> Result<()> {
        self.tracker.shutdown(self.tracker.unload_timeout()).await?;
        self.bus.disconnect().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viewers_common::{PresenceError, SubscribeError};

    #[tokio::test]
    async fn rejects_invalid_config() {
        let mut config = ViewersConfig::default();
        config.bus.url = "http://127.0.0.1:8787".into();

        let err = PresenceClient::start(&config, "A".into())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PresenceError::Config(_)));
    }

    #[tokio::test]
    async fn starts_without_relay_and_reports_not_connected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = ViewersConfig::default();
        config.bus.url = format!("ws://{addr}/ws");
        config.bus.connect_timeout_secs = 1;

        let client = PresenceClient::start(&config, "A".into()).await.unwrap();
        assert!(!client.bus().is_connected());

        let err = client.tracker().activate("R1".into()).await.unwrap_err();
        assert!(matches!(
            err,
            PresenceError::Subscribe(SubscribeError::NotConnected)
        ));
        client.close().await.unwrap();
    }
}
