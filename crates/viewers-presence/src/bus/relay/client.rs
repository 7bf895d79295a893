//! Public handle for the relay-backed bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use viewers_common::{PublishError, SubscribeError};

use super::connection::connection_loop;
use super::types::{RelayCommand, RelayConfig};
use crate::bus::{Ack, Bus, DeliverySink, ReplayFrom, Subscription};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// [`Bus`] implementation talking to a `viewers-relay` server.
///
/// Cheap to clone; every clone drives the same background connection,
/// which shuts down once all clones are dropped or [`disconnect`] is called.
///
/// [`disconnect`]: RelayBus::disconnect
#[derive(Clone)]
pub struct RelayBus {
    command_tx: mpsc::Sender<RelayCommand>,
    connected: watch::Receiver<bool>,
    next_subscription: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl RelayBus {
    /// Create a new bus handle and start the background connection.
    pub fn connect(config: RelayConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (connected_tx, connected_rx) = watch::channel(false);
        let request_timeout = config.request_timeout;

        tokio::spawn(connection_loop(config, connected_tx, command_rx));

        Self {
            command_tx,
            connected: connected_rx,
            next_subscription: Arc::new(AtomicU64::new(1)),
            request_timeout,
        }
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the connection is up. Returns false on timeout or if the
    /// connection task has stopped.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.connected.clone();
        let up = matches!(
            tokio::time::timeout(timeout, connected.wait_for(|up| *up)).await,
            Ok(Ok(_))
        );
        up
    }

    /// Close the connection and stop reconnecting.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(RelayCommand::Disconnect).await;
    }
}

#[async_trait]
impl Bus for RelayBus {
    async fn subscribe(
        &self,
        topic: &str,
        replay_from: ReplayFrom,
        sink: DeliverySink,
    ) -> Result<Subscription, SubscribeError> {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(RelayCommand::Subscribe {
                topic: topic.to_string(),
                replay_from,
                id,
                sink,
                reply,
            })
            .await
            .map_err(|_| SubscribeError::NotConnected)?;

        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(Ok(()))) => Ok(Subscription::new(id, topic)),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(SubscribeError::NotConnected),
            Err(_) => {
                // Drop the half-registered sink so it does not linger.
                let _ = self
                    .command_tx
                    .send(RelayCommand::Unsubscribe {
                        topic: topic.to_string(),
                        id,
                    })
                    .await;
                Err(SubscribeError::Timeout(self.request_timeout))
            }
        }
    }

    async fn publish(
        &self,
        topic: &str,
        message: serde_json::Value,
    ) -> Result<Ack, PublishError> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(RelayCommand::Publish {
                topic: topic.to_string(),
                payload: message,
                reply,
            })
            .await
            .map_err(|_| PublishError::NotConnected)?;

        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PublishError::NotConnected),
            Err(_) => Err(PublishError::Timeout(self.request_timeout)),
        }
    }

    async fn unsubscribe(&self, subscription: Subscription) {
        let _ = self
            .command_tx
            .send(RelayCommand::Unsubscribe {
                topic: subscription.topic().to_string(),
                id: subscription.id(),
            })
            .await;
    }
}
