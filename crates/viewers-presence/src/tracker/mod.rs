//! Presence tracker: one per client, active for at most one record.
//!
//! [`PresenceTracker`] is a cloneable handle to a background task that owns
//! the viewer-count state, the bus subscription and the event queue. Local
//! commands and bus deliveries are handled on that one task, so state
//! transitions never race. Publishes run as detached tasks and only log
//! their outcome.

mod actor;
mod state;


pub use state::ViewerSnapshot;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::warn;
use viewers_common::{PresenceError, RecordId, Result, ViewerId};
use viewers_config::ViewersConfig;

use crate::bus::{Bus, ReplayFrom};
use actor::{TrackerActor, TrackerCommand};

/// Tuning for a tracker instance.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Bus topic carrying presence events.
    pub topic: String,
    pub replay_from: ReplayFrom,
    /// Recent replay ids remembered for duplicate suppression (0 disables).
    pub dedupe_window: usize,
    /// Capacity of the inbound delivery queue.
    pub event_buffer: usize,
    /// Default bound for unload teardown.
    pub unload_timeout: Duration,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self::from(&ViewersConfig::default())
    }
}

impl From<&ViewersConfig> for TrackerOptions {
    fn from(config: &ViewersConfig) -> Self {
        Self {
            topic: config.bus.topic.clone(),
            replay_from: ReplayFrom::from(config.bus.replay_from),
            dedupe_window: config.tracker.dedupe_window,
            event_buffer: config.tracker.event_buffer.max(1),
            unload_timeout: Duration::from_millis(config.tracker.unload_timeout_ms),
        }
    }
}

/// Handle to a running presence tracker.
///
/// Cloning is cheap. When the last handle is dropped the tracker tears
/// down on its own: it sends `Left` for the current record and
/// unsubscribes, without anyone waiting for it.
#[derive(Clone)]
pub struct PresenceTracker {
    command_tx: mpsc::Sender<TrackerCommand>,
    snapshot_rx: watch::Receiver<ViewerSnapshot>,
    self_id: ViewerId,
    unload_timeout: Duration,
}

impl PresenceTracker {
    /// Start a tracker task for `self_id` on `bus`.
    pub fn spawn(bus: Arc<dyn Bus>, self_id: ViewerId, options: TrackerOptions) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (snapshot_tx, snapshot_rx) = watch::channel(ViewerSnapshot::default());
        let unload_timeout = options.unload_timeout;

        let actor = TrackerActor::new(bus, self_id.clone(), options, snapshot_tx);
        tokio::spawn(actor.run(command_rx));

        Self {
            command_tx,
            snapshot_rx,
            self_id,
            unload_timeout,
        }
    }

    /// Start viewing `record_id`, leaving any other record first.
    ///
    /// Returns `Ok(false)` if `record_id` is already being viewed; nothing is
    /// re-announced in that case. A subscribe failure leaves the tracker
    /// inactive and is returned so the caller can retry later.
    pub async fn activate(&self, record_id: RecordId) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.request(TrackerCommand::Activate { record_id, reply }, response)
            .await?
            .map_err(PresenceError::from)
    }

    /// Stop viewing the current record. Returns `Ok(false)` if inactive.
    ///
    /// The tracker is inactive when this returns; `Left` and the
    /// unsubscribe finish in the background.
    pub async fn deactivate(&self) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.request(TrackerCommand::Deactivate { reply }, response)
            .await
    }

    /// Apply a location signal: view `Some(record)`, or nothing on `None`.
    pub async fn follow(&self, location: Option<RecordId>) -> Result<bool> {
        match location {
            Some(record_id) => self.activate(record_id).await,
            None => self.deactivate().await,
        }
    }

    /// Leave the current record and stop the tracker, waiting at most
    /// `timeout` for `Left` and the unsubscribe to complete.
    ///
    /// Calls on any handle fail with [`PresenceError::TrackerStopped`]
    /// afterwards. Shutting down a stopped tracker is a no-op.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        let (reply, response) = oneshot::channel();
        if self
            .command_tx
            .send(TrackerCommand::Shutdown { timeout, reply })
            .await
            .is_err()
        {
            return Ok(());
        }
        // The actor bounds its own wait; this only guards a wedged task.
        match tokio::time::timeout(timeout + Duration::from_millis(50), response).await {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Tracker shutdown timed out");
                Ok(())
            }
        }
    }

    /// Current state.
    pub fn snapshot(&self) -> ViewerSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Stream of state changes.
    pub fn watch(&self) -> watch::Receiver<ViewerSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn viewer_count(&self) -> u32 {
        self.snapshot_rx.borrow().viewer_count
    }

    pub fn self_id(&self) -> &ViewerId {
        &self.self_id
    }

    /// Teardown bound configured for unload.
    pub fn unload_timeout(&self) -> Duration {
        self.unload_timeout
    }

    async fn request<T>(
        &self,
        command: TrackerCommand,
        response: oneshot::Receiver<T>,
    ) -> Result<T> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| PresenceError::TrackerStopped)?;
        response.await.map_err(|_| PresenceError::TrackerStopped)
    }
}
