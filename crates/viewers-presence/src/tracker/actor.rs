//! Background task owning a tracker's state and subscription.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use viewers_common::{RecordId, SubscribeError, ViewerId};

use super::state::{Reaction, TrackerState, ViewerSnapshot};
use super::TrackerOptions;
use crate::bus::{Bus, Delivery, Subscription};
use crate::publisher::PresencePublisher;

pub(crate) enum TrackerCommand {
    Activate {
        record_id: RecordId,
        reply: oneshot::Sender<Result<bool, SubscribeError>>,
    },
    Deactivate {
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        timeout: Duration,
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct TrackerActor {
    bus: Arc<dyn Bus>,
    publisher: PresencePublisher,
    options: TrackerOptions,
    state: TrackerState,
    subscription: Option<Subscription>,
    events: Option<mpsc::Receiver<Delivery>>,
    snapshot_tx: watch::Sender<ViewerSnapshot>,
    /// Leave + unsubscribe tasks of earlier deactivations still running.
    teardown: Vec<JoinHandle<()>>,
}

impl TrackerActor {
    pub(crate) fn new(
        bus: Arc<dyn Bus>,
        self_id: ViewerId,
        options: TrackerOptions,
        snapshot_tx: watch::Sender<ViewerSnapshot>,
    ) -> Self {
        let publisher = PresencePublisher::new(Arc::clone(&bus), options.topic.clone(), self_id.clone());
        let state = TrackerState::new(self_id, options.dedupe_window);
        Self {
            bus,
            publisher,
            options,
            state,
            subscription: None,
            events: None,
            snapshot_tx,
            teardown: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self, mut command_rx: mpsc::Receiver<TrackerCommand>) {
        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(TrackerCommand::Activate { record_id, reply }) => {
                        let result = self.activate(record_id).await;
                        let _ = reply.send(result);
                    }
                    Some(TrackerCommand::Deactivate { reply }) => {
                        let _ = reply.send(self.deactivate());
                    }
                    Some(TrackerCommand::Shutdown { timeout, reply }) => {
                        self.deactivate();
                        self.wait_teardown(timeout).await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        // Every handle is gone.
                        self.deactivate();
                        break;
                    }
                },
                delivery = next_delivery(&mut self.events) => match delivery {
                    Some(delivery) => self.on_delivery(delivery),
                    None => self.subscription_lost(),
                },
            }
        }
        debug!(self_id = %self.publisher.self_id(), "Presence tracker stopped");
    }

    async fn activate(&mut self, record_id: RecordId) -> Result<bool, SubscribeError> {
        if self.state.is_viewing(&record_id) {
            debug!(record_id = %record_id, "Already viewing record");
            return Ok(false);
        }
        self.deactivate();

        // The subscription must exist before Entered goes out.
        let (sink, events) = mpsc::channel(self.options.event_buffer);
        let subscription = match self
            .bus
            .subscribe(&self.options.topic, self.options.replay_from, sink)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(record_id = %record_id, error = %e, "Presence subscribe failed");
                return Err(e);
            }
        };
        self.subscription = Some(subscription);
        self.events = Some(events);

        let entered = self.state.begin(record_id.clone());
        self.publish_snapshot();
        info!(record_id = %record_id, "Viewing record");
        self.publisher.spawn_send(entered);
        Ok(true)
    }

    fn deactivate(&mut self) -> bool {
        let Some(left) = self.state.end() else {
            return false;
        };
        self.events = None;
        let subscription = self.subscription.take();
        self.publish_snapshot();
        info!(record_id = %left.record_id, "Stopped viewing record");

        let publisher = self.publisher.clone();
        let bus = Arc::clone(&self.bus);
        self.teardown.retain(|handle| !handle.is_finished());
        self.teardown.push(tokio::spawn(async move {
            if let Err(e) = publisher.send(&left).await {
                warn!(record_id = %left.record_id, error = %e, "Leave not published");
            }
            // Unsubscribe regardless of the Leave outcome.
            if let Some(subscription) = subscription {
                bus.unsubscribe(subscription).await;
            }
        }));
        true
    }

    /// The bus dropped our subscription. Go inactive without a Leave; the
    /// next location signal for the record subscribes again.
    fn subscription_lost(&mut self) {
        self.events = None;
        self.subscription = None;
        if let Some(left) = self.state.end() {
            warn!(record_id = %left.record_id, "Presence subscription closed by the bus");
            self.publish_snapshot();
        }
    }

    async fn wait_teardown(&mut self, timeout: Duration) {
        if self.teardown.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.teardown);
        if tokio::time::timeout(timeout, join_all(pending)).await.is_err() {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Leave still in flight at shutdown"
            );
        }
    }

    fn on_delivery(&mut self, delivery: Delivery) {
        match self.state.apply_delivery(&delivery) {
            Reaction::Dropped(reason) => {
                debug!(?reason, replay_id = ?delivery.replay_id, "Presence event ignored");
            }
            Reaction::Counted { viewer_count } => {
                debug!(viewer_count, replay_id = ?delivery.replay_id, "Viewer count updated");
                self.publish_snapshot();
            }
            Reaction::Reply {
                viewer_count,
                reply,
            } => {
                debug!(
                    viewer_count,
                    response_to = ?reply.response_to,
                    "Viewer entered, replying"
                );
                self.publish_snapshot();
                self.publisher.spawn_send(reply);
            }
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = self.state.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

/// Next delivery, or pending forever while unsubscribed.
async fn next_delivery(events: &mut Option<mpsc::Receiver<Delivery>>) -> Option<Delivery> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
