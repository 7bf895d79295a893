//! In-process bus with the same delivery semantics as the relay.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;
use tracing::debug;
use viewers_common::{PublishError, SubscribeError};

use super::{Ack, Bus, Delivery, DeliverySink, ReplayFrom, Subscription};

/// Default number of messages retained per topic for replay.
pub const DEFAULT_REPLAY_WINDOW: usize = 100;

#[derive(Default)]
struct Topic {
    subscribers: HashMap<u64, DeliverySink>,
    retained: VecDeque<(u64, serde_json::Value)>,
    last_replay_id: u64,
    epoch: u64,
}

struct Inner {
    topics: HashMap<String, Topic>,
    next_subscription: u64,
    replay_window: usize,
    publish_failure: Option<String>,
    subscribe_failure: Option<String>,
    publish_delay: Option<Duration>,
}

/// Shared in-memory bus. Clones refer to the same bus.
///
/// Publishers also receive their own messages, matching a real broadcast
/// topic. Fan-out uses `try_send`, so a subscriber whose sink is full
/// silently misses the message.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_replay_window(DEFAULT_REPLAY_WINDOW)
    }

    pub fn with_replay_window(replay_window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                topics: HashMap::new(),
                next_subscription: 1,
                replay_window,
                publish_failure: None,
                subscribe_failure: None,
                publish_delay: None,
            })),
        }
    }

    /// Make every publish fail with `Rejected(reason)` until cleared with `None`.
    pub async fn fail_publishes(&self, reason: Option<&str>) {
        self.inner.lock().await.publish_failure = reason.map(str::to_string);
    }

    /// Make every subscribe fail with `Rejected(reason)` until cleared with `None`.
    pub async fn fail_subscribes(&self, reason: Option<&str>) {
        self.inner.lock().await.subscribe_failure = reason.map(str::to_string);
    }

    /// Hold every publish for `delay` before it is accepted, until cleared
    /// with `None`. A publish already waiting keeps its delay.
    pub async fn delay_publishes(&self, delay: Option<Duration>) {
        self.inner.lock().await.publish_delay = delay;
    }

    /// Forget a topic's history as a restarted relay would: the replay
    /// window is emptied, ids start again at 1 and a new epoch begins.
    /// Subscribers stay attached.
    pub async fn restart_topic(&self, topic: &str) {
        let mut inner = self.inner.lock().await;
        let entry = inner.topics.entry(topic.to_string()).or_default();
        entry.retained.clear();
        entry.last_replay_id = 0;
        entry.epoch += 1;
    }

    /// Drop every subscriber of `topic`, closing their sinks.
    pub async fn close_subscriptions(&self, topic: &str) {
        if let Some(entry) = self.inner.lock().await.topics.get_mut(topic) {
            entry.subscribers.clear();
        }
    }

    /// Deliver a retained message again to every current subscriber,
    /// simulating a transport-level duplicate. Returns false if it is no
    /// longer retained.
    pub async fn redeliver(&self, topic: &str, replay_id: u64) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(topic) = inner.topics.get_mut(topic) else {
            return false;
        };
        let Some(payload) = topic
            .retained
            .iter()
            .find(|(id, _)| *id == replay_id)
            .map(|(_, payload)| payload.clone())
        else {
            return false;
        };
        fan_out(topic, replay_id, &payload);
        true
    }

    /// Messages currently held in the replay window, oldest first.
    pub async fn retained(&self, topic: &str) -> Vec<serde_json::Value> {
        self.inner
            .lock()
            .await
            .topics
            .get(topic)
            .map(|t| t.retained.iter().map(|(_, p)| p.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .await
            .topics
            .get(topic)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

fn fan_out(topic: &mut Topic, replay_id: u64, payload: &serde_json::Value) {
    topic.subscribers.retain(|id, sink| {
        let delivery = Delivery {
            epoch: topic.epoch,
            replay_id: Some(replay_id),
            payload: payload.clone(),
        };
        match sink.try_send(delivery) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(subscription = *id, replay_id, "Subscriber full, message dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    });
}

#[async_trait]
impl Bus for MemoryBus {
    async fn subscribe(
        &self,
        topic: &str,
        replay_from: ReplayFrom,
        sink: DeliverySink,
    ) -> Result<Subscription, SubscribeError> {
        let mut inner = self.inner.lock().await;
        if let Some(reason) = &inner.subscribe_failure {
            return Err(SubscribeError::Rejected(reason.clone()));
        }

        let id = inner.next_subscription;
        inner.next_subscription += 1;

        let entry = inner.topics.entry(topic.to_string()).or_default();
        let backlog = entry.retained.iter().filter(|(replay_id, _)| match replay_from {
            ReplayFrom::Tip => false,
            ReplayFrom::Retained => true,
            ReplayFrom::After(after) => *replay_id > after,
        });
        for (replay_id, payload) in backlog {
            let _ = sink.try_send(Delivery {
                epoch: entry.epoch,
                replay_id: Some(*replay_id),
                payload: payload.clone(),
            });
        }
        entry.subscribers.insert(id, sink);

        Ok(Subscription::new(id, topic))
    }

    async fn publish(
        &self,
        topic: &str,
        message: serde_json::Value,
    ) -> Result<Ack, PublishError> {
        let delay = self.inner.lock().await.publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        if let Some(reason) = &inner.publish_failure {
            return Err(PublishError::Rejected(reason.clone()));
        }
        if !message.is_object() {
            return Err(PublishError::Rejected(
                "payload must be a JSON object".into(),
            ));
        }

        let window = inner.replay_window;
        let entry = inner.topics.entry(topic.to_string()).or_default();
        entry.last_replay_id += 1;
        let replay_id = entry.last_replay_id;

        if window > 0 {
            entry.retained.push_back((replay_id, message.clone()));
            while entry.retained.len() > window {
                entry.retained.pop_front();
            }
        }
        fan_out(entry, replay_id, &message);

        Ok(Ack {
            replay_id: Some(replay_id),
        })
    }

    async fn unsubscribe(&self, subscription: Subscription) {
        let mut inner = self.inner.lock().await;
        if let Some(topic) = inner.topics.get_mut(subscription.topic()) {
            topic.subscribers.remove(&subscription.id());
        }
    }
}
