//! Topic store: per-topic subscribers and the bounded replay window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use viewers_presence::bus::wire::{ServerFrame, MAX_PAYLOAD_BYTES};
use viewers_presence::ReplayFrom;

/// Outbound queue of encoded frames for one connection.
pub type Outbox = mpsc::Sender<String>;

/// One broadcast topic.
///
/// Replay ids restart at 1 whenever a topic is created, so each creation
/// gets a fresh random epoch that clients use to tell the numberings apart.
pub struct Topic {
    subscribers: HashMap<u64, Outbox>,
    retained: VecDeque<(u64, serde_json::Value)>,
    last_replay_id: u64,
    epoch: u64,
    last_activity: Instant,
}

impl Topic {
    fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            retained: VecDeque::new(),
            last_replay_id: 0,
            epoch: Uuid::new_v4().as_u64_pair().0,
            last_activity: Instant::now(),
        }
    }
}

/// Thread-safe topic store.
#[derive(Clone)]
pub struct TopicStore {
    topics: Arc<RwLock<HashMap<String, Topic>>>,
    replay_window: usize,
}

impl TopicStore {
    pub fn new(replay_window: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            replay_window,
        }
    }

    /// Register `conn` on `topic`. The `subscribed` confirmation and any
    /// replayed events are queued on `outbox` before live events can be.
    ///
    /// A resume point from another epoch (`resume_epoch`) means the client
    /// last saw an earlier incarnation of the topic; everything retained is
    /// new to it.
    pub async fn subscribe(
        &self,
        conn: u64,
        topic: &str,
        msg_ref: String,
        replay_from: ReplayFrom,
        resume_epoch: Option<u64>,
        outbox: Outbox,
    ) {
        let mut map = self.topics.write().await;
        let entry = map.entry(topic.to_string()).or_insert_with(Topic::new);
        entry.last_activity = Instant::now();

        let replay_from = match (replay_from, resume_epoch) {
            (ReplayFrom::After(after), Some(epoch)) if epoch != entry.epoch => {
                tracing::debug!(
                    conn,
                    topic = %topic,
                    after,
                    "Resume point from another epoch, replaying retained"
                );
                ReplayFrom::Retained
            }
            _ => replay_from,
        };

        enqueue(
            &outbox,
            &ServerFrame::Subscribed {
                msg_ref,
                topic: topic.to_string(),
                epoch: entry.epoch,
            },
        );
        let backlog = entry
            .retained
            .iter()
            .filter(|(replay_id, _)| match replay_from {
                ReplayFrom::Tip => false,
                ReplayFrom::Retained => true,
                ReplayFrom::After(after) => *replay_id > after,
            });
        for (replay_id, payload) in backlog {
            enqueue(
                &outbox,
                &ServerFrame::Event {
                    topic: topic.to_string(),
                    replay_id: *replay_id,
                    payload: payload.clone(),
                },
            );
        }
        entry.subscribers.insert(conn, outbox);
    }

    /// Accept a message, retain it and fan it out. Returns its replay id,
    /// or the reason it was refused.
    pub async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<u64, String> {
        validate_publish(topic, &payload)?;

        let mut map = self.topics.write().await;
        let entry = map.entry(topic.to_string()).or_insert_with(Topic::new);
        entry.last_activity = Instant::now();
        entry.last_replay_id += 1;
        let replay_id = entry.last_replay_id;

        if self.replay_window > 0 {
            entry.retained.push_back((replay_id, payload.clone()));
            while entry.retained.len() > self.replay_window {
                entry.retained.pop_front();
            }
        }

        let frame = ServerFrame::Event {
            topic: topic.to_string(),
            replay_id,
            payload,
        };
        let Ok(json) = serde_json::to_string(&frame) else {
            return Err("payload could not be encoded".into());
        };
        entry.subscribers.retain(|conn, outbox| match outbox.try_send(json.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(conn = *conn, replay_id, "Client outbox full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        Ok(replay_id)
    }

    pub async fn unsubscribe(&self, conn: u64, topic: &str) {
        let mut map = self.topics.write().await;
        if let Some(entry) = map.get_mut(topic) {
            entry.subscribers.remove(&conn);
            entry.last_activity = Instant::now();
        }
    }

    /// Drop `conn` from every topic.
    pub async fn remove_connection(&self, conn: u64) {
        let mut map = self.topics.write().await;
        for entry in map.values_mut() {
            if entry.subscribers.remove(&conn).is_some() {
                entry.last_activity = Instant::now();
            }
        }
    }

    /// Forget topics with no subscribers and no activity for `max_idle`.
    pub async fn reap_idle(&self, max_idle: Duration) {
        let mut map = self.topics.write().await;
        let now = Instant::now();
        map.retain(|name, entry| {
            let idle = entry.subscribers.is_empty()
                && now.duration_since(entry.last_activity) > max_idle;
            if idle {
                tracing::info!(topic = %name, "Reaping idle topic");
            }
            !idle
        });
    }

    /// Number of known topics.
    pub async fn count(&self) -> usize {
        self.topics.read().await.len()
    }

    #[cfg(test)]
    pub async fn epoch(&self, topic: &str) -> Option<u64> {
        self.topics.read().await.get(topic).map(|t| t.epoch)
    }

    #[cfg(test)]
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }
}

/// Reject publishes the relay will not carry.
pub fn validate_publish(topic: &str, payload: &serde_json::Value) -> Result<(), String> {
    if topic.trim().is_empty() {
        return Err("topic must not be empty".into());
    }
    if !payload.is_object() {
        return Err("payload must be a JSON object".into());
    }
    let size = serde_json::to_vec(payload).map(|b| b.len()).unwrap_or(usize::MAX);
    if size > MAX_PAYLOAD_BYTES {
        return Err(format!(
            "payload too large ({size} bytes, limit {MAX_PAYLOAD_BYTES})"
        ));
    }
    Ok(())
}

/// Queue a frame without waiting. Full or closed outboxes lose it.
pub fn enqueue(outbox: &Outbox, frame: &ServerFrame) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            if outbox.try_send(json).is_err() {
                tracing::debug!("Client outbox unavailable, frame dropped");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to encode frame"),
    }
}
