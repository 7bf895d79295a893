//! Outbound presence announcements.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use viewers_common::{PublishError, RecordId, ViewerId};

use crate::bus::{Ack, Bus};
use crate::protocol::{PresenceEvent, ViewingState};

/// Stamps outgoing events with this client's identity and hands them to the bus.
#[derive(Clone)]
pub struct PresencePublisher {
    bus: Arc<dyn Bus>,
    topic: String,
    self_id: ViewerId,
}

impl PresencePublisher {
    pub fn new(bus: Arc<dyn Bus>, topic: impl Into<String>, self_id: ViewerId) -> Self {
        Self {
            bus,
            topic: topic.into(),
            self_id,
        }
    }

    pub fn self_id(&self) -> &ViewerId {
        &self.self_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Build and publish one event. `response_to` only matters for `Responded`.
    pub async fn publish(
        &self,
        record_id: RecordId,
        state: ViewingState,
        response_to: Option<ViewerId>,
    ) -> Result<Ack, PublishError> {
        let event = PresenceEvent {
            record_id,
            viewing_state: state,
            response_to: match state {
                ViewingState::Responded => response_to,
                _ => None,
            },
            created_by: self.self_id.clone(),
        };
        self.send(&event).await
    }

    /// Publish a pre-built event as-is.
    pub async fn send(&self, event: &PresenceEvent) -> Result<Ack, PublishError> {
        let payload =
            serde_json::to_value(event).map_err(|e| PublishError::Encode(e.to_string()))?;
        self.bus.publish(&self.topic, payload).await
    }

    /// Publish in the background. The outcome is only logged; nothing waits on it.
    pub fn spawn_send(&self, event: PresenceEvent) -> JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            match publisher.send(&event).await {
                Ok(ack) => debug!(
                    record_id = %event.record_id,
                    state = ?event.viewing_state,
                    replay_id = ?ack.replay_id,
                    "Presence published"
                ),
                Err(e) if event.viewing_state == ViewingState::Responded => info!(
                    record_id = %event.record_id,
                    error = %e,
                    "Presence reply not published"
                ),
                Err(e) => warn!(
                    record_id = %event.record_id,
                    state = ?event.viewing_state,
                    error = %e,
                    "Presence announcement not published"
                ),
            }
        })
    }
}
