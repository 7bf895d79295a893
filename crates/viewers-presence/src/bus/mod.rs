//! Broadcast bus contract and its implementations.
//!
//! The bus is an at-most-once publish/subscribe transport with no ordering
//! guarantee across publishers and a small per-topic replay window. Every
//! accepted message gets a monotonically increasing replay id, unique within
//! the topic's current epoch. A bus that loses a topic's history (a relay
//! restart, an idle topic being dropped) starts a new epoch and may reuse ids.

mod memory;
pub mod relay;
pub mod wire;

pub use memory::MemoryBus;
pub use relay::{RelayBus, RelayConfig};

use async_trait::async_trait;
use tokio::sync::mpsc;
use viewers_common::{PublishError, SubscribeError};

/// Where a new subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayFrom {
    /// Only messages published after the subscription is established (`-1`).
    #[default]
    Tip,
    /// Everything still held in the replay window (`-2`).
    Retained,
    /// Messages with a replay id strictly greater than the given one.
    After(u64),
}

impl ReplayFrom {
    pub fn as_i64(self) -> i64 {
        match self {
            ReplayFrom::Tip => -1,
            ReplayFrom::Retained => -2,
            ReplayFrom::After(id) => i64::try_from(id).unwrap_or(i64::MAX),
        }
    }
}

impl From<i64> for ReplayFrom {
    fn from(value: i64) -> Self {
        match value {
            -2 => ReplayFrom::Retained,
            v if v >= 0 => ReplayFrom::After(v as u64),
            _ => ReplayFrom::Tip,
        }
    }
}

/// One message handed to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Topic epoch the replay id belongs to.
    pub epoch: u64,
    /// Bus-assigned id; `None` if the transport does not provide one.
    pub replay_id: Option<u64>,
    pub payload: serde_json::Value,
}

/// Receiving side of a subscription. Full sinks lose messages.
pub type DeliverySink = mpsc::Sender<Delivery>;

/// Handle for an active subscription, consumed by [`Bus::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    topic: String,
}

impl Subscription {
    pub fn new(id: u64, topic: impl Into<String>) -> Self {
        Self {
            id,
            topic: topic.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Bus-side acceptance of a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack {
    pub replay_id: Option<u64>,
}

#[async_trait]
pub trait Bus: Send + Sync {
    /// Start delivering `topic` messages into `sink`.
    async fn subscribe(
        &self,
        topic: &str,
        replay_from: ReplayFrom,
        sink: DeliverySink,
    ) -> Result<Subscription, SubscribeError>;

    /// Hand one message to the bus. `Ok` means accepted, not delivered.
    async fn publish(&self, topic: &str, message: serde_json::Value)
        -> Result<Ack, PublishError>;

    /// Stop a subscription. Best-effort; never fails.
    async fn unsubscribe(&self, subscription: Subscription);
}
