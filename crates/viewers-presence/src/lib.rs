//! Record viewer presence over a fire-and-forget broadcast bus.
//!
//! Every client runs one [`PresenceTracker`]. Opening a record subscribes to
//! the bus and announces `Entered`; peers already viewing the record answer
//! with `Responded`; closing it announces `Left`. Each tracker keeps its own
//! estimate of how many *other* clients are viewing the same record. There
//! is no shared counter anywhere, so the count is eventually consistent and
//! may drift briefly after bursts of joins and leaves.

pub mod bus;
pub mod client;
pub mod lifecycle;
pub mod protocol;
pub mod publisher;
pub mod tracker;

pub use bus::{Ack, Bus, Delivery, MemoryBus, RelayBus, RelayConfig, ReplayFrom, Subscription};
pub use client::PresenceClient;
pub use lifecycle::LocationDriver;
pub use protocol::{PresenceEvent, ViewingState};
pub use publisher::PresencePublisher;
pub use tracker::{PresenceTracker, TrackerOptions, ViewerSnapshot};

pub use viewers_common::{PresenceError, PublishError, RecordId, SubscribeError, ViewerId};
