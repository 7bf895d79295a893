//! WebSocket client for the `viewers-relay` bus server.
//!
//! A background task owns the socket and handles heartbeats, request/ack
//! correlation, and auto-reconnect with backoff. After a reconnect every
//! live topic is re-subscribed from the last replay id it saw, so short
//! outages do not lose events still inside the relay's replay window.

mod client;
mod connection;
mod handler;
mod types;

pub use client::RelayBus;
pub use types::RelayConfig;
