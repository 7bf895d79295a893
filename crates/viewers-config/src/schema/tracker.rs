use serde::{Deserialize, Serialize};

/// Presence tracker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// How many recent replay ids are remembered for duplicate suppression (0 disables).
    pub dedupe_window: usize,
    /// Upper bound on how long teardown waits for the Leave publish on unload.
    pub unload_timeout_ms: u64,
    /// Capacity of the inbound event queue per subscription.
    pub event_buffer: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            dedupe_window: 256,
            unload_timeout_ms: 500,
            event_buffer: 256,
        }
    }
}
