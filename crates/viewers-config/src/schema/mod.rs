//! Configuration schema types.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod bus;
mod system;
mod tracker;

pub use bus::*;
pub use system::*;
pub use tracker::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for a viewing client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewersConfig {
    pub bus: BusConfig,
    pub tracker: TrackerConfig,
    pub logging: LoggingConfig,
}
