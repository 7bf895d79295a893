//! Viewer presence configuration.
//!
//! Provides TOML-based configuration for the presence bus connection and
//! tracker tuning. All config sections use sensible defaults so partial
//! configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use viewers_config::{load_config, config_to_json};
//!
//! let config = load_config().expect("failed to load config");
//! let json = config_to_json(&config);
//! println!("{json}");
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    BusConfig, LogLevel, LoggingConfig, TrackerConfig, ViewersConfig, CONFIG_SCHEMA_VERSION,
};
pub use toml_loader::{create_default_config, default_config_path, load_default, load_from_path};

use viewers_common::ConfigError;

/// Load config from the platform default path and validate it.
///
/// Creates a default `config.toml` in the OS config directory if none exists.
pub fn load_config() -> Result<ViewersConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &ViewersConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
