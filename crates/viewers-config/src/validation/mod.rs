//! Full configuration validation.
//!
//! Each section has its own submodule; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod bus;
mod helpers;
mod tracker;


use crate::schema::ViewersConfig;
use viewers_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &ViewersConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    bus::validate_bus(&mut errors, config);
    tracker::validate_tracker(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
