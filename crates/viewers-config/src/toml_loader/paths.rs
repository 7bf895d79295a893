//! Location of the viewers config file and the commented default.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use viewers_common::ConfigError;

use super::template::default_config_toml;

const APP_DIR: &str = "viewers";
const CONFIG_FILE: &str = "config.toml";

/// `<platform config dir>/viewers/config.toml`, e.g.
/// `~/.config/viewers/config.toml` on Linux.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|base| config_path_in(&base))
        .ok_or_else(|| ConfigError::ParseError("no platform config directory for viewers".into()))
}

pub(super) fn config_path_in(base: &Path) -> PathBuf {
    base.join(APP_DIR).join(CONFIG_FILE)
}

/// Write the commented bus/tracker/logging template to `path`, creating
/// parent directories. An existing file is left as it is.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        debug!(path = %path.display(), "Viewers config already present");
        return Ok(());
    }

    let io_error = |action: &str, target: &Path, e: std::io::Error| {
        ConfigError::ParseError(format!("failed to {action} {}: {e}", target.display()))
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| io_error("create config directory", parent, e))?;
    }
    std::fs::write(path, default_config_toml())
        .map_err(|e| io_error("write default viewers config to", path, e))?;

    info!(path = %path.display(), "Wrote default viewers config");
    Ok(())
}
