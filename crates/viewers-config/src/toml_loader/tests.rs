//! Tests for TOML config loading, creation, and path resolution.

use super::*;
use crate::schema::LogLevel;
use std::path::Path;

#[test]
fn load_from_nonexistent_returns_file_not_found() {
    let result = load_from_path(Path::new("/tmp/nonexistent_viewers_config.toml"));
    assert!(matches!(
        result,
        Err(viewers_common::ConfigError::FileNotFound(_))
    ));
}

#[test]
fn load_valid_partial_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[bus]
url = "wss://relay.example.com/ws"
topic = "account-viewing"

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.bus.url, "wss://relay.example.com/ws");
    assert_eq!(config.bus.topic, "account-viewing");
    assert_eq!(config.logging.level, LogLevel::Debug);
    // Defaults preserved
    assert_eq!(config.bus.replay_from, -1);
    assert_eq!(config.tracker.unload_timeout_ms, 500);
}

#[test]
fn load_invalid_toml_returns_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is not valid toml {{{").unwrap();

    let result = load_from_path(&path);
    assert!(matches!(
        result,
        Err(viewers_common::ConfigError::ParseError(_))
    ));
}

#[test]
fn unknown_log_level_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[logging]\nlevel = \"verbose\"\n").unwrap();

    let result = load_from_path(&path);
    assert!(matches!(
        result,
        Err(viewers_common::ConfigError::ParseError(_))
    ));
}

#[test]
fn load_config_with_invalid_values_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[bus]
topic = ""
"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.bus.topic, "record-viewing");
}

#[test]
fn create_default_config_writes_loadable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    create_default_config(&path).unwrap();
    assert!(path.exists());

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("[bus]"));
    assert!(content.contains("[tracker]"));

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.bus.topic, "record-viewing");
}

#[test]
fn create_default_config_keeps_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[bus]\ntopic = \"case-viewing\"\n").unwrap();

    create_default_config(&path).unwrap();
    let config = load_from_path(&path).unwrap();
    assert_eq!(config.bus.topic, "case-viewing");
}

#[test]
fn config_path_is_under_app_dir() {
    let path = paths::config_path_in(Path::new("/home/u/.config"));
    assert_eq!(path, Path::new("/home/u/.config/viewers/config.toml"));
}

#[test]
fn default_config_path_ends_with_viewers_config() {
    if let Ok(path) = default_config_path() {
        assert!(path.ends_with("viewers/config.toml"));
    }
}
