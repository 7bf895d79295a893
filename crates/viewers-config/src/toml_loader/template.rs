//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> &'static str {
    r##"# Record viewers configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[bus]
# url = "ws://127.0.0.1:8787/ws"   # ws:// or wss://
# topic = "record-viewing"
# replay_from = -1                 # -1 new only, -2 all retained, N after replay id N
# connect_timeout_secs = 15        # 1-120
# request_timeout_ms = 5000        # 50-60000
# heartbeat_interval_secs = 25     # 5-300
# reconnect_delay_secs = 1
# max_reconnect_delay_secs = 30

[tracker]
# dedupe_window = 256              # 0-65536, 0 disables duplicate suppression
# unload_timeout_ms = 500          # 0-10000
# event_buffer = 256               # 1-65536

[logging]
# level = "info"                   # trace, debug, info, warn, error
"##
}
