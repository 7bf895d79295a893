//! Bus endpoint, topic, and timing validation.

use crate::schema::ViewersConfig;

use super::helpers::validate_range;

pub(crate) fn validate_bus(errors: &mut Vec<String>, config: &ViewersConfig) {
    let bus = &config.bus;

    if !(bus.url.starts_with("ws://") || bus.url.starts_with("wss://")) {
        errors.push(format!("bus.url = {:?} must start with ws:// or wss://", bus.url));
    }

    if bus.topic.is_empty() {
        errors.push("bus.topic must not be empty".into());
    } else if bus.topic.chars().any(char::is_whitespace) {
        errors.push(format!("bus.topic = {:?} must not contain whitespace", bus.topic));
    }

    if bus.replay_from < -2 {
        errors.push(format!(
            "bus.replay_from = {} must be -1, -2, or a replay id >= 0",
            bus.replay_from
        ));
    }

    validate_range(errors, "bus.connect_timeout_secs", bus.connect_timeout_secs, 1, 120);
    validate_range(errors, "bus.request_timeout_ms", bus.request_timeout_ms, 50, 60_000);
    validate_range(errors, "bus.heartbeat_interval_secs", bus.heartbeat_interval_secs, 5, 300);
    validate_range(errors, "bus.reconnect_delay_secs", bus.reconnect_delay_secs, 1, 300);
    validate_range(
        errors,
        "bus.max_reconnect_delay_secs",
        bus.max_reconnect_delay_secs,
        1,
        3600,
    );

    if bus.reconnect_delay_secs > bus.max_reconnect_delay_secs {
        errors.push(format!(
            "bus.reconnect_delay_secs = {} exceeds bus.max_reconnect_delay_secs = {}",
            bus.reconnect_delay_secs, bus.max_reconnect_delay_secs
        ));
    }
}
