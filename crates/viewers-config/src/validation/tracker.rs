use crate::schema::ViewersConfig;

use super::helpers::validate_range;

pub(crate) fn validate_tracker(errors: &mut Vec<String>, config: &ViewersConfig) {
    let tracker = &config.tracker;
    validate_range(errors, "tracker.dedupe_window", tracker.dedupe_window as u64, 0, 65_536);
    validate_range(errors, "tracker.unload_timeout_ms", tracker.unload_timeout_ms, 0, 10_000);
    validate_range(errors, "tracker.event_buffer", tracker.event_buffer as u64, 1, 65_536);
}
