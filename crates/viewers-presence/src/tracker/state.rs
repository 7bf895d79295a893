//! Per-client viewer-count state machine.
//!
//! Pure and synchronous: it decides what a delivery means and which reply
//! to send, but never touches the bus itself.

use std::collections::{HashSet, VecDeque};

use viewers_common::{RecordId, ViewerId};

use crate::bus::Delivery;
use crate::protocol::{PresenceEvent, ViewingState};

/// Point-in-time view of a tracker, published to watchers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerSnapshot {
    /// Record being viewed, `None` while inactive.
    pub record_id: Option<RecordId>,
    /// Other viewers of `record_id` as far as this client knows.
    pub viewer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Phase {
    Inactive,
    Active {
        record_id: RecordId,
        viewer_count: u32,
    },
}

/// Why an inbound event did not touch the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DropReason {
    Inactive,
    OtherRecord,
    SelfOriginated,
    Duplicate,
    Malformed,
}

/// Result of applying one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reaction {
    Dropped(DropReason),
    Counted { viewer_count: u32 },
    /// Counted, and `reply` must be published.
    Reply {
        viewer_count: u32,
        reply: PresenceEvent,
    },
}

/// Bounded memory of replay ids already applied within one bus epoch.
#[derive(Debug)]
struct RecentDeliveries {
    window: usize,
    epoch: Option<u64>,
    order: VecDeque<u64>,
    seen: HashSet<u64>,
}

impl RecentDeliveries {
    fn new(window: usize) -> Self {
        Self {
            window,
            epoch: None,
            order: VecDeque::with_capacity(window),
            seen: HashSet::with_capacity(window),
        }
    }

    /// Ids from an earlier epoch say nothing about the new one.
    fn enter_epoch(&mut self, epoch: u64) {
        if self.epoch != Some(epoch) {
            self.clear();
            self.epoch = Some(epoch);
        }
    }

    /// Record `id`, returning false if it was already seen.
    fn insert(&mut self, id: u64) -> bool {
        if self.window == 0 {
            return true;
        }
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.window {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    fn clear(&mut self) {
        self.epoch = None;
        self.order.clear();
        self.seen.clear();
    }
}

#[derive(Debug)]
pub(crate) struct TrackerState {
    self_id: ViewerId,
    phase: Phase,
    recent: RecentDeliveries,
}

impl TrackerState {
    pub(crate) fn new(self_id: ViewerId, dedupe_window: usize) -> Self {
        Self {
            self_id,
            phase: Phase::Inactive,
            recent: RecentDeliveries::new(dedupe_window),
        }
    }

    pub(crate) fn record_id(&self) -> Option<&RecordId> {
        match &self.phase {
            Phase::Inactive => None,
            Phase::Active { record_id, .. } => Some(record_id),
        }
    }

    pub(crate) fn viewer_count(&self) -> u32 {
        match self.phase {
            Phase::Inactive => 0,
            Phase::Active { viewer_count, .. } => viewer_count,
        }
    }

    pub(crate) fn is_viewing(&self, record_id: &RecordId) -> bool {
        self.record_id() == Some(record_id)
    }

    pub(crate) fn snapshot(&self) -> ViewerSnapshot {
        ViewerSnapshot {
            record_id: self.record_id().cloned(),
            viewer_count: self.viewer_count(),
        }
    }

    /// Enter `record_id` with a zero count. Returns the `Entered` announcement.
    ///
    /// Callers end any previous activation first.
    pub(crate) fn begin(&mut self, record_id: RecordId) -> PresenceEvent {
        self.recent.clear();
        self.phase = Phase::Active {
            record_id: record_id.clone(),
            viewer_count: 0,
        };
        PresenceEvent::entered(record_id, self.self_id.clone())
    }

    /// Go inactive. Returns the `Left` announcement, or `None` if already inactive.
    pub(crate) fn end(&mut self) -> Option<PresenceEvent> {
        match std::mem::replace(&mut self.phase, Phase::Inactive) {
            Phase::Inactive => None,
            Phase::Active { record_id, .. } => {
                self.recent.clear();
                Some(PresenceEvent::left(record_id, self.self_id.clone()))
            }
        }
    }

    /// Apply one delivery from the bus.
    pub(crate) fn apply_delivery(&mut self, delivery: &Delivery) -> Reaction {
        if delivery.replay_id.is_some() {
            self.recent.enter_epoch(delivery.epoch);
        }
        self.apply_payload(&delivery.payload, delivery.replay_id)
    }

    /// Decode and apply one payload.
    pub(crate) fn apply_payload(
        &mut self,
        payload: &serde_json::Value,
        replay_id: Option<u64>,
    ) -> Reaction {
        match PresenceEvent::from_value(payload) {
            Some(event) => self.apply(&event, replay_id),
            None => Reaction::Dropped(DropReason::Malformed),
        }
    }

    /// Apply one inbound event.
    pub(crate) fn apply(&mut self, event: &PresenceEvent, replay_id: Option<u64>) -> Reaction {
        let Phase::Active {
            record_id,
            viewer_count,
        } = &mut self.phase
        else {
            return Reaction::Dropped(DropReason::Inactive);
        };
        if event.record_id != *record_id {
            return Reaction::Dropped(DropReason::OtherRecord);
        }
        if event.created_by == self.self_id {
            return Reaction::Dropped(DropReason::SelfOriginated);
        }
        // Deliveries without a replay id cannot be de-duplicated.
        if let Some(id) = replay_id {
            if !self.recent.insert(id) {
                return Reaction::Dropped(DropReason::Duplicate);
            }
        }

        match event.viewing_state {
            ViewingState::Entered => {
                *viewer_count = viewer_count.saturating_add(1);
                Reaction::Reply {
                    viewer_count: *viewer_count,
                    reply: PresenceEvent::responded(
                        record_id.clone(),
                        event.created_by.clone(),
                        self.self_id.clone(),
                    ),
                }
            }
            ViewingState::Left => {
                *viewer_count = viewer_count.saturating_sub(1);
                Reaction::Counted {
                    viewer_count: *viewer_count,
                }
            }
            // Any peer's reply counts; it may have been meant for another
            // client that entered at the same time.
            ViewingState::Responded => {
                *viewer_count = viewer_count.saturating_add(1);
                Reaction::Counted {
                    viewer_count: *viewer_count,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn active(record: &str) -> TrackerState {
        let mut state = TrackerState::new("A".into(), 16);
        state.begin(record.into());
        state
    }

    fn entered(by: &str) -> PresenceEvent {
        PresenceEvent::entered("R1".into(), by.into())
    }

    fn left(by: &str) -> PresenceEvent {
        PresenceEvent::left("R1".into(), by.into())
    }

    #[test]
    fn begin_announces_entered_with_zero_count() {
        let mut state = TrackerState::new("A".into(), 16);
        let event = state.begin("R1".into());
        assert_eq!(event, PresenceEvent::entered("R1".into(), "A".into()));
        assert_eq!(
            state.snapshot(),
            ViewerSnapshot {
                record_id: Some("R1".into()),
                viewer_count: 0
            }
        );
    }

    #[test]
    fn end_announces_left_once() {
        let mut state = active("R1");
        assert_eq!(
            state.end(),
            Some(PresenceEvent::left("R1".into(), "A".into()))
        );
        assert_eq!(state.end(), None);
        assert!(state.record_id().is_none());
        assert_eq!(state.snapshot(), ViewerSnapshot::default());
    }

    #[test]
    fn entered_counts_and_replies_to_originator() {
        let mut state = active("R1");
        let reaction = state.apply(&entered("B"), Some(1));
        assert_eq!(
            reaction,
            Reaction::Reply {
                viewer_count: 1,
                reply: PresenceEvent::responded("R1".into(), "B".into(), "A".into()),
            }
        );
    }

    #[test]
    fn responded_counts_without_reply() {
        let mut state = active("R1");
        let event = PresenceEvent::responded("R1".into(), "A".into(), "B".into());
        assert_eq!(
            state.apply(&event, Some(1)),
            Reaction::Counted { viewer_count: 1 }
        );
    }

    #[test]
    fn responded_to_someone_else_still_counts() {
        let mut state = active("R1");
        let event = PresenceEvent::responded("R1".into(), "C".into(), "B".into());
        assert_eq!(
            state.apply(&event, None),
            Reaction::Counted { viewer_count: 1 }
        );
    }

    #[test]
    fn unmatched_left_stays_at_zero() {
        let mut state = active("R1");
        assert_eq!(
            state.apply(&left("B"), Some(1)),
            Reaction::Counted { viewer_count: 0 }
        );
        assert_eq!(
            state.apply(&left("C"), Some(2)),
            Reaction::Counted { viewer_count: 0 }
        );
        assert_eq!(state.viewer_count(), 0);
    }

    #[test]
    fn balanced_enter_leave_returns_to_zero() {
        let mut state = active("R1");
        let peers = ["B", "C", "D", "E", "F"];
        let mut replay_id = 0;
        let mut next = || {
            replay_id += 1;
            Some(replay_id)
        };

        for peer in peers {
            state.apply(&entered(peer), next());
        }
        assert_eq!(state.viewer_count(), peers.len() as u32);

        // Interleave leaves in a different order than the enters.
        for peer in peers.iter().rev() {
            state.apply(&left(peer), next());
        }
        assert_eq!(state.viewer_count(), 0);
    }

    #[test]
    fn self_events_are_ignored() {
        let mut state = active("R1");
        for event in [
            entered("A"),
            left("A"),
            PresenceEvent::responded("R1".into(), "B".into(), "A".into()),
        ] {
            assert_eq!(
                state.apply(&event, None),
                Reaction::Dropped(DropReason::SelfOriginated)
            );
        }
        assert_eq!(state.viewer_count(), 0);
    }

    #[test]
    fn other_records_and_inactive_are_dropped() {
        let mut state = active("R2");
        assert_eq!(
            state.apply(&entered("B"), None),
            Reaction::Dropped(DropReason::OtherRecord)
        );

        let mut idle = TrackerState::new("A".into(), 16);
        assert_eq!(
            idle.apply(&entered("B"), None),
            Reaction::Dropped(DropReason::Inactive)
        );
    }

    #[test]
    fn duplicate_delivery_is_dropped() {
        let mut state = active("R1");
        assert!(matches!(
            state.apply(&entered("B"), Some(7)),
            Reaction::Reply { .. }
        ));
        assert_eq!(
            state.apply(&entered("B"), Some(7)),
            Reaction::Dropped(DropReason::Duplicate)
        );
        assert_eq!(state.viewer_count(), 1);
    }

    #[test]
    fn reused_ids_in_a_new_epoch_are_not_duplicates() {
        let mut state = TrackerState::new("A".into(), 256);
        state.begin("R1".into());
        let delivery = |epoch, replay_id, by: &str| Delivery {
            epoch,
            replay_id: Some(replay_id),
            payload: serde_json::to_value(entered(by)).unwrap(),
        };

        assert!(matches!(
            state.apply_delivery(&delivery(1, 1, "B")),
            Reaction::Reply { .. }
        ));
        assert_eq!(
            state.apply_delivery(&delivery(1, 1, "B")),
            Reaction::Dropped(DropReason::Duplicate)
        );

        // The bus restarted and numbers from 1 again.
        assert_eq!(
            state.apply_delivery(&delivery(2, 1, "C")),
            Reaction::Reply {
                viewer_count: 2,
                reply: PresenceEvent::responded("R1".into(), "C".into(), "A".into()),
            }
        );
        assert_eq!(
            state.apply_delivery(&delivery(2, 1, "C")),
            Reaction::Dropped(DropReason::Duplicate)
        );
        assert_eq!(state.viewer_count(), 2);
    }

    #[test]
    fn deliveries_without_replay_id_are_not_deduplicated() {
        let mut state = active("R1");
        state.apply(&entered("B"), None);
        state.apply(&entered("B"), None);
        assert_eq!(state.viewer_count(), 2);
    }

    #[test]
    fn dedupe_window_is_bounded() {
        let mut state = TrackerState::new("A".into(), 2);
        state.begin("R1".into());
        state.apply(&entered("B"), Some(1));
        state.apply(&entered("C"), Some(2));
        state.apply(&entered("D"), Some(3));
        // Id 1 fell out of the window, so it counts again.
        assert!(matches!(
            state.apply(&entered("B"), Some(1)),
            Reaction::Reply { .. }
        ));
        assert_eq!(
            state.apply(&entered("D"), Some(3)),
            Reaction::Dropped(DropReason::Duplicate)
        );
    }

    #[test]
    fn zero_window_disables_dedupe() {
        let mut state = TrackerState::new("A".into(), 0);
        state.begin("R1".into());
        state.apply(&entered("B"), Some(1));
        state.apply(&entered("B"), Some(1));
        assert_eq!(state.viewer_count(), 2);
    }

    #[test]
    fn reactivation_resets_count_and_dedupe() {
        let mut state = active("R1");
        state.apply(&entered("B"), Some(1));
        state.end();
        state.begin("R1".into());
        assert_eq!(state.viewer_count(), 0);
        assert!(matches!(
            state.apply(&entered("B"), Some(1)),
            Reaction::Reply { .. }
        ));
    }

    #[test]
    fn malformed_payloads_are_dropped() {
        let mut state = active("R1");
        let reaction =
            state.apply_payload(&json!({ "recordId": "R1", "viewingState": "Entered" }), Some(1));
        assert_eq!(reaction, Reaction::Dropped(DropReason::Malformed));

        let reaction = state.apply_payload(
            &json!({ "recordId": "R1", "viewingState": "Left", "responseTo": null, "createdBy": "B" }),
            Some(2),
        );
        assert_eq!(reaction, Reaction::Counted { viewer_count: 0 });
    }
}
