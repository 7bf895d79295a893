//! Presence event payload carried on the bus.
//!
//! The JSON shape is shared with existing subscribers and must not change:
//! `{"recordId":..,"viewingState":..,"responseTo":..,"createdBy":..}` with
//! `responseTo` always present (`null` unless the event is a reply).

use serde::{Deserialize, Serialize};
use viewers_common::{RecordId, ViewerId};

/// What a viewer is announcing about a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewingState {
    Entered,
    Left,
    Responded,
}

/// A single presence message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub record_id: RecordId,
    pub viewing_state: ViewingState,
    #[serde(default)]
    pub response_to: Option<ViewerId>,
    pub created_by: ViewerId,
}

impl PresenceEvent {
    pub fn entered(record_id: RecordId, created_by: ViewerId) -> Self {
        Self {
            record_id,
            viewing_state: ViewingState::Entered,
            response_to: None,
            created_by,
        }
    }

    pub fn left(record_id: RecordId, created_by: ViewerId) -> Self {
        Self {
            record_id,
            viewing_state: ViewingState::Left,
            response_to: None,
            created_by,
        }
    }

    /// Reply to `response_to`'s `Entered` announcement.
    pub fn responded(record_id: RecordId, response_to: ViewerId, created_by: ViewerId) -> Self {
        Self {
            record_id,
            viewing_state: ViewingState::Responded,
            response_to: Some(response_to),
            created_by,
        }
    }

    /// Decode an inbound payload, returning `None` for anything malformed.
    ///
    /// Events without a `recordId` or `createdBy` (missing or empty) and
    /// unknown `viewingState` values are rejected. An empty `responseTo`
    /// is treated as absent.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let mut event: PresenceEvent = serde_json::from_value(value.clone()).ok()?;
        if event.record_id.as_str().is_empty() || event.created_by.as_str().is_empty() {
            return None;
        }
        if event
            .response_to
            .as_ref()
            .is_some_and(|r| r.as_str().is_empty())
        {
            event.response_to = None;
        }
        Some(event)
    }
}
