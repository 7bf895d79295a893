//! JSON frames exchanged between `RelayBus` and the relay server.
//!
//! Every frame is a WebSocket text message tagged by `"type"`. Requests
//! carry a client-chosen `ref` that the relay echoes in its reply.

use serde::{Deserialize, Serialize};

/// Largest publish payload the relay accepts, in bytes of encoded JSON.
pub const MAX_PAYLOAD_BYTES: usize = 32 * 1024;

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        #[serde(rename = "ref")]
        msg_ref: String,
        topic: String,
        replay_from: i64,
        /// Epoch a positive `replay_from` refers to. The relay ignores the
        /// resume point if the topic has moved on to another epoch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        epoch: Option<u64>,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        #[serde(rename = "ref")]
        msg_ref: String,
        topic: String,
        payload: serde_json::Value,
    },
    Heartbeat {
        #[serde(rename = "ref")]
        msg_ref: String,
    },
}

/// Frames sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Subscription established; replayed events follow. Replay ids in
    /// later events belong to `epoch`.
    Subscribed {
        #[serde(rename = "ref")]
        msg_ref: String,
        topic: String,
        #[serde(default)]
        epoch: u64,
    },
    /// Publish accepted under `replay_id`.
    Ack {
        #[serde(rename = "ref")]
        msg_ref: String,
        replay_id: u64,
    },
    /// Request refused.
    Nack {
        #[serde(rename = "ref")]
        msg_ref: String,
        reason: String,
    },
    Event {
        topic: String,
        replay_id: u64,
        payload: serde_json::Value,
    },
    HeartbeatAck {
        #[serde(rename = "ref")]
        msg_ref: String,
    },
    /// Frame-level problem not tied to a request.
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_frame_shape() {
        let frame = ClientFrame::Subscribe {
            msg_ref: "7".into(),
            topic: "record-viewing".into(),
            replay_from: -1,
            epoch: None,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({ "type": "subscribe", "ref": "7", "topic": "record-viewing", "replay_from": -1 })
        );

        let resume = ClientFrame::Subscribe {
            msg_ref: "8".into(),
            topic: "record-viewing".into(),
            replay_from: 41,
            epoch: Some(3),
        };
        assert_eq!(serde_json::to_value(&resume).unwrap()["epoch"], json!(3));
    }

    #[test]
    fn parses_subscribed_frame() {
        let text = r#"{"type":"subscribed","ref":"1","topic":"t","epoch":99}"#;
        let frame: ServerFrame = serde_json::from_str(text).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Subscribed {
                msg_ref: "1".into(),
                topic: "t".into(),
                epoch: 99,
            }
        );
    }

    #[test]
    fn parses_event_frame() {
        let text = r#"{"type":"event","topic":"t","replay_id":12,"payload":{"recordId":"R1"}}"#;
        let frame: ServerFrame = serde_json::from_str(text).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Event {
                topic: "t".into(),
                replay_id: 12,
                payload: json!({ "recordId": "R1" }),
            }
        );
    }

    #[test]
    fn parses_nack_frame() {
        let text = r#"{"type":"nack","ref":"3","reason":"payload too large"}"#;
        let frame: ServerFrame = serde_json::from_str(text).unwrap();
        assert!(matches!(frame, ServerFrame::Nack { ref msg_ref, .. } if msg_ref == "3"));
    }

    #[test]
    fn unknown_frame_type_fails_to_parse() {
        let text = r#"{"type":"presence_diff","joins":{}}"#;
        assert!(serde_json::from_str::<ServerFrame>(text).is_err());
    }
}
