//! Per-connection handler: decode client frames, apply them to the topic
//! store, and drain the connection's outbox to the socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use viewers_presence::bus::wire::{ClientFrame, ServerFrame};
use viewers_presence::ReplayFrom;

use crate::topics::{enqueue, Outbox, TopicStore};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Handle a single WebSocket connection.
pub async fn handle_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    addr: SocketAddr,
    store: TopicStore,
    client_buffer: usize,
) {
    let conn = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<String>(client_buffer.max(1));

    tracing::info!(peer = %addr, conn, "Client connected");

    loop {
        tokio::select! {
            // Queued frames → this client's WebSocket
            Some(msg) = rx.recv() => {
                if sink.send(Message::Text(msg.into())).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, conn, &store, &tx).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    store.remove_connection(conn).await;
    tracing::info!(peer = %addr, conn, "Client disconnected");
}

/// Apply one text frame from connection `conn`, queueing replies on `outbox`.
pub async fn handle_frame(text: &str, conn: u64, store: &TopicStore, outbox: &Outbox) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(conn, error = %e, "Invalid client frame");
            enqueue(
                outbox,
                &ServerFrame::Error {
                    message: format!("invalid frame: {e}"),
                },
            );
            return;
        }
    };

    match frame {
        ClientFrame::Subscribe {
            msg_ref,
            topic,
            replay_from,
            epoch,
        } => {
            if topic.trim().is_empty() {
                enqueue(
                    outbox,
                    &ServerFrame::Nack {
                        msg_ref,
                        reason: "topic must not be empty".into(),
                    },
                );
                return;
            }
            tracing::debug!(conn, topic = %topic, replay_from, "Subscribe");
            store
                .subscribe(
                    conn,
                    &topic,
                    msg_ref,
                    ReplayFrom::from(replay_from),
                    epoch,
                    outbox.clone(),
                )
                .await;
        }
        ClientFrame::Unsubscribe { topic } => {
            tracing::debug!(conn, topic = %topic, "Unsubscribe");
            store.unsubscribe(conn, &topic).await;
        }
        ClientFrame::Publish {
            msg_ref,
            topic,
            payload,
        } => match store.publish(&topic, payload).await {
            Ok(replay_id) => enqueue(outbox, &ServerFrame::Ack { msg_ref, replay_id }),
            Err(reason) => {
                tracing::debug!(conn, topic = %topic, reason = %reason, "Publish rejected");
                enqueue(outbox, &ServerFrame::Nack { msg_ref, reason });
            }
        },
        ClientFrame::Heartbeat { msg_ref } => {
            enqueue(outbox, &ServerFrame::HeartbeatAck { msg_ref });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn next_frame(rx: &mut mpsc::Receiver<String>) -> ServerFrame {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    fn encode(frame: &ClientFrame) -> String {
        serde_json::to_string(frame).unwrap()
    }

    #[tokio::test]
    async fn publish_is_acked_and_echoed() {
        let store = TopicStore::new(10);
        let (tx, mut rx) = mpsc::channel(16);

        let subscribe = ClientFrame::Subscribe {
            msg_ref: "1".into(),
            topic: "t".into(),
            replay_from: -1,
            epoch: None,
        };
        handle_frame(&encode(&subscribe), 1, &store, &tx).await;
        assert!(matches!(next_frame(&mut rx), ServerFrame::Subscribed { .. }));

        let publish = ClientFrame::Publish {
            msg_ref: "2".into(),
            topic: "t".into(),
            payload: json!({ "recordId": "R1" }),
        };
        handle_frame(&encode(&publish), 1, &store, &tx).await;
        assert!(matches!(
            next_frame(&mut rx),
            ServerFrame::Event { replay_id: 1, .. }
        ));
        assert_eq!(
            next_frame(&mut rx),
            ServerFrame::Ack {
                msg_ref: "2".into(),
                replay_id: 1
            }
        );
    }

    #[tokio::test]
    async fn invalid_publish_is_nacked() {
        let store = TopicStore::new(10);
        let (tx, mut rx) = mpsc::channel(16);

        let publish = ClientFrame::Publish {
            msg_ref: "9".into(),
            topic: "t".into(),
            payload: json!([1, 2]),
        };
        handle_frame(&encode(&publish), 1, &store, &tx).await;
        assert!(matches!(
            next_frame(&mut rx),
            ServerFrame::Nack { ref msg_ref, .. } if msg_ref == "9"
        ));
    }

    #[tokio::test]
    async fn empty_topic_subscribe_is_nacked() {
        let store = TopicStore::new(10);
        let (tx, mut rx) = mpsc::channel(16);

        let subscribe = ClientFrame::Subscribe {
            msg_ref: "1".into(),
            topic: " ".into(),
            replay_from: -1,
            epoch: None,
        };
        handle_frame(&encode(&subscribe), 1, &store, &tx).await;
        assert!(matches!(next_frame(&mut rx), ServerFrame::Nack { .. }));
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn heartbeat_is_answered() {
        let store = TopicStore::new(10);
        let (tx, mut rx) = mpsc::channel(16);

        let heartbeat = ClientFrame::Heartbeat {
            msg_ref: "h".into(),
        };
        handle_frame(&encode(&heartbeat), 1, &store, &tx).await;
        assert_eq!(
            next_frame(&mut rx),
            ServerFrame::HeartbeatAck {
                msg_ref: "h".into()
            }
        );
    }

    #[tokio::test]
    async fn garbage_gets_an_error_frame() {
        let store = TopicStore::new(10);
        let (tx, mut rx) = mpsc::channel(16);

        handle_frame("not json", 1, &store, &tx).await;
        assert!(matches!(next_frame(&mut rx), ServerFrame::Error { .. }));
    }
}
