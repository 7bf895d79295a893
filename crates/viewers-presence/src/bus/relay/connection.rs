//! Background WebSocket connection loop with auto-reconnect.

use std::future::Future;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::handler::{next_ref, Outcome, Registry};
use super::types::{RelayCommand, RelayConfig};
use crate::bus::wire::{ClientFrame, ServerFrame};

/// How a connected session ended.
enum SessionEnd {
    /// Socket closed or failed; reconnect.
    Closed,
    /// Disconnect requested or every handle dropped; stop for good.
    Stopped,
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Background task managing the relay connection with auto-reconnect.
///
/// While disconnected, commands are still drained: requests fail with
/// `NotConnected` and unsubscribes update local state.
pub(crate) async fn connection_loop(
    config: RelayConfig,
    connected: watch::Sender<bool>,
    mut command_rx: mpsc::Receiver<RelayCommand>,
) {
    let mut registry = Registry::default();
    let mut reconnect_delay = config.reconnect_delay_secs;
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);

    loop {
        info!(url = %config.redacted_url(), "Connecting to relay");

        let attempt = tokio::time::timeout(
            connect_timeout,
            tokio_tungstenite::connect_async(config.url.as_str()),
        );
        let Some(result) = serve_offline(attempt, &mut command_rx, &mut registry).await else {
            break;
        };

        match result {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                connected.send_replace(true);
                info!("Connected to relay");

                let end = run_session(ws_stream, &config, &mut command_rx, &mut registry).await;

                connected.send_replace(false);
                registry.connection_lost();
                if let SessionEnd::Stopped = end {
                    break;
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to relay");
            }
            Err(_elapsed) => {
                error!(
                    timeout_secs = config.connect_timeout_secs,
                    "Relay connection timed out"
                );
            }
        }

        // Exponential backoff reconnect.
        info!(
            delay = reconnect_delay,
            "Reconnecting in {} seconds", reconnect_delay
        );
        let wait = tokio::time::sleep(Duration::from_secs(reconnect_delay));
        if serve_offline(wait, &mut command_rx, &mut registry)
            .await
            .is_none()
        {
            break;
        }
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay_secs);
    }

    registry.connection_lost();
    info!("Relay connection task stopped");
}

/// Drive `fut` to completion while answering commands as if offline.
/// Returns `None` if the loop should stop instead.
async fn serve_offline<F: Future>(
    fut: F,
    command_rx: &mut mpsc::Receiver<RelayCommand>,
    registry: &mut Registry,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            cmd = command_rx.recv() => match cmd {
                Some(cmd) => {
                    if !registry.apply_offline(cmd) {
                        return None;
                    }
                }
                None => return None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

async fn run_session<S>(
    ws_stream: S,
    config: &RelayConfig,
    command_rx: &mut mpsc::Receiver<RelayCommand>,
    registry: &mut Registry,
) -> SessionEnd
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Sink<WsMessage>
        + Unpin,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();

    // Pick up every topic that survived the last connection.
    for frame in registry.resubscribe_all() {
        if !send_frame(&mut ws_write, &frame).await {
            return SessionEnd::Closed;
        }
    }

    let period = Duration::from_secs(config.heartbeat_interval_secs.max(1));
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                let Some(cmd) = cmd else {
                    let _ = ws_write.send(WsMessage::Close(None)).await;
                    return SessionEnd::Stopped;
                };
                match registry.apply(cmd) {
                    Outcome::Send(frame) => {
                        if !send_frame(&mut ws_write, &frame).await {
                            return SessionEnd::Closed;
                        }
                    }
                    Outcome::Idle => {}
                    Outcome::Disconnect => {
                        let _ = ws_write.send(WsMessage::Close(None)).await;
                        return SessionEnd::Stopped;
                    }
                }
            }
            msg = ws_read.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => {
                            if let Some(reply) = registry.on_frame(frame) {
                                if !send_frame(&mut ws_write, &reply).await {
                                    return SessionEnd::Closed;
                                }
                            }
                        }
                        Err(e) => debug!(error = %e, text = %text, "Unrecognized frame from relay"),
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("Relay closed connection");
                    return SessionEnd::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    return SessionEnd::Closed;
                }
            },
            _ = heartbeat.tick() => {
                let frame = ClientFrame::Heartbeat { msg_ref: next_ref() };
                if !send_frame(&mut ws_write, &frame).await {
                    return SessionEnd::Closed;
                }
            }
        }
    }
}

/// Encode and send one frame. Returns false if the socket is gone.
async fn send_frame<S>(ws_write: &mut S, frame: &ClientFrame) -> bool
where
    S: Sink<WsMessage> + Unpin,
{
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to encode relay frame");
            return true;
        }
    };
    ws_write.send(WsMessage::Text(json.into())).await.is_ok()
}
