//! viewers-relay: WebSocket broadcast bus for record presence.
//!
//! Clients subscribe to topics and publish JSON objects to them. Every
//! accepted message gets a per-topic replay id, is kept in a bounded replay
//! window, and is fanned out to all current subscribers (the publisher
//! included). Delivery is at-most-once: a client whose outbox is full
//! misses the message.

mod connection;
mod topics;

use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use crate::connection::handle_connection;
use crate::topics::TopicStore;

#[derive(Parser)]
#[command(name = "viewers-relay", about = "WebSocket broadcast bus for record presence")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 8787)]
    port: u16,

    /// Messages retained per topic for replay.
    #[arg(long, default_value_t = 100)]
    replay_window: usize,

    /// Outbound frames queued per client before messages are dropped.
    #[arg(long, default_value_t = 256)]
    client_buffer: usize,

    /// Seconds an empty topic is kept after its last activity.
    #[arg(long, default_value_t = 3600)]
    topic_ttl: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "viewers_relay=info".into()),
        )
        .init();

    let args = Args::parse();
    let store = TopicStore::new(args.replay_window);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind TCP listener");
            std::process::exit(1);
        }
    };

    tracing::info!(
        replay_window = args.replay_window,
        "viewers-relay listening on {}",
        addr
    );

    // Spawn idle topic reaper.
    let reaper_store = store.clone();
    let ttl = Duration::from_secs(args.topic_ttl);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            reaper_store.reap_idle(ttl).await;
            let count = reaper_store.count().await;
            tracing::debug!(topics = count, "Reaper tick");
        }
    });

    // Accept loop.
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let store = store.clone();
                let client_buffer = args.client_buffer;
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, store, client_buffer).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}
