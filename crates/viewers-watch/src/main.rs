//! viewers-watch: follow record presence from the terminal.
//!
//! Each line on stdin names the record now in view; an empty line means
//! no record. Viewer count changes are printed as they arrive. Closing
//! stdin or pressing Ctrl-C leaves the current record and exits.

use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use viewers_common::{RecordId, ViewerId};
use viewers_config::{LogLevel, ViewersConfig};
use viewers_presence::{PresenceClient, ViewerSnapshot};

#[derive(Parser)]
#[command(name = "viewers-watch", about = "Show who else is viewing a record")]
struct Args {
    /// Config file (defaults to the platform config directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Viewer id to announce (defaults to a random id).
    #[arg(long)]
    viewer: Option<String>,

    /// Relay URL, overriding the config file.
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("viewers-watch: {e}");
            std::process::exit(1);
        }
    };
    if let Some(url) = args.url {
        config.bus.url = url;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter(config.logging.level).into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let viewer = args
        .viewer
        .map(ViewerId::from)
        .unwrap_or_else(ViewerId::generate);
    tracing::info!(viewer = %viewer, "Starting");

    let client = match PresenceClient::start(&config, viewer).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start presence client");
            std::process::exit(1);
        }
    };

    let (signal_tx, signal_rx) = mpsc::channel(16);
    let driver = client.drive(signal_rx);
    let cancel = driver.cancel_token();

    // Stdin reader: one location signal per line.
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if signal_tx.send(parse_location(&line)).await.is_err() {
                break;
            }
        }
    });

    let mut snapshots = client.tracker().watch();
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", describe(&snapshots.borrow_and_update()));
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                cancel.cancel();
                break;
            }
            _ = cancel.cancelled() => break,
        }
        if driver.is_finished() {
            break;
        }
    }

    driver.unload().await;
    if let Err(e) = client.close().await {
        tracing::warn!(error = %e, "Shutdown incomplete");
    }
}

fn load(args: &Args) -> Result<ViewersConfig, viewers_common::ConfigError> {
    match &args.config {
        Some(path) => {
            let config = viewers_config::load_from_path(path)?;
            viewers_config::validation::validate(&config)?;
            Ok(config)
        }
        None => viewers_config::load_config(),
    }
}

fn log_filter(level: LogLevel) -> String {
    let level = level.as_directive();
    format!("viewers_watch={level},viewers_presence={level}")
}

fn parse_location(line: &str) -> Option<RecordId> {
    let line = line.trim();
    (!line.is_empty()).then(|| RecordId::new(line))
}

fn describe(snapshot: &ViewerSnapshot) -> String {
    match &snapshot.record_id {
        None => "not viewing a record".to_string(),
        Some(record) => match snapshot.viewer_count {
            1 => format!("{record}: 1 other viewer"),
            n => format!("{record}: {n} other viewers"),
        },
    }
}
