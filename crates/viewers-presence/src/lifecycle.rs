//! Drives a tracker from "which record is on screen" signals.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use viewers_common::{PresenceError, RecordId};

use crate::tracker::PresenceTracker;

/// Background task applying location signals to a [`PresenceTracker`].
///
/// Each signal names the record now in view, or `None` when no record is.
/// Repeated signals for the current record are no-ops. When the signal
/// source closes or the cancellation token fires, the driver runs the
/// unload teardown: `Left` for the current record, bounded by the
/// tracker's unload timeout, then the tracker stops.
///
/// The teardown is best-effort. If the process dies first, peers keep
/// counting this client until they deactivate themselves.
pub struct LocationDriver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LocationDriver {
    pub fn spawn(
        tracker: PresenceTracker,
        signals: mpsc::Receiver<Option<RecordId>>,
        cancel: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(drive(tracker, signals, cancel.clone()));
        Self { cancel, handle }
    }

    /// Token that triggers the unload teardown when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Run the unload teardown and wait for it to finish.
    pub async fn unload(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Location driver task failed");
        }
    }
}

async fn drive(
    tracker: PresenceTracker,
    mut signals: mpsc::Receiver<Option<RecordId>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Unload requested");
                break;
            }
            signal = signals.recv() => match signal {
                Some(location) => {
                    let location = location.filter(|record| !record.as_str().is_empty());
                    match tracker.follow(location).await {
                        Ok(changed) => debug!(changed, "Location signal applied"),
                        Err(PresenceError::TrackerStopped) => {
                            warn!("Tracker stopped, location driver exiting");
                            return;
                        }
                        // Retried by the next signal for the same record.
                        Err(e) => warn!(error = %e, "Location signal not applied"),
                    }
                }
                None => {
                    debug!("Location signal source closed");
                    break;
                }
            },
        }
    }

    if let Err(e) = tracker.shutdown(tracker.unload_timeout()).await {
        warn!(error = %e, "Unload teardown failed");
    }
}
