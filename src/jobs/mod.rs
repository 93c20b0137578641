//! Long-running background loops. Each one owns a clone of the shutdown
//! token and returns once it is cancelled.

pub mod posting_scheduler;
pub mod timeout_monitor;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::workflow::runs::BatchRuns;
use crate::workflow::upload::UploadSessions;

pub use posting_scheduler::{Pacing, PostingScheduler};
pub use timeout_monitor::TimeoutMonitor;

/// Handles of the spawned loops, joined on shutdown.
pub struct Jobs {
    shutdown: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Jobs {
    pub fn start(
        monitor: TimeoutMonitor,
        scheduler: PostingScheduler,
        uploads: Arc<UploadSessions>,
        runs: Arc<BatchRuns>,
        shutdown: CancellationToken,
    ) -> Self {
        let handles = vec![
            ("timeout_monitor", timeout_monitor::spawn(monitor, shutdown.clone())),
            ("posting_scheduler", posting_scheduler::spawn(scheduler, shutdown.clone())),
            (
                "session_sweeper",
                spawn_session_sweeper(uploads, runs, Duration::from_secs(60), shutdown.clone()),
            ),
        ];
        Self { shutdown, handles }
    }

    /// Cancel every loop and wait for them; an in-flight publish completes first.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(job = name, error = %e, "background job panicked");
            }
        }
        tracing::info!("background jobs stopped");
    }
}

/// Drops expired upload and run sessions so abandoned ones don't pile up.
pub fn spawn_session_sweeper(
    uploads: Arc<UploadSessions>,
    runs: Arc<BatchRuns>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let purged = uploads.purge_expired() + runs.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "expired sessions removed");
            }
        }
    })
}
