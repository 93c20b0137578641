//! Background job: drain APPROVED requests one at a time, oldest first.
//!
//! Publishing is single-flight process-wide (`publish_gate`). After a post
//! the loop waits a random pacing delay; after a failure, an idle scan or a
//! store error it waits the regular poll interval. A terminal write that
//! failed after publishing is retried before anything new is selected.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::WorkflowError;
use crate::models::approval::{ApprovalRequest, ApprovalStatus, Platform};
use crate::workflow::{LifecycleEngine, PublishOutcome};

#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub poll_interval: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Pacing {
    /// Uniform in `[min_delay, max_delay]`.
    pub fn jitter(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
    }
}

/// Oldest by creation time; ties broken by story id, then platform.
pub fn select_next(ready: Vec<ApprovalRequest>) -> Option<ApprovalRequest> {
    ready.into_iter().min_by(|a, b| {
        (a.created_at, &a.story_id, a.platform).cmp(&(b.created_at, &b.story_id, b.platform))
    })
}

#[derive(Clone)]
pub struct PostingScheduler {
    engine: Arc<LifecycleEngine>,
    pacing: Pacing,
    publish_gate: Arc<Mutex<()>>,
}

impl PostingScheduler {
    pub fn new(engine: Arc<LifecycleEngine>, pacing: Pacing) -> Self {
        Self {
            engine,
            pacing,
            publish_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Select and publish at most one request. `None` when nothing is ready.
    pub async fn tick(&self) -> Result<Option<PublishOutcome>, WorkflowError> {
        let _gate = self.publish_gate.lock().await;

        // A record whose publish already ran goes first; only its write is retried.
        if let Some(outcome) = self.engine.resume_unsettled().await? {
            return Ok(Some(outcome));
        }

        let ready = self
            .engine
            .store()
            .list(&|r| r.status == ApprovalStatus::Approved)
            .await?;
        for platform in Platform::ALL {
            let count = ready.iter().filter(|r| r.platform == platform).count();
            self.engine.metrics().ready(platform, count);
        }

        let Some(next) = select_next(ready) else {
            return Ok(None);
        };
        tracing::debug!(
            story_id = %next.story_id,
            platform = %next.platform,
            created_at = %next.created_at,
            "publishing next approved request"
        );
        self.engine.publish_one(&next.key()).await.map(Some)
    }

    /// How long to wait after a tick.
    fn pause_after(&self, result: &Result<Option<PublishOutcome>, WorkflowError>) -> Duration {
        match result {
            Ok(Some(outcome)) if outcome.is_posted() => self.pacing.jitter(),
            Ok(Some(outcome)) => {
                tracing::info!(outcome = outcome.as_str(), "publish did not post, polling again");
                self.pacing.poll_interval
            }
            Ok(None) => self.pacing.poll_interval,
            Err(e) => {
                tracing::error!(error = %e, "scheduler tick failed, retrying next poll");
                self.pacing.poll_interval
            }
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            poll_secs = self.pacing.poll_interval.as_secs(),
            min_delay_secs = self.pacing.min_delay.as_secs(),
            max_delay_secs = self.pacing.max_delay.as_secs(),
            "posting scheduler started"
        );
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            // An in-flight publish is never raced against shutdown.
            let result = self.tick().await;
            let pause = self.pause_after(&result);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        tracing::info!("posting scheduler stopped");
    }
}

/// Spawn the scheduler loop. It exits when `shutdown` is cancelled.
pub fn spawn(scheduler: PostingScheduler, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(scheduler.run(shutdown))
}
