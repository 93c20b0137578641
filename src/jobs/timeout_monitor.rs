//! Background job: auto-approve requests whose decision deadline passed.
//!
//! Scans every `interval` for PENDING records with `decision_deadline <= now`
//! and escalates each through the engine. The escalation is a conditional
//! PENDING → APPROVED, so racing a human decision is harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::workflow::{DecisionOutcome, LifecycleEngine};

pub struct TimeoutMonitor {
    engine: Arc<LifecycleEngine>,
    interval: Duration,
}

impl TimeoutMonitor {
    pub fn new(engine: Arc<LifecycleEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// One scan. Returns how many requests this call escalated.
    pub async fn run_once(&self, now: DateTime<Utc>) -> usize {
        let overdue = match self.engine.store().list(&|r| r.is_overdue(now)).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "timeout scan failed, retrying next tick");
                return 0;
            }
        };

        let mut escalated = 0;
        for record in overdue {
            let key = record.key();
            match self.engine.auto_approve(&key, now).await {
                Ok(DecisionOutcome::Applied { .. }) => escalated += 1,
                Ok(_) => {}
                Err(e) => tracing::error!(
                    story_id = %key.story_id,
                    platform = %key.platform,
                    error = %e,
                    "auto-approve failed"
                ),
            }
        }
        if escalated > 0 {
            tracing::info!(escalated, "timed-out requests auto-approved");
        }
        escalated
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "timeout monitor started");
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.run_once(Utc::now()).await;
        }
        tracing::info!("timeout monitor stopped");
    }
}

/// Spawn the monitor loop. It exits when `shutdown` is cancelled.
pub fn spawn(monitor: TimeoutMonitor, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(monitor.run(shutdown))
}
