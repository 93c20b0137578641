//! Lifecycle engine: the only component that moves a request between states.
//!
//! Every edge is a compare-and-set through [`RequestStore::transition`] or a
//! conditional [`RequestStore::with_lock`], so concurrent actors converge and
//! only the actor whose write committed emits the notice for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::errors::{StoreError, WorkflowError};
use crate::metrics::WorkflowMetrics;
use crate::models::approval::{ApprovalRequest, ApprovalStatus, MediaKind, RequestKey};
use crate::models::event::{ApprovalEvent, MediaEvent, MediaUpload};
use crate::models::notification::{Notice, NoticeKind};
use crate::notification::{deliver, Notifier};
use crate::publish::{PublishReceipt, PublishRequest, Publisher};
use crate::render::MediaRenderer;
use crate::store::{Mutation, RequestStore, Transition};

/// Result of one decision against one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Applied { status: ApprovalStatus },
    Stale { current: ApprovalStatus },
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub key: RequestKey,
    #[serde(flatten)]
    pub outcome: DecisionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MediaOutcome {
    Stored {
        images: usize,
        videos: usize,
        overlaid: bool,
    },
    /// The record does not exist; the media was logged and dropped.
    Dropped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    Posted { key: RequestKey, receipt: PublishReceipt },
    PublishFailed { key: RequestKey, reason: String },
    FallbackFailed { key: RequestKey, reason: String },
    /// The record was not APPROVED by the time it was looked at.
    Skipped { key: RequestKey },
}

impl PublishOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishOutcome::Posted { .. } => "posted",
            PublishOutcome::PublishFailed { .. } => "publish_failed",
            PublishOutcome::FallbackFailed { .. } => "fallback_failed",
            PublishOutcome::Skipped { .. } => "skipped",
        }
    }

    pub fn is_posted(&self) -> bool {
        matches!(self, PublishOutcome::Posted { .. })
    }
}

/// Boundary work that already happened for a record whose follow-up store
/// write failed. Only the write is retried; the boundary is never re-entered.
#[derive(Debug, Clone)]
enum Unsettled {
    /// Fallback media was generated but not attached yet.
    Media(String),
    /// Publish (or fallback) finished; the terminal state is not recorded yet.
    Outcome(Settlement),
}

#[derive(Debug, Clone)]
struct Settlement {
    to: ApprovalStatus,
    kind: NoticeKind,
    detail: String,
    outcome: PublishOutcome,
}

/// Overlay text for a record: the first line of its post content.
fn headline(record: &ApprovalRequest) -> &str {
    record.content.lines().next().unwrap_or_default().trim()
}

pub struct LifecycleEngine {
    store: Arc<dyn RequestStore>,
    notifier: Arc<dyn Notifier>,
    renderer: Arc<dyn MediaRenderer>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<WorkflowMetrics>,
    max_media: usize,
    unsettled: DashMap<RequestKey, Unsettled>,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn RequestStore>,
        notifier: Arc<dyn Notifier>,
        renderer: Arc<dyn MediaRenderer>,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<WorkflowMetrics>,
        max_media: usize,
    ) -> Self {
        Self {
            store,
            notifier,
            renderer,
            publisher,
            metrics,
            max_media,
            unsettled: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<WorkflowMetrics> {
        &self.metrics
    }

    // -- Decisions --

    /// Apply an approve/reject action. Records that are no longer PENDING
    /// and keys that do not exist are absorbed and reported, not failed.
    pub async fn on_approval_event(
        &self,
        event: &ApprovalEvent,
    ) -> Result<Vec<Decision>, WorkflowError> {
        let targets = event.targets().ok_or_else(|| {
            WorkflowError::InvalidEvent(format!(
                "action {:?} on story {} needs a platform",
                event.action, event.story_id
            ))
        })?;
        let to = event.action.target_status();
        let kind = match to {
            ApprovalStatus::Rejected => NoticeKind::Rejected,
            _ => NoticeKind::Approved,
        };

        let mut decisions = Vec::with_capacity(targets.len());
        for key in targets {
            let outcome = match self.store.transition(&key, ApprovalStatus::Pending, to).await {
                Ok(Transition::Applied(record)) => {
                    self.metrics.transition(to);
                    tracing::info!(
                        story_id = %key.story_id,
                        platform = %key.platform,
                        status = %to,
                        "decision applied"
                    );
                    deliver(self.notifier.as_ref(), Notice::for_request(kind, &record)).await;
                    DecisionOutcome::Applied { status: to }
                }
                Ok(Transition::Stale(record)) => {
                    let stale = WorkflowError::StaleAction {
                        key: key.clone(),
                        current: record.status,
                    };
                    tracing::info!(error = %stale, "ignoring decision");
                    DecisionOutcome::Stale {
                        current: record.status,
                    }
                }
                Err(StoreError::NotFound(_)) => {
                    tracing::debug!(
                        story_id = %key.story_id,
                        platform = %key.platform,
                        "decision for unknown request"
                    );
                    DecisionOutcome::Missing
                }
                Err(e) => return Err(e.into()),
            };
            decisions.push(Decision { key, outcome });
        }
        Ok(decisions)
    }

    /// Deadline escalation. Identical to an explicit approval except for the
    /// notice; a no-op unless the record is still PENDING and overdue at `now`.
    pub async fn auto_approve(
        &self,
        key: &RequestKey,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, WorkflowError> {
        let locked = match self
            .store
            .with_lock(
                key,
                Box::new(move |r: &mut ApprovalRequest| {
                    if !r.is_overdue(now) {
                        return Mutation::Discard;
                    }
                    r.status = ApprovalStatus::Approved;
                    Mutation::Commit
                }),
            )
            .await
        {
            Ok(locked) => locked,
            Err(StoreError::NotFound(_)) => return Ok(DecisionOutcome::Missing),
            Err(e) => return Err(e.into()),
        };

        if !locked.committed {
            return Ok(DecisionOutcome::Stale {
                current: locked.record.status,
            });
        }

        self.metrics.transition(ApprovalStatus::Approved);
        self.metrics.escalated(key.platform);
        tracing::info!(
            story_id = %key.story_id,
            platform = %key.platform,
            deadline = %locked.record.decision_deadline,
            "decision deadline passed, auto-approved"
        );
        deliver(
            self.notifier.as_ref(),
            Notice::for_request(NoticeKind::AutoApproved, &locked.record),
        )
        .await;
        Ok(DecisionOutcome::Applied {
            status: ApprovalStatus::Approved,
        })
    }

    // -- Media --

    /// Attach hosted media. The first image a record ever receives gets the
    /// headline overlay; everything else is stored verbatim and in order.
    pub async fn on_media_event(&self, event: MediaEvent) -> Result<MediaOutcome, WorkflowError> {
        let key = event.key().clone();
        let current = match self.store.get(&key).await {
            Ok(r) => r,
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(
                    story_id = %key.story_id,
                    platform = %key.platform,
                    "media for unknown request dropped"
                );
                return Ok(MediaOutcome::Dropped);
            }
            Err(e) => return Err(e.into()),
        };
        if current.status.is_terminal() {
            return Err(WorkflowError::MediaRejected {
                key,
                reason: format!("request is {}", current.status),
            });
        }

        let items: Vec<MediaUpload> = match event {
            MediaEvent::Hosted { upload, .. } => vec![upload],
            MediaEvent::Batch { items, .. } => items,
        };
        if items.is_empty() {
            return Ok(MediaOutcome::Stored {
                images: current.media.images.len(),
                videos: current.media.videos.len(),
                overlaid: false,
            });
        }
        if current.media.len() + items.len() > self.max_media {
            return Err(self.over_limit(key));
        }

        // Rendered outside the lock; whether it is used is decided under it.
        let mut overlay: Option<(usize, String)> = None;
        if current.media.images.is_empty() {
            if let Some(idx) = items.iter().position(|u| u.kind == MediaKind::Image) {
                match self
                    .renderer
                    .overlay_headline(&items[idx].reference, headline(&current))
                    .await
                {
                    Ok(url) => overlay = Some((idx, url)),
                    Err(e) => tracing::warn!(
                        story_id = %key.story_id,
                        platform = %key.platform,
                        error = %e,
                        "headline overlay failed, keeping original image"
                    ),
                }
            }
        }

        let max_media = self.max_media;
        let overlaid = Arc::new(AtomicBool::new(false));
        let overlaid_flag = overlaid.clone();
        let locked = self
            .store
            .with_lock(
                &key,
                Box::new(move |r: &mut ApprovalRequest| {
                    if r.status.is_terminal() || r.media.len() + items.len() > max_media {
                        return Mutation::Discard;
                    }
                    let first_image = r.media.images.is_empty();
                    for (idx, item) in items.into_iter().enumerate() {
                        let reference = match &overlay {
                            Some((at, url)) if *at == idx && first_image => {
                                overlaid_flag.store(true, Ordering::Relaxed);
                                url.clone()
                            }
                            _ => item.reference,
                        };
                        r.media.push(item.kind, reference);
                    }
                    Mutation::Commit
                }),
            )
            .await?;

        if !locked.committed {
            if locked.record.status.is_terminal() {
                return Err(WorkflowError::MediaRejected {
                    key,
                    reason: format!("request is {}", locked.record.status),
                });
            }
            return Err(self.over_limit(key));
        }

        let outcome = MediaOutcome::Stored {
            images: locked.record.media.images.len(),
            videos: locked.record.media.videos.len(),
            overlaid: overlaid.load(Ordering::Relaxed),
        };
        tracing::info!(
            story_id = %key.story_id,
            platform = %key.platform,
            images = locked.record.media.images.len(),
            videos = locked.record.media.videos.len(),
            "media attached"
        );
        Ok(outcome)
    }

    fn over_limit(&self, key: RequestKey) -> WorkflowError {
        WorkflowError::MediaRejected {
            key,
            reason: format!("at most {} media items per post", self.max_media),
        }
    }

    // -- Publishing --

    /// Publish one APPROVED record: fallback media if it has none, a single
    /// publish call, then the terminal state. Callers serialize invocations.
    ///
    /// Once the publish boundary (or fallback generation) has run for a key,
    /// a failed store write is parked and only the write is retried; the
    /// boundary is not called again for that record by this process.
    pub async fn publish_one(&self, key: &RequestKey) -> Result<PublishOutcome, WorkflowError> {
        if let Some(outcome) = self.resume(key).await? {
            return Ok(outcome);
        }
        let skipped = || PublishOutcome::Skipped { key: key.clone() };

        let mut record = match self.store.get(key).await {
            Ok(r) => r,
            Err(StoreError::NotFound(_)) => return Ok(skipped()),
            Err(e) => return Err(e.into()),
        };
        let generated = match self.unsettled.remove(key) {
            Some((_, Unsettled::Media(url))) => Some(url),
            _ => None,
        };
        if record.status != ApprovalStatus::Approved {
            tracing::debug!(
                story_id = %key.story_id,
                platform = %key.platform,
                status = %record.status,
                "not publishable, skipping"
            );
            return Ok(skipped());
        }

        if record.media.is_empty() {
            let url = match generated {
                Some(url) => url,
                None => {
                    deliver(
                        self.notifier.as_ref(),
                        Notice::for_request(NoticeKind::FallbackStarted, &record),
                    )
                    .await;
                    match self
                        .renderer
                        .generate(headline(&record), &record.sub_content)
                        .await
                    {
                        Ok(url) => url,
                        Err(e) => {
                            let err = WorkflowError::MediaFallbackFailed {
                                key: key.clone(),
                                reason: e.to_string(),
                            };
                            tracing::warn!(error = %err, "fallback media generation failed");
                            return self
                                .finish(
                                    key,
                                    Settlement {
                                        to: ApprovalStatus::Failed,
                                        kind: NoticeKind::Failed,
                                        detail: err.to_string(),
                                        outcome: PublishOutcome::FallbackFailed {
                                            key: key.clone(),
                                            reason: e.to_string(),
                                        },
                                    },
                                )
                                .await;
                        }
                    }
                }
            };
            match self.store.append_media(key, MediaKind::Image, url.clone()).await {
                Ok(locked) if !locked.committed => return Ok(skipped()),
                Ok(locked) => record = locked.record,
                Err(e) => {
                    self.unsettled.insert(key.clone(), Unsettled::Media(url));
                    return Err(e.into());
                }
            }
        }

        if record.status != ApprovalStatus::Approved {
            return Ok(skipped());
        }

        let request = PublishRequest::from(&record);
        let settled = match self.publisher.publish(&request).await {
            Ok(receipt) => {
                tracing::info!(
                    story_id = %key.story_id,
                    platform = %key.platform,
                    post_id = %receipt.post_id,
                    "published"
                );
                Settlement {
                    to: ApprovalStatus::Posted,
                    kind: NoticeKind::Posted,
                    detail: receipt.url.clone().unwrap_or_else(|| receipt.post_id.clone()),
                    outcome: PublishOutcome::Posted {
                        key: key.clone(),
                        receipt,
                    },
                }
            }
            Err(e) => {
                let err = WorkflowError::PublishFailed {
                    key: key.clone(),
                    reason: e.to_string(),
                };
                // Includes timeouts with an unknown remote result; those need
                // manual reconciliation.
                tracing::error!(error = %err, "publish failed");
                Settlement {
                    to: ApprovalStatus::Failed,
                    kind: NoticeKind::Failed,
                    detail: e.to_string(),
                    outcome: PublishOutcome::PublishFailed {
                        key: key.clone(),
                        reason: e.to_string(),
                    },
                }
            }
        };
        self.finish(key, settled).await
    }

    /// Retry one parked terminal write, if any. `None` when nothing is waiting.
    pub async fn resume_unsettled(&self) -> Result<Option<PublishOutcome>, WorkflowError> {
        let mut waiting: Vec<RequestKey> = self
            .unsettled
            .iter()
            .filter(|e| matches!(e.value(), Unsettled::Outcome(_)))
            .map(|e| e.key().clone())
            .collect();
        waiting.sort();
        match waiting.first() {
            Some(key) => self.resume(key).await,
            None => Ok(None),
        }
    }

    /// Number of records whose boundary work is waiting on a store write.
    pub fn unsettled_count(&self) -> usize {
        self.unsettled.len()
    }

    async fn resume(&self, key: &RequestKey) -> Result<Option<PublishOutcome>, WorkflowError> {
        let parked = match self.unsettled.remove(key) {
            Some((_, Unsettled::Outcome(parked))) => parked,
            Some((_, media)) => {
                self.unsettled.insert(key.clone(), media);
                return Ok(None);
            }
            None => return Ok(None),
        };
        tracing::info!(
            story_id = %key.story_id,
            platform = %key.platform,
            "retrying terminal state write"
        );
        self.finish(key, parked).await.map(Some)
    }

    /// Record the terminal state for boundary work that already ran. On a
    /// store error the work is parked for [`Self::resume_unsettled`].
    async fn finish(
        &self,
        key: &RequestKey,
        settled: Settlement,
    ) -> Result<PublishOutcome, WorkflowError> {
        match self
            .settle(key, settled.to, settled.kind, settled.detail.clone())
            .await
        {
            Ok(_) => {
                self.metrics
                    .publish_attempt(key.platform, settled.outcome.as_str());
                Ok(settled.outcome)
            }
            Err(e) => {
                tracing::error!(
                    story_id = %key.story_id,
                    platform = %key.platform,
                    status = %settled.to,
                    error = %e,
                    "terminal state not recorded, parked for retry"
                );
                self.unsettled
                    .insert(key.clone(), Unsettled::Outcome(settled));
                Err(e)
            }
        }
    }

    /// APPROVED → terminal, notifying only if this call made the change.
    async fn settle(
        &self,
        key: &RequestKey,
        to: ApprovalStatus,
        kind: NoticeKind,
        detail: String,
    ) -> Result<bool, WorkflowError> {
        match self.store.transition(key, ApprovalStatus::Approved, to).await? {
            Transition::Applied(record) => {
                self.metrics.transition(to);
                tracing::info!(
                    story_id = %key.story_id,
                    platform = %key.platform,
                    status = %to,
                    "request settled"
                );
                deliver(
                    self.notifier.as_ref(),
                    Notice::for_request(kind, &record).with_detail(detail),
                )
                .await;
                Ok(true)
            }
            Transition::Stale(record) => {
                tracing::warn!(
                    story_id = %key.story_id,
                    platform = %key.platform,
                    status = %record.status,
                    wanted = %to,
                    "request changed state during publish"
                );
                Ok(false)
            }
        }
    }
}
