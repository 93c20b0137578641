//! Durable keyed storage for approval requests.
//!
//! Every backend serializes read-modify-write per (story, platform) through
//! [`RequestStore::with_lock`]; the lifecycle engine only ever talks to the
//! trait. Backends:
//!   - [`file::FileStore`]: one JSON file per record, atomic replace on write.
//!   - [`postgres::PgStore`]: one row per record, `SELECT … FOR UPDATE`.
//!   - [`memory::MemoryStore`]: process-local, for tests and ephemeral runs.

pub mod file;
pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::errors::StoreError;
use crate::models::approval::{
    ApprovalRequest, ApprovalStatus, MediaKind, NewApprovalRequest, RequestKey,
};

/// Verdict of a mutator run under the record lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Commit,
    Discard,
}

/// Synchronous edit applied to the current record while its lock is held.
pub type Mutator = Box<dyn FnOnce(&mut ApprovalRequest) -> Mutation + Send>;

/// Predicate for full scans.
pub type Filter<'a> = &'a (dyn Fn(&ApprovalRequest) -> bool + Send + Sync);

/// Result of a locked read-modify-write. `record` is what is stored after
/// the operation, whether or not the mutator committed.
#[derive(Debug, Clone)]
pub struct Locked {
    pub record: ApprovalRequest,
    pub committed: bool,
}

/// Outcome of a compare-and-set status change.
#[derive(Debug, Clone)]
pub enum Transition {
    Applied(ApprovalRequest),
    Stale(ApprovalRequest),
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Persist a new PENDING record. Fails with `AlreadyExists` if the key is taken.
    async fn create(&self, new: NewApprovalRequest) -> Result<ApprovalRequest, StoreError>;

    async fn get(&self, key: &RequestKey) -> Result<ApprovalRequest, StoreError>;

    /// Run `mutate` on the record under its exclusive lock and persist the
    /// result on `Mutation::Commit`.
    async fn with_lock(&self, key: &RequestKey, mutate: Mutator) -> Result<Locked, StoreError>;

    /// Full scan. Each record is a consistent snapshot; the scan as a whole is not.
    async fn list(&self, filter: Filter<'_>) -> Result<Vec<ApprovalRequest>, StoreError>;

    async fn update_status(
        &self,
        key: &RequestKey,
        status: ApprovalStatus,
    ) -> Result<ApprovalRequest, StoreError> {
        let locked = self
            .with_lock(
                key,
                Box::new(move |r: &mut ApprovalRequest| {
                    r.status = status;
                    Mutation::Commit
                }),
            )
            .await?;
        Ok(locked.record)
    }

    /// Move `from` → `to` only if the record is currently `from`.
    async fn transition(
        &self,
        key: &RequestKey,
        from: ApprovalStatus,
        to: ApprovalStatus,
    ) -> Result<Transition, StoreError> {
        let locked = self
            .with_lock(
                key,
                Box::new(move |r: &mut ApprovalRequest| {
                    if r.status != from {
                        return Mutation::Discard;
                    }
                    r.status = to;
                    Mutation::Commit
                }),
            )
            .await?;
        Ok(if locked.committed {
            Transition::Applied(locked.record)
        } else {
            Transition::Stale(locked.record)
        })
    }

    /// Append one media reference. Terminal records are left untouched.
    async fn append_media(
        &self,
        key: &RequestKey,
        kind: MediaKind,
        reference: String,
    ) -> Result<Locked, StoreError> {
        self.with_lock(
            key,
            Box::new(move |r: &mut ApprovalRequest| {
                if r.status.is_terminal() {
                    return Mutation::Discard;
                }
                r.media.push(kind, reference);
                Mutation::Commit
            }),
        )
        .await
    }
}

/// Apply a mutator to a copy of `current`. Returns the record to persist, or
/// `None` when nothing should be written. Fields fixed at creation are
/// restored and shrinking media lists are refused.
pub(crate) fn apply_mutation(current: &ApprovalRequest, mutate: Mutator) -> Option<ApprovalRequest> {
    let mut next = current.clone();
    if mutate(&mut next) == Mutation::Discard {
        return None;
    }

    next.story_id = current.story_id.clone();
    next.platform = current.platform;
    next.workflow_id = current.workflow_id.clone();
    next.content = current.content.clone();
    next.sub_content = current.sub_content.clone();
    next.created_at = current.created_at;
    next.decision_deadline = current.decision_deadline;

    if !next.media.images.starts_with(&current.media.images)
        || !next.media.videos.starts_with(&current.media.videos)
    {
        tracing::warn!(
            story_id = %current.story_id,
            platform = %current.platform,
            "refusing mutation that removes media"
        );
        return None;
    }

    next.updated_at = Utc::now();
    Some(next)
}

/// One async mutex per key, created on first use.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<RequestKey, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &RequestKey) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::approval::Platform;
    use crate::models::notification::NotificationHandles;
    use chrono::Duration;

    fn record() -> ApprovalRequest {
        NewApprovalRequest {
            key: RequestKey::new("S1", Platform::Instagram),
            workflow_id: "wf".into(),
            content: "Headline".into(),
            sub_content: "Summary".into(),
            notification_handles: NotificationHandles::default(),
            created_at: Utc::now() - Duration::hours(1),
            timeout: Duration::minutes(30),
        }
        .into_record()
    }

    #[test]
    fn test_discard_writes_nothing() {
        let current = record();
        let out = apply_mutation(
            &current,
            Box::new(|r: &mut ApprovalRequest| {
                r.status = ApprovalStatus::Posted;
                Mutation::Discard
            }),
        );
        assert!(out.is_none());
    }

    #[test]
    fn test_commit_touches_updated_at_but_not_deadline() {
        let current = record();
        let out = apply_mutation(
            &current,
            Box::new(|r: &mut ApprovalRequest| {
                r.status = ApprovalStatus::Approved;
                r.decision_deadline = Utc::now() + Duration::days(1);
                r.content = "rewritten".into();
                Mutation::Commit
            }),
        )
        .unwrap();
        assert_eq!(out.status, ApprovalStatus::Approved);
        assert_eq!(out.decision_deadline, current.decision_deadline);
        assert_eq!(out.content, "Headline");
        assert!(out.updated_at > current.updated_at);
    }

    #[test]
    fn test_media_never_shrinks() {
        let mut current = record();
        current.media.images.push("https://cdn/a.jpg".into());
        let out = apply_mutation(
            &current,
            Box::new(|r: &mut ApprovalRequest| {
                r.media.images.clear();
                Mutation::Commit
            }),
        );
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_keyed_locks_serialize_same_key() {
        let locks = Arc::new(KeyedLocks::new());
        let key = RequestKey::new("S1", Platform::Twitter);
        let guard = locks.acquire(&key).await;

        let other = RequestKey::new("S1", Platform::Youtube);
        // A different key is not blocked.
        let _g2 = locks.acquire(&other).await;

        let locks2 = locks.clone();
        let key2 = key.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.acquire(&key2).await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }
}
