use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{StoreError, WorkflowError};
use crate::models::approval::{NewApprovalRequest, Platform, RequestKey};
use crate::models::notification::{NotificationHandles, StoryAnnouncement};
use crate::notification::Notifier;
use crate::store::RequestStore;

/// A generated story handed over for review.
#[derive(Debug, Clone, Deserialize)]
pub struct StorySubmission {
    #[serde(default)]
    pub story_id: Option<String>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub sub_content: String,
    /// Defaults to the configured platform list.
    #[serde(default)]
    pub platforms: Option<Vec<Platform>>,
    /// Handles already issued by the caller's own transport.
    #[serde(default)]
    pub notification_handles: NotificationHandles,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntakeReceipt {
    pub story_id: String,
    pub workflow_id: String,
    pub created: Vec<RequestKey>,
    pub already_exists: Vec<RequestKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

pub struct Intake {
    store: Arc<dyn RequestStore>,
    notifier: Arc<dyn Notifier>,
    default_platforms: Vec<Platform>,
    timeout: Duration,
}

impl Intake {
    pub fn new(
        store: Arc<dyn RequestStore>,
        notifier: Arc<dyn Notifier>,
        default_platforms: Vec<Platform>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            default_platforms,
            timeout,
        }
    }

    /// Create one PENDING request per target platform. Keys that already
    /// exist are reported, not failed.
    pub async fn submit(&self, story: StorySubmission) -> Result<IntakeReceipt, WorkflowError> {
        if story.content.trim().is_empty() {
            return Err(WorkflowError::InvalidEvent("story content is empty".into()));
        }

        let now = Utc::now();
        let story_id = story
            .story_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| generated_story_id(now));
        let workflow_id = story
            .workflow_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("adhoc_{}", now.format("%Y%m%d_%H%M")));

        let mut platforms: Vec<Platform> = Vec::new();
        for p in story.platforms.unwrap_or_else(|| self.default_platforms.clone()) {
            if !platforms.contains(&p) {
                platforms.push(p);
            }
        }
        if platforms.is_empty() {
            return Err(WorkflowError::InvalidEvent("no target platforms".into()));
        }

        let keys: Vec<RequestKey> = platforms
            .iter()
            .map(|p| RequestKey::new(story_id.clone(), *p))
            .collect();
        if let Some(bad) = keys.iter().find(|k| !k.is_valid()) {
            return Err(StoreError::InvalidKey(bad.clone()).into());
        }

        let mut fresh = Vec::new();
        for key in &keys {
            match self.store.get(key).await {
                Ok(_) => {}
                Err(StoreError::NotFound(_)) => fresh.push(key.platform),
                Err(e) => return Err(e.into()),
            }
        }

        let mut handles = NotificationHandles::default();
        if !fresh.is_empty() {
            let announcement = StoryAnnouncement {
                story_id: story_id.clone(),
                workflow_id: workflow_id.clone(),
                headline: story.content.lines().next().unwrap_or_default().to_string(),
                platforms: fresh,
            };
            match self.notifier.announce(&announcement).await {
                Ok(h) => handles = h,
                Err(e) => tracing::warn!(story_id = %story_id, error = %e, "story announcement failed"),
            }
        }
        handles.0.extend(story.notification_handles.0);

        let mut receipt = IntakeReceipt {
            story_id: story_id.clone(),
            workflow_id: workflow_id.clone(),
            created: Vec::new(),
            already_exists: Vec::new(),
        };
        for key in keys {
            let new = NewApprovalRequest {
                key: key.clone(),
                workflow_id: workflow_id.clone(),
                content: story.content.clone(),
                sub_content: story.sub_content.clone(),
                notification_handles: handles.clone(),
                created_at: now,
                timeout: self.timeout,
            };
            match self.store.create(new).await {
                Ok(_) => receipt.created.push(key),
                Err(StoreError::AlreadyExists(key)) => {
                    tracing::info!(story_id = %key.story_id, platform = %key.platform, "request already exists");
                    receipt.already_exists.push(key);
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            story_id = %story_id,
            workflow_id = %workflow_id,
            created = receipt.created.len(),
            "story submitted for approval"
        );
        Ok(receipt)
    }

    /// Per-status counts of the requests created by one run.
    pub async fn workflow_summary(&self, workflow_id: &str) -> Result<WorkflowSummary, WorkflowError> {
        let wanted = workflow_id.to_string();
        let records = self.store.list(&|r| r.workflow_id == wanted).await?;

        let mut by_status = BTreeMap::new();
        for r in &records {
            *by_status.entry(r.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(WorkflowSummary {
            workflow_id: workflow_id.to_string(),
            total: records.len(),
            by_status,
        })
    }
}

/// `story_<unix-seconds>_<8 hex>`; unique for submissions within the same second.
fn generated_story_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("story_{}_{}", now.timestamp(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::models::approval::ApprovalStatus;
    use crate::models::notification::Notice;
    use crate::store::memory::MemoryStore;

    struct Announcer;

    #[async_trait]
    impl Notifier for Announcer {
        async fn announce(&self, story: &StoryAnnouncement) -> anyhow::Result<NotificationHandles> {
            let mut h = NotificationHandles::default();
            for p in &story.platforms {
                h.insert(p.as_str(), format!("msg-{}", p));
            }
            Ok(h)
        }

        async fn notify(&self, _notice: &Notice) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn intake(store: Arc<MemoryStore>) -> Intake {
        Intake::new(
            store,
            Arc::new(Announcer),
            vec![Platform::Twitter, Platform::Instagram],
            Duration::minutes(30),
        )
    }

    fn story(id: Option<&str>) -> StorySubmission {
        StorySubmission {
            story_id: id.map(String::from),
            workflow_id: Some("daily_20260101_0800".into()),
            content: "Markets rally\nDetails follow".into(),
            sub_content: "summary".into(),
            platforms: None,
            notification_handles: NotificationHandles::default(),
        }
    }

    #[tokio::test]
    async fn test_submit_creates_one_request_per_platform() {
        let store = Arc::new(MemoryStore::new());
        let receipt = intake(store.clone()).submit(story(Some("S1"))).await.unwrap();
        assert_eq!(receipt.created.len(), 2);
        assert!(receipt.already_exists.is_empty());

        let record = store.get(&RequestKey::new("S1", Platform::Twitter)).await.unwrap();
        assert_eq!(record.status, ApprovalStatus::Pending);
        assert_eq!(record.notification_handles.for_platform(Platform::Twitter), Some("msg-twitter"));
        assert_eq!(record.decision_deadline - record.created_at, Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_resubmission_reports_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let intake = intake(store.clone());
        intake.submit(story(Some("S1"))).await.unwrap();

        let mut again = story(Some("S1"));
        again.platforms = Some(vec![Platform::Twitter, Platform::Youtube, Platform::Youtube]);
        let receipt = intake.submit(again).await.unwrap();
        assert_eq!(receipt.created, vec![RequestKey::new("S1", Platform::Youtube)]);
        assert_eq!(receipt.already_exists, vec![RequestKey::new("S1", Platform::Twitter)]);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_story_id_is_generated() {
        let store = Arc::new(MemoryStore::new());
        let intake = intake(store.clone());
        let first = intake.submit(story(None)).await.unwrap();
        let second = intake.submit(story(None)).await.unwrap();

        assert!(first.story_id.starts_with("story_"));
        assert_ne!(first.story_id, second.story_id);
        assert_eq!(second.created.len(), 2);
        assert!(second.already_exists.is_empty());
        assert_eq!(store.len(), 4);
        assert!(RequestKey::new(first.story_id, Platform::Twitter).is_valid());
    }

    #[tokio::test]
    async fn test_bad_story_id_and_empty_content() {
        let store = Arc::new(MemoryStore::new());
        let intake = intake(store);
        assert!(intake.submit(story(Some("a/b"))).await.is_err());
        let mut empty = story(Some("S9"));
        empty.content = "  ".into();
        assert!(matches!(
            intake.submit(empty).await,
            Err(WorkflowError::InvalidEvent(_))
        ));
    }

    #[tokio::test]
    async fn test_workflow_summary_counts_statuses() {
        let store = Arc::new(MemoryStore::new());
        let intake = intake(store.clone());
        intake.submit(story(Some("S1"))).await.unwrap();
        store
            .update_status(&RequestKey::new("S1", Platform::Twitter), ApprovalStatus::Rejected)
            .await
            .unwrap();

        let summary = intake.workflow_summary("daily_20260101_0800").await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_status.get("REJECTED"), Some(&1));
        assert_eq!(summary.by_status.get("PENDING"), Some(&1));
    }
}
