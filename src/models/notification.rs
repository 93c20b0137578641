use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::approval::{ApprovalRequest, Platform, RequestKey};

/// Opaque references to outward messages issued for a story (e.g. chat
/// message ids keyed by platform), kept so later notices can update them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationHandles(pub BTreeMap<String, String>);

impl NotificationHandles {
    pub fn for_platform(&self, platform: Platform) -> Option<&str> {
        self.0.get(platform.as_str()).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, handle: impl Into<String>) {
        self.0.insert(name.into(), handle.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Approved,
    Rejected,
    AutoApproved,
    FallbackStarted,
    Posted,
    Failed,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::Approved => "approved",
            NoticeKind::Rejected => "rejected",
            NoticeKind::AutoApproved => "auto_approved",
            NoticeKind::FallbackStarted => "fallback_started",
            NoticeKind::Posted => "posted",
            NoticeKind::Failed => "failed",
        }
    }

    pub fn headline(&self, platform: Platform) -> String {
        match self {
            NoticeKind::Approved => format!("Approved & scheduled for posting to {}", platform),
            NoticeKind::Rejected => format!("Rejected {}", platform),
            NoticeKind::AutoApproved => format!("Timeout! Auto-approving {}", platform),
            NoticeKind::FallbackStarted => {
                format!("No media found. Generating an image for {}", platform)
            }
            NoticeKind::Posted => format!("Posted to {}", platform),
            NoticeKind::Failed => format!("Post to {} failed", platform),
        }
    }
}

/// One outward notification about a request.
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub key: RequestKey,
    pub workflow_id: String,
    pub handle: Option<String>,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn for_request(kind: NoticeKind, request: &ApprovalRequest) -> Self {
        Self {
            kind,
            key: request.key(),
            workflow_id: request.workflow_id.clone(),
            handle: request
                .notification_handles
                .for_platform(request.platform)
                .map(String::from),
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn text(&self) -> String {
        let mut text = format!("{} (Story {})", self.kind.headline(self.key.platform), self.key.story_id);
        if let Some(detail) = &self.detail {
            text.push_str(": ");
            text.push_str(detail);
        }
        text
    }
}

/// Announcement of a newly generated story, sent before its requests exist.
#[derive(Debug, Clone, Serialize)]
pub struct StoryAnnouncement {
    pub story_id: String,
    pub workflow_id: String,
    pub headline: String,
    pub platforms: Vec<Platform>,
}
