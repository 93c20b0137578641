use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::notification::NotificationHandles;

/// Target platforms. The set is fixed; a story fans out to at most these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Instagram,
    Youtube,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Twitter, Platform::Instagram, Platform::Youtube];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Instagram => "instagram",
            Platform::Youtube => "youtube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "twitter" | "x" => Ok(Platform::Twitter),
            "instagram" => Ok(Platform::Instagram),
            "youtube" => Ok(Platform::Youtube),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Failed,
    Posted,
}

impl ApprovalStatus {
    /// `REJECTED`, `FAILED` and `POSTED` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalStatus::Rejected | ApprovalStatus::Failed | ApprovalStatus::Posted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Failed => "FAILED",
            ApprovalStatus::Posted => "POSTED",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(ApprovalStatus::Pending),
            "APPROVED" => Ok(ApprovalStatus::Approved),
            "REJECTED" => Ok(ApprovalStatus::Rejected),
            "FAILED" => Ok(ApprovalStatus::Failed),
            "POSTED" => Ok(ApprovalStatus::Posted),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".tiff"];
const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".avi", ".mov", ".mkv", ".webm", ".flv", ".wmv", ".m4v"];

impl MediaKind {
    /// Classify an uploaded file by extension. Anything else is a plain
    /// document and is not accepted as post media.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// Webhook `resource_type` values: "video" is a video, everything else an image.
    pub fn from_resource_type(resource_type: &str) -> Self {
        if resource_type.eq_ignore_ascii_case("video") {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

/// Identity of one unit of work: a story on one platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub story_id: String,
    pub platform: Platform,
}

impl RequestKey {
    pub fn new(story_id: impl Into<String>, platform: Platform) -> Self {
        Self {
            story_id: story_id.into(),
            platform,
        }
    }

    /// Story ids become part of storage unit names, so only a conservative
    /// character set is accepted.
    pub fn is_valid(&self) -> bool {
        !self.story_id.is_empty()
            && self.story_id.len() <= 128
            && self
                .story_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !self.story_id.starts_with('.')
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.story_id, self.platform)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaLists {
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
}

impl MediaLists {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.videos.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len() + self.videos.len()
    }

    pub fn push(&mut self, kind: MediaKind, reference: String) {
        match kind {
            MediaKind::Image => self.images.push(reference),
            MediaKind::Video => self.videos.push(reference),
        }
    }
}

/// Persisted record; one per (story, platform).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub story_id: String,
    pub platform: Platform,
    pub workflow_id: String,
    pub content: String,
    #[serde(default)]
    pub sub_content: String,
    #[serde(flatten)]
    pub media: MediaLists,
    #[serde(default)]
    pub notification_handles: NotificationHandles,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub decision_deadline: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.story_id.clone(), self.platform)
    }

    /// Undecided and past its deadline at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && self.decision_deadline <= now
    }
}

/// Input for `RequestStore::create`. The deadline is derived once here and
/// never recomputed.
#[derive(Debug, Clone)]
pub struct NewApprovalRequest {
    pub key: RequestKey,
    pub workflow_id: String,
    pub content: String,
    pub sub_content: String,
    pub notification_handles: NotificationHandles,
    pub created_at: DateTime<Utc>,
    pub timeout: Duration,
}

impl NewApprovalRequest {
    pub fn into_record(self) -> ApprovalRequest {
        ApprovalRequest {
            story_id: self.key.story_id,
            platform: self.key.platform,
            workflow_id: self.workflow_id,
            content: self.content,
            sub_content: self.sub_content,
            media: MediaLists::default(),
            notification_handles: self.notification_handles,
            status: ApprovalStatus::Pending,
            created_at: self.created_at,
            decision_deadline: self.created_at + self.timeout,
            updated_at: self.created_at,
        }
    }
}
