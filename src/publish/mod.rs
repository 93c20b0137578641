//! Publish boundary. One call per record; a failure is terminal and is
//! never retried here.

pub mod dry_run;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::approval::{ApprovalRequest, Platform};

/// Everything a platform needs to put one post live.
#[derive(Debug, Clone, Serialize)]
pub struct PublishRequest {
    pub story_id: String,
    pub platform: Platform,
    pub content: String,
    pub images: Vec<String>,
    pub videos: Vec<String>,
}

impl From<&ApprovalRequest> for PublishRequest {
    fn from(r: &ApprovalRequest) -> Self {
        Self {
            story_id: r.story_id.clone(),
            platform: r.platform,
            content: r.content.clone(),
            images: r.media.images.clone(),
            videos: r.media.videos.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub post_id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Any error, including a timeout with an unknown remote outcome, is
    /// reported to the caller as a failed publish.
    async fn publish(&self, request: &PublishRequest) -> anyhow::Result<PublishReceipt>;
}
