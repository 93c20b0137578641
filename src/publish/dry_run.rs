use async_trait::async_trait;

use super::{PublishReceipt, PublishRequest, Publisher};

/// Logs instead of posting. Used when no publish endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, request: &PublishRequest) -> anyhow::Result<PublishReceipt> {
        let post_id = format!("dry-run-{}", uuid::Uuid::new_v4());
        tracing::info!(
            story_id = %request.story_id,
            platform = %request.platform,
            images = request.images.len(),
            videos = request.videos.len(),
            post_id = %post_id,
            "dry run: post not sent"
        );
        Ok(PublishReceipt { post_id, url: None })
    }
}
