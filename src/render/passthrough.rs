use async_trait::async_trait;

use super::MediaRenderer;

/// No render service: overlays keep the original image and generation
/// always fails, so media-less records end up FAILED instead of posting bare.
#[derive(Debug, Clone, Default)]
pub struct PassthroughRenderer;

#[async_trait]
impl MediaRenderer for PassthroughRenderer {
    async fn overlay_headline(&self, image: &str, _headline: &str) -> anyhow::Result<String> {
        Ok(image.to_string())
    }

    async fn generate(&self, _headline: &str, _summary: &str) -> anyhow::Result<String> {
        anyhow::bail!("no render service configured")
    }
}
