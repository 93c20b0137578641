//! Media-rendering boundary: headline overlay on the first image and
//! fallback image generation for records that reach publishing with no media.

pub mod http;
pub mod passthrough;

use async_trait::async_trait;

#[async_trait]
pub trait MediaRenderer: Send + Sync {
    /// Returns the hosted reference of `image` with `headline` burned in.
    async fn overlay_headline(&self, image: &str, headline: &str) -> anyhow::Result<String>;

    /// Synthesizes an image for a story and returns its hosted reference.
    async fn generate(&self, headline: &str, summary: &str) -> anyhow::Result<String>;
}
