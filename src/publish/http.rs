use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use super::{PublishReceipt, PublishRequest, Publisher};

/// Posts to an external publishing service at `{base_url}/{platform}`.
/// The service owns the per-platform credentials and API calls.
#[derive(Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPublisher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Pressgate-Publisher/1.0")
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, request: &PublishRequest) -> anyhow::Result<PublishReceipt> {
        let url = format!("{}/{}", self.base_url, request.platform);
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("publish request to {} failed", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("publisher returned error: status={}, body={}", status, body);
        }

        resp.json::<PublishReceipt>()
            .await
            .context("publisher returned an unreadable receipt")
    }
}
