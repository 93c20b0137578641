use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::MediaRenderer;

/// Client for an external render service exposing `POST /overlay` and
/// `POST /generate`, both answering `{"url": "..."}`.
#[derive(Clone)]
pub struct HttpRenderer {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct OverlayBody<'a> {
    image_url: &'a str,
    headline: &'a str,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    headline: &'a str,
    summary: &'a str,
}

#[derive(Deserialize)]
struct Rendered {
    url: String,
}

impl HttpRenderer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Pressgate-Render/1.0")
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn call<B: Serialize + Sync>(&self, route: &str, body: &B) -> anyhow::Result<String> {
        let url = format!("{}/{}", self.base_url, route);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("render request to {} failed", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("render service returned error: status={}, body={}", status, body);
        }

        let rendered: Rendered = resp.json().await.context("unreadable render response")?;
        if rendered.url.trim().is_empty() {
            anyhow::bail!("render service returned an empty url");
        }
        Ok(rendered.url)
    }
}

#[async_trait]
impl MediaRenderer for HttpRenderer {
    async fn overlay_headline(&self, image: &str, headline: &str) -> anyhow::Result<String> {
        self.call(
            "overlay",
            &OverlayBody {
                image_url: image,
                headline,
            },
        )
        .await
    }

    async fn generate(&self, headline: &str, summary: &str) -> anyhow::Result<String> {
        self.call("generate", &GenerateBody { headline, summary }).await
    }
}
