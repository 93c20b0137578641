use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use super::Notifier;
use crate::models::notification::{Notice, NoticeKind, NotificationHandles, StoryAnnouncement};

#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

const SLACK_TIMEOUT: Duration = Duration::from_secs(10);

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> anyhow::Result<Self> {
        Self::with_timeout(webhook_url, SLACK_TIMEOUT)
    }

    /// Every Slack call is bounded by `timeout`; the engine awaits notices inline.
    pub fn with_timeout(webhook_url: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url,
        })
    }

    async fn post(&self, text: String) -> anyhow::Result<()> {
        let url = match &self.webhook_url {
            Some(u) => u,
            None => {
                tracing::debug!("No Slack webhook URL configured, skipping notification");
                return Ok(());
            }
        };

        let resp = self
            .client
            .post(url)
            .json(&SlackMessage { text })
            .send()
            .await
            .context("failed to send slack notification")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("slack returned error: status={}, body={}", status, body);
        }
        Ok(())
    }
}

fn announcement_text(story: &StoryAnnouncement) -> String {
    let platforms: Vec<&str> = story.platforms.iter().map(|p| p.as_str()).collect();
    format!(
        "*Approval Required* for story `{}`\n\n{}\n\nPlatforms: {}\nRun `pressgate decide approve_all {}` or `pressgate decide reject_all {}`",
        story.story_id,
        story.headline,
        platforms.join(", "),
        story.story_id,
        story.story_id
    )
}

fn notice_text(notice: &Notice) -> String {
    let marker = match notice.kind {
        NoticeKind::Approved | NoticeKind::AutoApproved | NoticeKind::Posted => ":white_check_mark:",
        NoticeKind::Rejected | NoticeKind::Failed => ":x:",
        NoticeKind::FallbackStarted => ":hourglass:",
    };
    format!("{} {}", marker, notice.text())
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn announce(&self, story: &StoryAnnouncement) -> anyhow::Result<NotificationHandles> {
        self.post(announcement_text(story)).await?;
        tracing::info!(story_id = %story.story_id, "Sent Slack announcement");
        // Incoming webhooks don't return a message id to update later.
        Ok(NotificationHandles::default())
    }

    async fn notify(&self, notice: &Notice) -> anyhow::Result<()> {
        self.post(notice_text(notice)).await
    }
}

#[derive(Serialize)]
struct SlackMessage {
    text: String,
}
