use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use super::Notifier;
use crate::models::notification::{Notice, NotificationHandles, StoryAnnouncement};

// ── Webhook Event Types ───────────────────────────────────────

/// A structured event payload sent to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Event type identifier, e.g. "story_created", "posted".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    pub story_id: String,
    /// Absent for story-level events.
    pub platform: Option<String>,
    pub workflow_id: String,
    pub details: serde_json::Value,
}

impl WebhookEvent {
    pub fn story_created(story: &StoryAnnouncement) -> Self {
        Self {
            event_type: "story_created".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            story_id: story.story_id.clone(),
            platform: None,
            workflow_id: story.workflow_id.clone(),
            details: serde_json::json!({
                "headline": story.headline,
                "platforms": story.platforms,
            }),
        }
    }

    pub fn from_notice(notice: &Notice) -> Self {
        Self {
            event_type: notice.kind.as_str().to_string(),
            timestamp: notice.at.to_rfc3339(),
            story_id: notice.key.story_id.clone(),
            platform: Some(notice.key.platform.as_str().to_string()),
            workflow_id: notice.workflow_id.clone(),
            details: serde_json::json!({
                "message": notice.text(),
                "detail": notice.detail,
                "handle": notice.handle,
            }),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// HMAC-SHA256 of `payload` as `sha256=<lowercase hex>`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid hmac key: {}", e))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Constant-time check of a `sha256=<hex>` signature header.
pub fn verify_signature(secret: &str, payload: &[u8], provided: &str) -> bool {
    match sign_payload(secret, payload) {
        Ok(expected) => expected.as_bytes().ct_eq(provided.trim().as_bytes()).into(),
        Err(_) => false,
    }
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Dispatches webhook events to the configured URLs.
/// Supports:
/// - HMAC-SHA256 signing (X-Pressgate-Signature header)
/// - Up to 3 retries with exponential back-off (1s → 5s → 25s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
    signing_secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, signing_secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Pressgate-Webhook/1.0")
            .build()?;
        Ok(Self {
            client,
            urls,
            signing_secret,
        })
    }

    /// Send a webhook event to a single URL with retry.
    ///
    /// When a signing secret is configured the body is signed with
    /// HMAC-SHA256. Returns `Ok(())` if delivery succeeded on any attempt.
    pub async fn send(&self, url: &str, event: &WebhookEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = match &self.signing_secret {
            Some(s) => Some(sign_payload(s, &payload)?),
            None => None,
        };

        let backoff_secs: &[u64] = &[0, 1, 5, 25];

        for (attempt, &delay) in backoff_secs.iter().enumerate() {
            if delay > 0 {
                debug!(
                    url,
                    attempt,
                    delay_secs = delay,
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-pressgate-delivery-id", &delivery_id)
                .header("x-pressgate-timestamp", &timestamp)
                .header("x-pressgate-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-pressgate-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        "webhook delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "webhook delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        Err(anyhow::anyhow!("webhook delivery failed after 3 retries: {}", url))
    }

    /// Dispatch an event to all configured URLs (fire-and-forget).
    ///
    /// Each URL is attempted independently with retry; a slow or dead
    /// endpoint never holds up the caller.
    pub fn dispatch(&self, event: WebhookEvent) {
        if self.urls.is_empty() {
            return;
        }

        let notifier = self.clone();
        tokio::spawn(async move {
            for url in &notifier.urls {
                if let Err(e) = notifier.send(url, &event).await {
                    warn!(url, error = %e, "webhook dispatch ultimately failed");
                }
            }
        });
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn announce(&self, story: &StoryAnnouncement) -> Result<NotificationHandles> {
        self.dispatch(WebhookEvent::story_created(story));
        Ok(NotificationHandles::default())
    }

    async fn notify(&self, notice: &Notice) -> Result<()> {
        self.dispatch(WebhookEvent::from_notice(notice));
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::approval::{NewApprovalRequest, Platform, RequestKey};
    use crate::models::notification::NoticeKind;

    fn posted_notice() -> Notice {
        let record = NewApprovalRequest {
            key: RequestKey::new("S4", Platform::Instagram),
            workflow_id: "daily_1".into(),
            content: "Headline".into(),
            sub_content: String::new(),
            notification_handles: NotificationHandles::default(),
            created_at: chrono::Utc::now(),
            timeout: chrono::Duration::minutes(30),
        }
        .into_record();
        Notice::for_request(NoticeKind::Posted, &record).with_detail("post-123")
    }

    #[test]
    fn test_event_from_notice() {
        let event = WebhookEvent::from_notice(&posted_notice());
        assert_eq!(event.event_type, "posted");
        assert_eq!(event.story_id, "S4");
        assert_eq!(event.platform.as_deref(), Some("instagram"));
        assert_eq!(event.details["detail"], "post-123");
    }

    #[test]
    fn test_story_created_event_has_no_platform() {
        let event = WebhookEvent::story_created(&StoryAnnouncement {
            story_id: "S1".into(),
            workflow_id: "wf".into(),
            headline: "h".into(),
            platforms: vec![Platform::Twitter],
        });
        assert_eq!(event.event_type, "story_created");
        assert!(event.platform.is_none());
        assert_eq!(event.details["platforms"][0], "twitter");
    }

    #[test]
    fn test_hmac_signature_deterministic() {
        let sig1 = sign_payload("secret123", b"payload").unwrap();
        let sig2 = sign_payload("secret123", b"payload").unwrap();
        assert_eq!(sig1, sig2);
        assert!(sig1.starts_with("sha256="));
    }

    #[test]
    fn test_hmac_signature_different_secret() {
        let sig1 = sign_payload("secret1", b"payload").unwrap();
        let sig2 = sign_payload("secret2", b"payload").unwrap();
        assert_ne!(sig1, sig2);
    }

    #[test]
    fn test_verify_signature() {
        let sig = sign_payload("s3cret", b"{\"a\":1}").unwrap();
        assert!(verify_signature("s3cret", b"{\"a\":1}", &sig));
        assert!(!verify_signature("s3cret", b"{\"a\":2}", &sig));
        assert!(!verify_signature("other", b"{\"a\":1}", &sig));
        assert!(!verify_signature("s3cret", b"{\"a\":1}", ""));
    }
}
