//! Outward-notification boundary.
//!
//! Delivery is best effort: a failed notice is logged and never fails or
//! blocks the state transition that produced it.

pub mod slack;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use crate::models::notification::{Notice, NotificationHandles, StoryAnnouncement};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell the outside world a story awaits review. Sinks that can address
    /// their message later return handles to store on the records.
    async fn announce(&self, _story: &StoryAnnouncement) -> anyhow::Result<NotificationHandles> {
        Ok(NotificationHandles::default())
    }

    async fn notify(&self, notice: &Notice) -> anyhow::Result<()>;
}

/// Forwards every notice to all configured sinks.
#[derive(Clone, Default)]
pub struct FanOutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanOutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Notifier for FanOutNotifier {
    async fn announce(&self, story: &StoryAnnouncement) -> anyhow::Result<NotificationHandles> {
        let mut handles = NotificationHandles::default();
        for sink in &self.sinks {
            match sink.announce(story).await {
                Ok(h) => handles.0.extend(h.0),
                Err(e) => {
                    tracing::warn!(story_id = %story.story_id, error = %e, "announcement failed")
                }
            }
        }
        Ok(handles)
    }

    async fn notify(&self, notice: &Notice) -> anyhow::Result<()> {
        let results = join_all(self.sinks.iter().map(|sink| sink.notify(notice))).await;
        let mut failed = 0usize;
        for e in results.into_iter().filter_map(Result::err) {
            failed += 1;
            tracing::warn!(
                story_id = %notice.key.story_id,
                platform = %notice.key.platform,
                kind = notice.kind.as_str(),
                error = %e,
                "notice delivery failed"
            );
        }
        if failed > 0 {
            anyhow::bail!("{} of {} notification sinks failed", failed, self.sinks.len());
        }
        Ok(())
    }
}

/// Upper bound on one `deliver` call across all sinks.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Send a notice and swallow the failure after logging it. A sink that does
/// not answer within [`DELIVERY_TIMEOUT`] is abandoned.
pub async fn deliver(notifier: &dyn Notifier, notice: Notice) {
    let error = match tokio::time::timeout(DELIVERY_TIMEOUT, notifier.notify(&notice)).await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("no answer within {}s", DELIVERY_TIMEOUT.as_secs()),
    };
    tracing::warn!(
        story_id = %notice.key.story_id,
        platform = %notice.key.platform,
        kind = notice.kind.as_str(),
        error = %error,
        "notification dropped"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::models::approval::{NewApprovalRequest, Platform, RequestKey};
    use crate::models::notification::NoticeKind;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<NoticeKind>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn announce(&self, _story: &StoryAnnouncement) -> anyhow::Result<NotificationHandles> {
            let mut h = NotificationHandles::default();
            h.insert("twitter", "msg-1");
            Ok(h)
        }

        async fn notify(&self, notice: &Notice) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(notice.kind);
            if self.fail {
                anyhow::bail!("sink down");
            }
            Ok(())
        }
    }

    fn notice() -> Notice {
        let record = NewApprovalRequest {
            key: RequestKey::new("S1", Platform::Twitter),
            workflow_id: "wf".into(),
            content: "Headline".into(),
            sub_content: String::new(),
            notification_handles: NotificationHandles::default(),
            created_at: chrono::Utc::now(),
            timeout: chrono::Duration::minutes(30),
        }
        .into_record();
        Notice::for_request(NoticeKind::Approved, &record)
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_sink_despite_failures() {
        let broken = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let healthy = Arc::new(Recorder::default());
        let fan = FanOutNotifier::new()
            .with(broken.clone())
            .with(healthy.clone());

        assert!(fan.notify(&notice()).await.is_err());
        assert_eq!(broken.seen.lock().unwrap().len(), 1);
        assert_eq!(healthy.seen.lock().unwrap().len(), 1);

        // deliver() never surfaces the failure
        deliver(&fan, notice()).await;
        assert_eq!(healthy.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_announce_merges_handles() {
        let fan = FanOutNotifier::new().with(Arc::new(Recorder::default()));
        let story = StoryAnnouncement {
            story_id: "S1".into(),
            workflow_id: "wf".into(),
            headline: "Headline".into(),
            platforms: vec![Platform::Twitter],
        };
        let handles = fan.announce(&story).await.unwrap();
        assert_eq!(handles.for_platform(Platform::Twitter), Some("msg-1"));
    }

    struct Stalled;

    #[async_trait]
    impl Notifier for Stalled {
        async fn notify(&self, _notice: &Notice) -> anyhow::Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_abandons_a_stalled_sink() {
        let started = tokio::time::Instant::now();
        deliver(&Stalled, notice()).await;
        assert!(started.elapsed() >= DELIVERY_TIMEOUT);
        assert!(started.elapsed() < DELIVERY_TIMEOUT * 2);
    }

    #[test]
    fn test_notice_text_mentions_story() {
        let text = notice().with_detail("ok").text();
        assert!(text.contains("Story S1"));
        assert!(text.ends_with(": ok"));
    }
}
