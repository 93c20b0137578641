//! Shared doubles and wiring for the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use pressgate::config::Config;
use pressgate::jobs::{Pacing, PostingScheduler};
use pressgate::metrics::WorkflowMetrics;
use pressgate::models::approval::{MediaKind, NewApprovalRequest, Platform, RequestKey};
use pressgate::models::notification::{Notice, NoticeKind, NotificationHandles};
use pressgate::notification::Notifier;
use pressgate::publish::{PublishReceipt, PublishRequest, Publisher};
use pressgate::render::MediaRenderer;
use pressgate::schedule::ScheduleStore;
use pressgate::store::memory::MemoryStore;
use pressgate::store::RequestStore;
use pressgate::workflow::runs::BatchRuns;
use pressgate::workflow::upload::UploadSessions;
use pressgate::workflow::{Intake, LifecycleEngine};
use pressgate::AppState;

pub const ADMIN_KEY: &str = "test-admin-key-0001";

#[derive(Default)]
pub struct Notices(Mutex<Vec<Notice>>);

#[async_trait]
impl Notifier for Notices {
    async fn notify(&self, notice: &Notice) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

impl Notices {
    pub fn kinds(&self) -> Vec<NoticeKind> {
        self.0.lock().unwrap().iter().map(|n| n.kind).collect()
    }

    pub fn count(&self, kind: NoticeKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

/// Overlay tags the reference; generation succeeds or fails on demand.
pub struct Renderer {
    pub generate_ok: bool,
}

#[async_trait]
impl MediaRenderer for Renderer {
    async fn overlay_headline(&self, image: &str, _headline: &str) -> anyhow::Result<String> {
        Ok(format!("{}?overlay=1", image))
    }

    async fn generate(&self, _headline: &str, _summary: &str) -> anyhow::Result<String> {
        if self.generate_ok {
            Ok("https://render.test/generated.jpg".into())
        } else {
            anyhow::bail!("render service unavailable")
        }
    }
}

/// Records every call with the (virtual) time it started.
#[derive(Default)]
pub struct Publishes {
    pub calls: Mutex<Vec<(tokio::time::Instant, PublishRequest)>>,
    /// How long each publish takes.
    pub latency: Duration,
    pub started: Notify,
}

#[async_trait]
impl Publisher for Publishes {
    async fn publish(&self, request: &PublishRequest) -> anyhow::Result<PublishReceipt> {
        self.calls
            .lock()
            .unwrap()
            .push((tokio::time::Instant::now(), request.clone()));
        self.started.notify_one();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(PublishReceipt {
            post_id: format!("post-{}-{}", request.story_id, request.platform),
            url: None,
        })
    }
}

impl Publishes {
    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<(String, Platform)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| (r.story_id.clone(), r.platform))
            .collect()
    }

    pub fn instants(&self) -> Vec<tokio::time::Instant> {
        self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }
}

pub struct Harness {
    pub engine: Arc<LifecycleEngine>,
    pub store: Arc<MemoryStore>,
    pub notices: Arc<Notices>,
    pub publishes: Arc<Publishes>,
}

pub fn harness(generate_ok: bool) -> Harness {
    harness_with(generate_ok, Publishes::default())
}

pub fn harness_with(generate_ok: bool, publishes: Publishes) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let notices = Arc::new(Notices::default());
    let publishes = Arc::new(publishes);
    let engine = Arc::new(LifecycleEngine::new(
        store.clone(),
        notices.clone(),
        Arc::new(Renderer { generate_ok }),
        publishes.clone(),
        Arc::new(WorkflowMetrics::new().unwrap()),
        10,
    ));
    Harness {
        engine,
        store,
        notices,
        publishes,
    }
}

pub async fn seed(
    store: &dyn RequestStore,
    story: &str,
    platform: Platform,
    created_at: DateTime<Utc>,
    timeout: chrono::Duration,
) -> RequestKey {
    let key = RequestKey::new(story, platform);
    store
        .create(NewApprovalRequest {
            key: key.clone(),
            workflow_id: "wf_test".into(),
            content: format!("Headline for {}\nbody", story),
            sub_content: "summary".into(),
            notification_handles: NotificationHandles::default(),
            created_at,
            timeout,
        })
        .await
        .unwrap();
    key
}

/// Seed an APPROVED record that already carries an image.
pub async fn seed_approved(
    store: &dyn RequestStore,
    story: &str,
    platform: Platform,
    created_at: DateTime<Utc>,
) -> RequestKey {
    let key = seed(store, story, platform, created_at, chrono::Duration::minutes(30)).await;
    store
        .append_media(&key, MediaKind::Image, format!("https://cdn.test/{}.jpg", story))
        .await
        .unwrap();
    store
        .update_status(&key, pressgate::models::approval::ApprovalStatus::Approved)
        .await
        .unwrap();
    key
}

pub fn pacing(poll: u64, min: u64, max: u64) -> Pacing {
    Pacing {
        poll_interval: Duration::from_secs(poll),
        min_delay: Duration::from_secs(min),
        max_delay: Duration::from_secs(max),
    }
}

pub fn test_config(data_dir: &std::path::Path) -> Config {
    Config {
        port: 0,
        data_dir: data_dir.to_path_buf(),
        database_url: None,
        approval_timeout: chrono::Duration::minutes(30),
        timeout_check_interval: Duration::from_secs(60),
        pacing: pacing(120, 600, 1500),
        platforms: Platform::ALL.to_vec(),
        max_media: 10,
        session_ttl: Duration::from_secs(1800),
        admin_key: Some(ADMIN_KEY.into()),
        slack_webhook_url: None,
        webhook_urls: vec![],
        webhook_secret: None,
        media_webhook_secret: None,
        publish_url: None,
        render_url: None,
        schedule_offset: chrono::FixedOffset::east_opt(0).unwrap(),
        json_logs: false,
    }
}

/// Full application state over an in-memory store.
pub async fn app_state(h: &Harness, config: Config) -> Arc<AppState> {
    let schedule = ScheduleStore::load(&config.data_dir, config.schedule_offset)
        .await
        .unwrap();
    Arc::new(AppState {
        engine: h.engine.clone(),
        intake: Intake::new(
            h.store.clone(),
            h.notices.clone(),
            config.platforms.clone(),
            config.approval_timeout,
        ),
        scheduler: PostingScheduler::new(h.engine.clone(), config.pacing),
        uploads: Arc::new(UploadSessions::new(config.session_ttl)),
        runs: Arc::new(BatchRuns::new(config.session_ttl)),
        schedule: Arc::new(schedule),
        config,
    })
}
