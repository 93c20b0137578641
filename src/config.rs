use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

use crate::jobs::Pacing;
use crate::models::approval::Platform;
use crate::schedule::parse_utc_offset;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Root for the file store and the schedule settings.
    pub data_dir: PathBuf,
    /// When set, requests live in Postgres instead of files.
    pub database_url: Option<String>,
    pub approval_timeout: chrono::Duration,
    pub timeout_check_interval: Duration,
    pub pacing: Pacing,
    pub platforms: Vec<Platform>,
    pub max_media: usize,
    pub session_ttl: Duration,
    pub admin_key: Option<String>,
    pub slack_webhook_url: Option<String>,
    /// Comma-separated list of webhook URLs to notify on lifecycle events.
    pub webhook_urls: Vec<String>,
    pub webhook_secret: Option<String>,
    /// Required HMAC secret for inbound media webhooks, if set.
    pub media_webhook_secret: Option<String>,
    /// Unset → dry-run publisher.
    pub publish_url: Option<String>,
    /// Unset → passthrough renderer.
    pub render_url: Option<String>,
    pub schedule_offset: FixedOffset,
    pub json_logs: bool,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match var(name) {
        Some(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {:?}", name, v)),
        None => Ok(default),
    }
}

fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_env()
}

/// Build the config from the process environment without reading `.env`.
pub fn from_env() -> anyhow::Result<Config> {
    let timeout_minutes: i64 = parsed("PRESSGATE_APPROVAL_TIMEOUT_MINUTES", 30)?;
    if timeout_minutes <= 0 {
        anyhow::bail!("PRESSGATE_APPROVAL_TIMEOUT_MINUTES must be positive");
    }

    let min_delay: u64 = parsed("PRESSGATE_MIN_POST_DELAY_SECS", 600)?;
    let max_delay: u64 = parsed("PRESSGATE_MAX_POST_DELAY_SECS", 1500)?;
    if min_delay > max_delay {
        anyhow::bail!(
            "PRESSGATE_MIN_POST_DELAY_SECS ({}) exceeds PRESSGATE_MAX_POST_DELAY_SECS ({})",
            min_delay,
            max_delay
        );
    }

    let platforms = match var("PRESSGATE_PLATFORMS") {
        Some(v) => list(&v)
            .iter()
            .map(|p| p.parse::<Platform>().map_err(anyhow::Error::msg))
            .collect::<anyhow::Result<Vec<_>>>()?,
        None => Platform::ALL.to_vec(),
    };
    if platforms.is_empty() {
        anyhow::bail!("PRESSGATE_PLATFORMS lists no platforms");
    }

    let offset = var("PRESSGATE_SCHEDULE_UTC_OFFSET").unwrap_or_else(|| "+05:30".into());

    Ok(Config {
        port: parsed("PRESSGATE_PORT", 8080)?,
        data_dir: var("PRESSGATE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data")),
        database_url: var("DATABASE_URL"),
        approval_timeout: chrono::Duration::minutes(timeout_minutes),
        timeout_check_interval: Duration::from_secs(parsed("PRESSGATE_TIMEOUT_CHECK_SECS", 60)?),
        pacing: Pacing {
            poll_interval: Duration::from_secs(parsed("PRESSGATE_POLL_INTERVAL_SECS", 120)?),
            min_delay: Duration::from_secs(min_delay),
            max_delay: Duration::from_secs(max_delay),
        },
        platforms,
        max_media: parsed("PRESSGATE_MAX_MEDIA", 10)?,
        session_ttl: Duration::from_secs(parsed("PRESSGATE_SESSION_TTL_SECS", 1800)?),
        admin_key: var("PRESSGATE_ADMIN_KEY"),
        slack_webhook_url: var("PRESSGATE_SLACK_WEBHOOK_URL"),
        webhook_urls: var("PRESSGATE_WEBHOOK_URLS")
            .map(|v| list(&v))
            .unwrap_or_default(),
        webhook_secret: var("PRESSGATE_WEBHOOK_SECRET"),
        media_webhook_secret: var("PRESSGATE_MEDIA_WEBHOOK_SECRET"),
        publish_url: var("PRESSGATE_PUBLISH_URL"),
        render_url: var("PRESSGATE_RENDER_URL"),
        schedule_offset: parse_utc_offset(&offset)?,
        json_logs: var("PRESSGATE_LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
    })
}
