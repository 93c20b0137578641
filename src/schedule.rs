//! Persisted harvest schedule: how often the external harvester runs and the
//! daily window in which it must stay quiet.

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::errors::ScheduleError;

pub const MIN_RUN_INTERVAL_SECS: u64 = 60;
pub const SETTINGS_FILE: &str = "scheduler_config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub run_interval_secs: u64,
    /// `HH:MM` in the configured offset.
    pub exclusion_start: String,
    pub exclusion_end: String,
    pub enabled: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            run_interval_secs: 10_800,
            exclusion_start: "00:00".into(),
            exclusion_end: "08:00".into(),
            enabled: true,
        }
    }
}

fn parse_hhmm(value: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ScheduleError::Invalid(format!("{:?} is not a HH:MM time", value)))
}

/// Parse `+HH:MM` / `-HH:MM`.
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset, ScheduleError> {
    let invalid = || ScheduleError::Invalid(format!("{:?} is not a +HH:MM offset", value));
    let value = value.trim();
    let (sign, rest) = match value.chars().next() {
        Some('+') => (1, &value[1..]),
        Some('-') => (-1, &value[1..]),
        _ => return Err(invalid()),
    };
    let (h, m) = rest.split_once(':').ok_or_else(invalid)?;
    let h: i32 = h.parse().map_err(|_| invalid())?;
    let m: i32 = m.parse().map_err(|_| invalid())?;
    if !(0..=14).contains(&h) || !(0..60).contains(&m) {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60)).ok_or_else(invalid)
}

impl ScheduleSettings {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.run_interval_secs < MIN_RUN_INTERVAL_SECS {
            return Err(ScheduleError::Invalid(format!(
                "run interval must be at least {} seconds",
                MIN_RUN_INTERVAL_SECS
            )));
        }
        parse_hhmm(&self.exclusion_start)?;
        parse_hhmm(&self.exclusion_end)?;
        Ok(())
    }

    /// True when the harvester must not run at `now`. A disabled schedule
    /// is always "in the window". Bounds are inclusive at minute precision
    /// and a start later than the end wraps past midnight.
    pub fn is_within_exclusion_window(&self, now: DateTime<Utc>, offset: FixedOffset) -> bool {
        if !self.enabled {
            return true;
        }
        let (start, end) = match (parse_hhmm(&self.exclusion_start), parse_hhmm(&self.exclusion_end)) {
            (Ok(s), Ok(e)) => (s, e),
            _ => {
                tracing::warn!("unparseable exclusion window, treating as not excluded");
                return false;
            }
        };
        let local = now.with_timezone(&offset).time();
        if start > end {
            local >= start || local <= end
        } else {
            start <= local && local <= end
        }
    }
}

/// Settings file plus the in-memory copy served to readers.
pub struct ScheduleStore {
    path: PathBuf,
    offset: FixedOffset,
    current: RwLock<ScheduleSettings>,
}

impl ScheduleStore {
    /// Load `{dir}/scheduler_config.json`. Missing or corrupt files fall
    /// back to defaults.
    pub async fn load(dir: impl AsRef<Path>, offset: FixedOffset) -> Result<Self, ScheduleError> {
        tokio::fs::create_dir_all(dir.as_ref()).await?;
        let path = dir.as_ref().join(SETTINGS_FILE);

        let settings = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<ScheduleSettings>(&bytes) {
                Ok(s) if s.validate().is_ok() => s,
                Ok(_) | Err(_) => {
                    tracing::warn!(path = %path.display(), "invalid schedule settings, using defaults");
                    ScheduleSettings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ScheduleSettings::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            offset,
            current: RwLock::new(settings),
        })
    }

    pub async fn get(&self) -> ScheduleSettings {
        self.current.read().await.clone()
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub async fn is_within_exclusion_window(&self, now: DateTime<Utc>) -> bool {
        self.current
            .read()
            .await
            .is_within_exclusion_window(now, self.offset)
    }

    /// Validate, persist, then publish the new settings.
    pub async fn replace(&self, settings: ScheduleSettings) -> Result<ScheduleSettings, ScheduleError> {
        settings.validate()?;
        let mut current = self.current.write().await;
        self.persist(&settings).await?;
        *current = settings.clone();
        tracing::info!(
            run_interval_secs = settings.run_interval_secs,
            exclusion_start = %settings.exclusion_start,
            exclusion_end = %settings.exclusion_end,
            enabled = settings.enabled,
            "schedule updated"
        );
        Ok(settings)
    }

    pub async fn set_frequency(&self, secs: u64) -> Result<ScheduleSettings, ScheduleError> {
        let mut next = self.get().await;
        next.run_interval_secs = secs;
        self.replace(next).await
    }

    pub async fn set_exclusion(&self, start: &str, end: &str) -> Result<ScheduleSettings, ScheduleError> {
        let mut next = self.get().await;
        next.exclusion_start = parse_hhmm(start)?.format("%H:%M").to_string();
        next.exclusion_end = parse_hhmm(end)?.format("%H:%M").to_string();
        self.replace(next).await
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<ScheduleSettings, ScheduleError> {
        let mut next = self.get().await;
        next.enabled = enabled;
        self.replace(next).await
    }

    async fn persist(&self, settings: &ScheduleSettings) -> Result<(), ScheduleError> {
        let bytes = serde_json::to_vec_pretty(settings)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
