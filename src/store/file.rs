//! Directory-of-files backend.
//!
//! Layout: `{dir}/{story_id}_{platform}.json`, one record per file. Writes
//! go to `{file}.tmp`, are fsynced, then renamed over the target, so readers
//! only ever see a complete old or new record. The per-key lock lives in
//! this process; the directory must not be shared by two running services.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{apply_mutation, Filter, KeyedLocks, Locked, Mutator, RequestStore};
use crate::errors::StoreError;
use crate::models::approval::{ApprovalRequest, NewApprovalRequest, RequestKey};

pub struct FileStore {
    dir: PathBuf,
    locks: KeyedLocks,
}

impl FileStore {
    /// Open (and create if needed) the storage directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!(dir = %dir.display(), "file store opened");
        Ok(Self {
            dir,
            locks: KeyedLocks::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &RequestKey) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", key.story_id, key.platform))
    }

    async fn read_record(path: &Path) -> Result<Option<ApprovalRequest>, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                location: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    async fn write_record(path: &Path, record: &ApprovalRequest) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl RequestStore for FileStore {
    async fn create(&self, new: NewApprovalRequest) -> Result<ApprovalRequest, StoreError> {
        if !new.key.is_valid() {
            return Err(StoreError::InvalidKey(new.key));
        }
        let path = self.path_for(&new.key);
        let _guard = self.locks.acquire(&new.key).await;

        if tokio::fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists(new.key));
        }
        let record = new.into_record();
        Self::write_record(&path, &record).await?;
        tracing::debug!(
            story_id = %record.story_id,
            platform = %record.platform,
            "request persisted"
        );
        Ok(record)
    }

    async fn get(&self, key: &RequestKey) -> Result<ApprovalRequest, StoreError> {
        if !key.is_valid() {
            return Err(StoreError::InvalidKey(key.clone()));
        }
        Self::read_record(&self.path_for(key))
            .await?
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn with_lock(&self, key: &RequestKey, mutate: Mutator) -> Result<Locked, StoreError> {
        if !key.is_valid() {
            return Err(StoreError::InvalidKey(key.clone()));
        }
        let path = self.path_for(key);
        let _guard = self.locks.acquire(key).await;

        let current = Self::read_record(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        match apply_mutation(&current, mutate) {
            Some(next) => {
                Self::write_record(&path, &next).await?;
                Ok(Locked {
                    record: next,
                    committed: true,
                })
            }
            None => Ok(Locked {
                record: current,
                committed: false,
            }),
        }
    }

    async fn list(&self, filter: Filter<'_>) -> Result<Vec<ApprovalRequest>, StoreError> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(record)) => {
                    if filter(&record) {
                        out.push(record);
                    }
                }
                // Removed between read_dir and read.
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
                }
            }
        }
        Ok(out)
    }
}
