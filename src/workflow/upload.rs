//! Interactive multi-file media sessions.
//!
//! An operator opens a session for one request, sends files one by one and
//! then commits; the whole batch reaches the engine as a single
//! [`MediaEvent::Batch`]. Nothing touches the store until commit.

use std::time::Duration;

use serde::Serialize;

use super::session::SessionTable;
use crate::errors::WorkflowError;
use crate::models::approval::{MediaKind, RequestKey};
use crate::models::event::{MediaEvent, MediaUpload};

#[derive(Debug, Clone, Serialize)]
pub struct UploadBatch {
    pub key: RequestKey,
    pub items: Vec<MediaUpload>,
}

pub struct UploadSessions {
    sessions: SessionTable<String, UploadBatch>,
}

impl UploadSessions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: SessionTable::new(ttl),
        }
    }

    /// Map an uploaded file to media by its extension. Other documents are refused.
    pub fn classify(file_name: &str, reference: String) -> Result<MediaUpload, WorkflowError> {
        let kind = MediaKind::from_file_name(file_name).ok_or_else(|| {
            WorkflowError::InvalidEvent(format!(
                "{} is not a supported image or video file",
                file_name
            ))
        })?;
        Ok(MediaUpload { kind, reference })
    }

    /// Open (or restart) the owner's session for `key`.
    pub fn start(&self, owner: &str, key: RequestKey) {
        tracing::debug!(owner, story_id = %key.story_id, platform = %key.platform, "upload session opened");
        self.sessions.open(
            owner.to_string(),
            UploadBatch {
                key,
                items: Vec::new(),
            },
        );
    }

    /// Queue one item; returns the batch size so far.
    pub fn add(&self, owner: &str, upload: MediaUpload) -> Result<usize, WorkflowError> {
        self.sessions
            .update(&owner.to_string(), |batch| {
                batch.items.push(upload);
                batch.items.len()
            })
            .ok_or_else(|| WorkflowError::SessionNotFound(owner.to_string()))
    }

    /// Close the session. `None` when nothing was uploaded.
    pub fn finish(&self, owner: &str) -> Result<Option<MediaEvent>, WorkflowError> {
        let batch = self
            .sessions
            .take(&owner.to_string())
            .ok_or_else(|| WorkflowError::SessionNotFound(owner.to_string()))?;
        if batch.items.is_empty() {
            return Ok(None);
        }
        Ok(Some(MediaEvent::Batch {
            key: batch.key,
            items: batch.items,
        }))
    }

    pub fn cancel(&self, owner: &str) -> bool {
        self.sessions.discard(&owner.to_string())
    }

    pub fn peek(&self, owner: &str) -> Option<UploadBatch> {
        self.sessions.get(&owner.to_string())
    }

    pub fn purge_expired(&self) -> usize {
        self.sessions.purge_expired()
    }
}
