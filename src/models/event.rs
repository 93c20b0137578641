//! Typed inbound events. Transports (chat callbacks, HTTP, CLI) translate
//! into these and hand them to the lifecycle engine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::approval::{ApprovalStatus, MediaKind, Platform, RequestKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Reject,
    ApproveAll,
    RejectAll,
}

impl ApprovalAction {
    pub fn target_status(&self) -> ApprovalStatus {
        match self {
            ApprovalAction::Approve | ApprovalAction::ApproveAll => ApprovalStatus::Approved,
            ApprovalAction::Reject | ApprovalAction::RejectAll => ApprovalStatus::Rejected,
        }
    }

    pub fn is_fan_out(&self) -> bool {
        matches!(self, ApprovalAction::ApproveAll | ApprovalAction::RejectAll)
    }
}

impl FromStr for ApprovalAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "approve" | "approved" => Ok(ApprovalAction::Approve),
            "reject" | "rejected" | "decline" => Ok(ApprovalAction::Reject),
            "approve_all" => Ok(ApprovalAction::ApproveAll),
            "reject_all" | "decline_all" => Ok(ApprovalAction::RejectAll),
            other => Err(format!("unknown action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub story_id: String,
    #[serde(default)]
    pub platform: Option<Platform>,
    pub action: ApprovalAction,
}

impl ApprovalEvent {
    /// Keys addressed by this event; `None` when a single-platform action
    /// arrives without a platform.
    pub fn targets(&self) -> Option<Vec<RequestKey>> {
        if self.action.is_fan_out() {
            return Some(
                Platform::ALL
                    .iter()
                    .map(|p| RequestKey::new(self.story_id.clone(), *p))
                    .collect(),
            );
        }
        self.platform
            .map(|p| vec![RequestKey::new(self.story_id.clone(), p)])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUpload {
    pub kind: MediaKind,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// A single hosted media reference delivered by webhook.
    Hosted {
        key: RequestKey,
        upload: MediaUpload,
    },
    /// A committed interactive session; appended as one operation.
    Batch {
        key: RequestKey,
        items: Vec<MediaUpload>,
    },
}

impl MediaEvent {
    pub fn key(&self) -> &RequestKey {
        match self {
            MediaEvent::Hosted { key, .. } | MediaEvent::Batch { key, .. } => key,
        }
    }
}
