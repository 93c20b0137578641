//! Batch-run candidate selection.
//!
//! A harvesting run proposes candidate stories; an operator picks some (or
//! all) of them before the run closes. Each run is an owned session with a
//! TTL instead of a process-global map.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::session::SessionTable;
use crate::errors::WorkflowError;

/// Pick value that selects every candidate.
pub const SELECT_ALL: &str = "all";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSelection {
    pub candidates: Vec<String>,
    pub selected: Vec<String>,
}

pub struct BatchRuns {
    runs: SessionTable<String, RunSelection>,
}

impl BatchRuns {
    pub fn new(ttl: Duration) -> Self {
        Self {
            runs: SessionTable::new(ttl),
        }
    }

    pub fn open(&self, workflow_id: &str, candidates: Vec<String>) -> Result<(), WorkflowError> {
        if candidates.is_empty() {
            return Err(WorkflowError::InvalidEvent(format!(
                "run {} has no candidates",
                workflow_id
            )));
        }
        tracing::info!(workflow_id, candidates = candidates.len(), "run opened");
        self.runs.open(
            workflow_id.to_string(),
            RunSelection {
                candidates,
                selected: Vec::new(),
            },
        );
        Ok(())
    }

    /// Mark `pick` (a candidate id or `all`) as selected; returns how many
    /// candidates are now selected.
    pub fn select(&self, workflow_id: &str, pick: &str) -> Result<usize, WorkflowError> {
        let pick = pick.trim();
        self.runs
            .update(&workflow_id.to_string(), |run| {
                if pick.eq_ignore_ascii_case(SELECT_ALL) {
                    run.selected = run.candidates.clone();
                    return Ok(run.selected.len());
                }
                if !run.candidates.iter().any(|c| c == pick) {
                    return Err(WorkflowError::InvalidEvent(format!(
                        "{} is not a candidate of run {}",
                        pick, workflow_id
                    )));
                }
                if !run.selected.iter().any(|c| c == pick) {
                    run.selected.push(pick.to_string());
                }
                Ok(run.selected.len())
            })
            .ok_or_else(|| WorkflowError::SessionNotFound(workflow_id.to_string()))?
    }

    /// End the run and return the selected candidates in candidate order.
    pub fn close(&self, workflow_id: &str) -> Result<Vec<String>, WorkflowError> {
        let run = self
            .runs
            .take(&workflow_id.to_string())
            .ok_or_else(|| WorkflowError::SessionNotFound(workflow_id.to_string()))?;
        Ok(run
            .candidates
            .into_iter()
            .filter(|c| run.selected.contains(c))
            .collect())
    }

    pub fn get(&self, workflow_id: &str) -> Option<RunSelection> {
        self.runs.get(&workflow_id.to_string())
    }

    pub fn purge_expired(&self) -> usize {
        self.runs.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<String> {
        vec!["h1".into(), "h2".into(), "h3".into()]
    }

    #[tokio::test]
    async fn test_selection_keeps_candidate_order() {
        let runs = BatchRuns::new(Duration::from_secs(600));
        runs.open("daily_1", candidates()).unwrap();
        runs.select("daily_1", "h3").unwrap();
        assert_eq!(runs.select("daily_1", "h1").unwrap(), 2);
        assert_eq!(runs.select("daily_1", "h1").unwrap(), 2);
        assert_eq!(runs.close("daily_1").unwrap(), vec!["h1", "h3"]);
        assert!(runs.get("daily_1").is_none());
    }

    #[tokio::test]
    async fn test_select_all_and_unknown_pick() {
        let runs = BatchRuns::new(Duration::from_secs(600));
        runs.open("daily_2", candidates()).unwrap();
        assert!(runs.select("daily_2", "h9").is_err());
        assert_eq!(runs.select("daily_2", "ALL").unwrap(), 3);
        assert!(matches!(
            runs.select("nope", "h1"),
            Err(WorkflowError::SessionNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_run_cannot_close() {
        let runs = BatchRuns::new(Duration::from_secs(60));
        runs.open("daily_3", candidates()).unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(runs.close("daily_3").is_err());
    }
}
