//! Progress events relayed to the client that requested a job.
//!
//! Events are transient: they are serialized onto the broadcast channel and
//! written to a live connection, never persisted.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Lifecycle state carried by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressState {
    /// Waiting in the log
    Queued,
    /// Claimed and executing
    Processing,
    /// Artifact written
    Completed,
    /// Job body failed
    Failed,
}

impl ProgressState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressState::Queued => "QUEUED",
            ProgressState::Processing => "PROCESSING",
            ProgressState::Completed => "COMPLETED",
            ProgressState::Failed => "FAILED",
        }
    }

    /// Whether no further events follow for the job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressState::Completed | ProgressState::Failed)
    }
}

/// Progress update for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub state: ProgressState,
    pub total_units: u64,
    pub processed_units: u64,
    /// 0-100
    pub percentage: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    fn new(job_id: &JobId, state: ProgressState, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.clone(),
            state,
            total_units: 0,
            processed_units: 0,
            percentage: 0,
            message: message.into(),
            artifact_location: None,
            error: None,
        }
    }

    /// Job accepted into the log.
    pub fn queued(job_id: &JobId) -> Self {
        Self::new(job_id, ProgressState::Queued, "Request added to the queue")
    }

    /// Job claimed by a worker, nothing processed yet.
    pub fn started(job_id: &JobId) -> Self {
        Self::new(job_id, ProgressState::Processing, "Generation started")
    }

    /// Intermediate progress reported by a job body.
    pub fn processing(job_id: &JobId, total_units: u64, processed_units: u64) -> Self {
        Self {
            total_units,
            processed_units,
            percentage: percentage(total_units, processed_units),
            ..Self::new(
                job_id,
                ProgressState::Processing,
                format!("Generating file... ({}/{})", processed_units, total_units),
            )
        }
    }

    /// Artifact written and ready to fetch.
    pub fn completed(job_id: &JobId, artifact_location: impl Into<String>) -> Self {
        Self {
            percentage: 100,
            artifact_location: Some(artifact_location.into()),
            ..Self::new(job_id, ProgressState::Completed, "File generation completed")
        }
    }

    /// Job body failed; terminal for this job.
    pub fn failed(job_id: &JobId, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(job_id, ProgressState::Failed, "File generation failed")
        }
    }
}

fn percentage(total: u64, processed: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (processed.saturating_mul(100) / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_percentage() {
        let id = JobId::from_string("j");
        assert_eq!(ProgressEvent::processing(&id, 200, 50).percentage, 25);
        assert_eq!(ProgressEvent::processing(&id, 0, 50).percentage, 0);
        // Should clamp to 100
        assert_eq!(ProgressEvent::processing(&id, 10, 50).percentage, 100);
    }

    #[test]
    fn test_completed_serialization() {
        let event = ProgressEvent::completed(&JobId::from_string("j1"), "/api/download/file/a.csv");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"state\":\"COMPLETED\""));
        assert!(json.contains("\"artifactLocation\":\"/api/download/file/a.csv\""));
        assert!(json.contains("\"percentage\":100"));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_failed_carries_error() {
        let event = ProgressEvent::failed(&JobId::from_string("j2"), "disk full");
        assert_eq!(event.state, ProgressState::Failed);
        assert_eq!(event.error.as_deref(), Some("disk full"));
        assert!(event.state.is_terminal());
        assert!(!ProgressState::Processing.is_terminal());
    }
}
