//! Progress message wire format and the per-job emitter.

use std::sync::Arc;

use genq_models::{JobId, ProgressEvent};
use tracing::warn;

use crate::broadcast::Broadcaster;
use crate::error::{QueueError, QueueResult};

/// Encode `"<owner>:<json>"`. Owners must not contain a colon.
pub fn encode_message(owner: &str, event: &ProgressEvent) -> QueueResult<String> {
    if owner.contains(':') {
        return Err(QueueError::MalformedMessage(format!(
            "owner must not contain ':': {}",
            owner
        )));
    }
    let json = serde_json::to_string(event)?;
    Ok(format!("{}:{}", owner, json))
}

/// Split a raw message at the first colon into owner and JSON payload.
///
/// The payload is returned verbatim so it can be forwarded without
/// re-serializing.
pub fn decode_message(raw: &str) -> QueueResult<(&str, &str)> {
    match raw.split_once(':') {
        Some((owner, payload)) if !owner.is_empty() && !payload.is_empty() => {
            Ok((owner, payload))
        }
        _ => Err(QueueError::MalformedMessage(truncate(raw, 64))),
    }
}

fn truncate(raw: &str, max: usize) -> String {
    match raw.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &raw[..idx]),
        None => raw.to_string(),
    }
}

/// Emits progress for one job to its owner.
///
/// Delivery is best-effort: failures are logged and never reach the job body.
#[derive(Clone)]
pub struct ProgressReporter {
    broadcaster: Arc<dyn Broadcaster>,
    owner: String,
    job_id: JobId,
}

impl ProgressReporter {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, owner: impl Into<String>, job_id: JobId) -> Self {
        Self {
            broadcaster,
            owner: owner.into(),
            job_id,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub async fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.broadcaster.publish(&self.owner, &event).await {
            warn!(
                job_id = %self.job_id,
                owner = %self.owner,
                state = event.state.as_str(),
                "Failed to publish progress: {}",
                e
            );
        }
    }

    pub async fn queued(&self) {
        self.emit(ProgressEvent::queued(&self.job_id)).await
    }

    pub async fn started(&self) {
        self.emit(ProgressEvent::started(&self.job_id)).await
    }

    pub async fn processing(&self, total_units: u64, processed_units: u64) {
        self.emit(ProgressEvent::processing(&self.job_id, total_units, processed_units))
            .await
    }

    pub async fn completed(&self, artifact_location: impl Into<String>) {
        self.emit(ProgressEvent::completed(&self.job_id, artifact_location))
            .await
    }

    pub async fn failed(&self, error: impl Into<String>) {
        self.emit(ProgressEvent::failed(&self.job_id, error)).await
    }
}
