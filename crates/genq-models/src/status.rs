//! Queue status snapshot returned by the status endpoint.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Point-in-time view of the queue and its counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Entries waiting to be claimed
    pub queue_size: u64,
    /// Entries claimed but not yet acknowledged
    pub processing_count: u64,
    pub max_concurrent_downloads: usize,
    pub success_count: u64,
    pub failed_count: u64,
    pub total_completed_count: u64,
    pub success_rate: f64,
}

impl QueueStatus {
    /// Build a status from raw log figures. Waiting is total minus in-flight,
    /// floored at zero.
    pub fn from_parts(
        log_len: u64,
        pending: u64,
        max_concurrent: usize,
        success: u64,
        failed: u64,
        success_rate: f64,
    ) -> Self {
        Self {
            queue_size: log_len.saturating_sub(pending),
            processing_count: pending,
            max_concurrent_downloads: max_concurrent,
            success_count: success,
            failed_count: failed,
            total_completed_count: success + failed,
            success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_count_never_negative() {
        let status = QueueStatus::from_parts(1, 3, 2, 0, 0, 0.0);
        assert_eq!(status.queue_size, 0);
        assert_eq!(status.processing_count, 3);
    }

    #[test]
    fn total_is_success_plus_failed() {
        let status = QueueStatus::from_parts(5, 2, 4, 7, 3, 70.0);
        assert_eq!(status.queue_size, 3);
        assert_eq!(status.total_completed_count, 10);
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"maxConcurrentDownloads\":4"));
    }
}
