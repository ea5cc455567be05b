//! Startup scan that re-queues entries orphaned by a crashed consumer.

use tracing::{info, warn};

use crate::error::QueueResult;
use crate::queue::JobQueue;

/// Outcome of a recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Pending entries found
    pub scanned: usize,
    /// Entries re-appended to the tail of the log
    pub recovered: usize,
    /// Entries left alone because their payload could not be read
    pub skipped: usize,
}

/// Re-append every pending entry of the group so it is delivered again.
///
/// Each entry is read back, acknowledged, deleted and appended as a new
/// entry. Entries that cannot be read are skipped and stay pending. Must run
/// before the node starts claiming: anything this node already has in flight
/// would be duplicated.
pub async fn recover_pending(queue: &dyn JobQueue) -> QueueResult<RecoveryReport> {
    let pending = queue.pending().await?;
    let mut report = RecoveryReport {
        scanned: pending.len(),
        ..Default::default()
    };

    if pending.is_empty() {
        info!("No pending entries to recover");
        return Ok(report);
    }

    info!("Recovering {} pending entries", pending.len());

    for entry in pending {
        let job = match queue.read(&entry.position).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(
                    position = %entry.position,
                    consumer = %entry.consumer,
                    "Pending entry no longer in the log, skipping"
                );
                report.skipped += 1;
                continue;
            }
            Err(e) => {
                warn!(
                    position = %entry.position,
                    consumer = %entry.consumer,
                    "Failed to read pending entry: {}",
                    e
                );
                report.skipped += 1;
                continue;
            }
        };

        queue.ack_and_delete(&entry.position).await?;
        let new_position = queue.append(&job).await?;

        info!(
            job_id = %job.id,
            from = %entry.position,
            to = %new_position,
            idle_ms = entry.idle.as_millis() as u64,
            "Re-queued orphaned job"
        );
        report.recovered += 1;
    }

    info!(
        "Recovery complete: {} scanned, {} recovered, {} skipped",
        report.scanned, report.recovered, report.skipped
    );
    Ok(report)
}
