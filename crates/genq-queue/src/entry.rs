//! Log entry types and the wire shape of an enqueued job.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use genq_models::Job;
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};

/// Stream field holding the job ID, readable without decoding the payload.
pub const FIELD_REQUEST_ID: &str = "requestId";
/// Stream field holding the serialized job.
pub const FIELD_DATA: &str = "data";

/// Position of an entry in the log (`<millis>-<seq>`).
///
/// Assigned by the log on append and distinct from the job's own ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_parts(millis: u64, seq: u64) -> Self {
        Self(format!("{}-{}", millis, seq))
    }

    /// Split into `(millis, seq)`. `None` for ids not in stream format.
    pub fn parts(&self) -> Option<(u64, u64)> {
        let (millis, seq) = self.0.split_once('-')?;
        Some((millis.parse().ok()?, seq.parse().ok()?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for EntryId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.parts(), other.parts()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for EntryId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A job as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub position: EntryId,
    pub job: Job,
}

/// An entry claimed by a consumer but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub position: EntryId,
    pub consumer: String,
    pub idle: Duration,
    pub delivery_count: u64,
}

/// Field/value pairs written to the log for a job.
pub fn encode_fields(job: &Job) -> QueueResult<[(&'static str, String); 2]> {
    let data = serde_json::to_string(job)?;
    Ok([
        (FIELD_REQUEST_ID, job.id.to_string()),
        (FIELD_DATA, data),
    ])
}

/// Decode the `data` field of an entry back into a job.
pub fn decode_data(position: &EntryId, data: &str) -> QueueResult<Job> {
    serde_json::from_str(data)
        .map_err(|e| QueueError::malformed_entry(position.as_str(), e.to_string()))
}
