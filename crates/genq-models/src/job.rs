//! Job definitions for queue processing.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a job.
///
/// Caller-supplied and used as the idempotency/ack key. Distinct from the
/// position the log assigns to the entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of artifact a job produces. Selects the handler that runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Delimited text, records paged by id cursor
    CursorCsv,
    /// Delimited text, records paged by offset
    OffsetCsv,
    /// One JSON document per record
    JsonLines,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::CursorCsv, JobKind::OffsetCsv, JobKind::JsonLines];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CursorCsv => "cursor_csv",
            JobKind::OffsetCsv => "offset_csv",
            JobKind::JsonLines => "json_lines",
        }
    }

    /// File extension of the produced artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            JobKind::CursorCsv | JobKind::OffsetCsv => "csv",
            JobKind::JsonLines => "jsonl",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown job kind: {0}")]
pub struct ParseJobKindError(pub String);

impl FromStr for JobKind {
    type Err = ParseJobKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cursor_csv" => Ok(JobKind::CursorCsv),
            "offset_csv" => Ok(JobKind::OffsetCsv),
            "json_lines" | "jsonl" => Ok(JobKind::JsonLines),
            _ => Err(ParseJobKindError(s.to_string())),
        }
    }
}

/// A file-generation job. Immutable once appended to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Globally unique job ID
    pub id: JobId,
    /// Artifact kind
    pub kind: JobKind,
    /// Routing key for progress events (the requesting client)
    pub owner: String,
    /// Name of the artifact written to the output directory
    pub file_name: String,
}

impl Job {
    /// Create a job with a fresh ID and a derived file name.
    pub fn new(kind: JobKind, owner: impl Into<String>) -> Self {
        Self::with_id(JobId::new(), kind, owner)
    }

    /// Create a job for a caller-supplied ID.
    pub fn with_id(id: JobId, kind: JobKind, owner: impl Into<String>) -> Self {
        let file_name = format!("export_{}_{}.{}", kind.as_str(), id, kind.extension());
        Self {
            id,
            kind,
            owner: owner.into(),
            file_name,
        }
    }

    /// Location a client fetches the finished artifact from.
    pub fn artifact_location(&self) -> String {
        format!("/api/download/file/{}", self.file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_file_name_derives_from_kind_and_id() {
        let job = Job::with_id(JobId::from_string("abc"), JobKind::JsonLines, "user-1");
        assert_eq!(job.file_name, "export_json_lines_abc.jsonl");
        assert_eq!(job.artifact_location(), "/api/download/file/export_json_lines_abc.jsonl");
    }

    #[test]
    fn job_serializes_with_camel_case_fields() {
        let job = Job::with_id(JobId::from_string("j1"), JobKind::CursorCsv, "owner-7");
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"id\":\"j1\""));
        assert!(json.contains("\"kind\":\"cursor_csv\""));
        assert!(json.contains("\"fileName\":\"export_cursor_csv_j1.csv\""));
    }

    #[test]
    fn job_kind_parses_path_segments() {
        assert_eq!("cursor-csv".parse::<JobKind>().unwrap(), JobKind::CursorCsv);
        assert_eq!("OFFSET_CSV".parse::<JobKind>().unwrap(), JobKind::OffsetCsv);
        assert_eq!("jsonl".parse::<JobKind>().unwrap(), JobKind::JsonLines);
        assert!("xlsx".parse::<JobKind>().is_err());
    }

    #[test]
    fn job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }
}
