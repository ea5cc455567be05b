//! Source of the records a job writes out.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkerResult;

/// One exported row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub value: f64,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Paged read access to the exported data set.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn total_count(&self) -> WorkerResult<u64>;

    /// Up to `limit` records with id greater than `last_id`, ordered by id.
    async fn fetch_after(&self, last_id: u64, limit: usize) -> WorkerResult<Vec<Record>>;

    /// Up to `limit` records starting at row `offset`, ordered by id.
    async fn fetch_page(&self, offset: u64, limit: usize) -> WorkerResult<Vec<Record>>;
}

const CATEGORIES: [&str; 5] = ["Electronics", "Books", "Clothing", "Food", "Sports"];

/// Deterministic generated rows with ids `1..=rows`.
#[derive(Debug, Clone)]
pub struct SyntheticRecordSource {
    rows: u64,
    epoch: DateTime<Utc>,
}

impl SyntheticRecordSource {
    pub fn new(rows: u64) -> Self {
        let epoch = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self { rows, epoch }
    }

    fn record(&self, id: u64) -> Record {
        Record {
            id,
            name: format!("Item {}", id),
            description: format!("Generated record number {}", id),
            value: (id % 10_000) as f64 / 100.0,
            category: CATEGORIES[(id % CATEGORIES.len() as u64) as usize].to_string(),
            created_at: self.epoch + ChronoDuration::seconds(id as i64),
        }
    }

    fn range(&self, first_id: u64, limit: usize) -> Vec<Record> {
        if first_id == 0 || first_id > self.rows {
            return Vec::new();
        }
        let last_id = self.rows.min(first_id.saturating_add(limit as u64).saturating_sub(1));
        (first_id..=last_id).map(|id| self.record(id)).collect()
    }
}

#[async_trait]
impl RecordSource for SyntheticRecordSource {
    async fn total_count(&self) -> WorkerResult<u64> {
        Ok(self.rows)
    }

    async fn fetch_after(&self, last_id: u64, limit: usize) -> WorkerResult<Vec<Record>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self.range(last_id.saturating_add(1), limit))
    }

    async fn fetch_page(&self, offset: u64, limit: usize) -> WorkerResult<Vec<Record>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self.range(offset.saturating_add(1), limit))
    }
}
