//! In-process job log with the same consumer-group semantics as the Redis one.
//!
//! Used by single-node deployments and by tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use genq_models::Job;
use tokio::sync::Notify;
use tracing::debug;

use crate::entry::{EntryId, LogEntry, PendingEntry};
use crate::error::{QueueError, QueueResult};
use crate::queue::JobQueue;

#[derive(Debug)]
struct Claim {
    consumer: String,
    claimed_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<(u64, u64), Job>,
    /// Highest position ever handed to a consumer of the group
    last_delivered: (u64, u64),
    /// Highest position ever assigned
    last_assigned: (u64, u64),
    pending: HashMap<(u64, u64), Claim>,
}

impl State {
    fn next_position(&mut self) -> (u64, u64) {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let (last_millis, last_seq) = self.last_assigned;
        let next = if millis > last_millis {
            (millis, 0)
        } else {
            (last_millis, last_seq + 1)
        };
        self.last_assigned = next;
        next
    }
}

/// Job log kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    state: Mutex<State>,
    appended: Notify,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> QueueResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| QueueError::DequeueFailed("queue state poisoned".to_string()))
    }

    fn key(position: &EntryId) -> QueueResult<(u64, u64)> {
        position
            .parts()
            .ok_or_else(|| QueueError::malformed_entry(position.as_str(), "not a log position"))
    }

    fn try_claim(&self, consumer: &str, max_count: usize) -> QueueResult<Vec<LogEntry>> {
        let mut state = self.lock()?;
        let after = state.last_delivered;

        let fresh: Vec<((u64, u64), Job)> = state
            .entries
            .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
            .take(max_count.max(1))
            .map(|(k, job)| (*k, job.clone()))
            .collect();

        let now = Instant::now();
        let mut claimed = Vec::with_capacity(fresh.len());
        for (key, job) in fresh {
            state.last_delivered = key;
            state.pending.insert(
                key,
                Claim {
                    consumer: consumer.to_string(),
                    claimed_at: now,
                    delivery_count: 1,
                },
            );
            claimed.push(LogEntry {
                position: EntryId::from_parts(key.0, key.1),
                job,
            });
        }
        Ok(claimed)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn init(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn append(&self, job: &Job) -> QueueResult<EntryId> {
        let position = {
            let mut state = self.lock()?;
            let key = state.next_position();
            state.entries.insert(key, job.clone());
            EntryId::from_parts(key.0, key.1)
        };
        debug!("Enqueued job {} at {}", job.id, position);
        self.appended.notify_waiters();
        Ok(position)
    }

    async fn claim(
        &self,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> QueueResult<Vec<LogEntry>> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            // Register interest before checking so an append in between is not missed
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let claimed = self.try_claim(consumer, max_count)?;
            if !claimed.is_empty() {
                return Ok(claimed);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, position: &EntryId) -> QueueResult<()> {
        let key = Self::key(position)?;
        self.lock()?.pending.remove(&key);
        Ok(())
    }

    async fn delete(&self, position: &EntryId) -> QueueResult<()> {
        let key = Self::key(position)?;
        self.lock()?.entries.remove(&key);
        Ok(())
    }

    async fn pending(&self) -> QueueResult<Vec<PendingEntry>> {
        let state = self.lock()?;
        let mut entries: Vec<PendingEntry> = state
            .pending
            .iter()
            .map(|(key, claim)| PendingEntry {
                position: EntryId::from_parts(key.0, key.1),
                consumer: claim.consumer.clone(),
                idle: claim.claimed_at.elapsed(),
                delivery_count: claim.delivery_count,
            })
            .collect();
        entries.sort_by(|a, b| a.position.cmp(&b.position));
        Ok(entries)
    }

    async fn read(&self, position: &EntryId) -> QueueResult<Option<Job>> {
        let key = Self::key(position)?;
        Ok(self.lock()?.entries.get(&key).cloned())
    }

    async fn len(&self) -> QueueResult<u64> {
        Ok(self.lock()?.entries.len() as u64)
    }

    async fn pending_count(&self) -> QueueResult<u64> {
        Ok(self.lock()?.pending.len() as u64)
    }
}
