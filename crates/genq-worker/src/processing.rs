//! Jobs currently executing in this process.

use std::collections::HashSet;
use std::sync::Mutex;

use genq_models::JobId;

/// Set of job ids being executed here. Never larger than the slot count.
#[derive(Debug)]
pub struct ProcessingSet {
    capacity: usize,
    jobs: Mutex<HashSet<JobId>>,
}

impl ProcessingSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            jobs: Mutex::new(HashSet::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a job as executing. Returns false when full or already present.
    pub fn insert(&self, job_id: JobId) -> bool {
        let Ok(mut jobs) = self.jobs.lock() else {
            return false;
        };
        if jobs.len() >= self.capacity {
            return false;
        }
        jobs.insert(job_id)
    }

    pub fn remove(&self, job_id: &JobId) -> bool {
        self.jobs
            .lock()
            .map(|mut jobs| jobs.remove(job_id))
            .unwrap_or(false)
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.jobs
            .lock()
            .map(|jobs| jobs.contains(job_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }
}
