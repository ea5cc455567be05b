//! Everything a job handler gets besides the job itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use genq_models::Job;
use genq_queue::ProgressReporter;

use crate::records::RecordSource;

/// Context bundle handed to a job handler.
#[derive(Clone)]
pub struct JobContext {
    pub records: Arc<dyn RecordSource>,
    pub progress: ProgressReporter,
    pub output_dir: PathBuf,
    /// Records fetched per page
    pub chunk_size: usize,
    /// Records between progress events
    pub progress_every: u64,
}

impl JobContext {
    /// Final location of the job's artifact.
    pub fn artifact_path(&self, job: &Job) -> PathBuf {
        self.output_dir.join(&job.file_name)
    }

    /// Temporary location written before the artifact is renamed into place.
    pub fn partial_path(&self, job: &Job) -> PathBuf {
        partial_path(&self.artifact_path(job))
    }
}

pub fn partial_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
