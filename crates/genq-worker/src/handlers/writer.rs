//! Artifact output: write to a `.part` file, then rename into place.

use std::path::PathBuf;

use genq_models::Job;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::context::JobContext;
use crate::error::WorkerResult;

/// Line-oriented artifact writer.
///
/// Creating the writer truncates any leftover partial file, so a job that is
/// executed again starts from an empty file.
pub struct ArtifactWriter {
    writer: BufWriter<File>,
    partial: PathBuf,
    target: PathBuf,
}

impl ArtifactWriter {
    pub async fn create(job: &Job, ctx: &JobContext) -> WorkerResult<Self> {
        fs::create_dir_all(&ctx.output_dir).await?;
        let target = ctx.artifact_path(job);
        let partial = ctx.partial_path(job);
        let file = File::create(&partial).await?;
        Ok(Self {
            writer: BufWriter::new(file),
            partial,
            target,
        })
    }

    pub async fn write_line(&mut self, line: &str) -> WorkerResult<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    /// Flush and atomically replace the artifact. Returns its path.
    pub async fn finish(mut self) -> WorkerResult<PathBuf> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        drop(self.writer);
        fs::rename(&self.partial, &self.target).await?;
        Ok(self.target)
    }
}
