//! Paged export loop shared by the built-in handlers.

use genq_models::Job;

use crate::context::JobContext;
use crate::error::WorkerResult;
use crate::handlers::writer::ArtifactWriter;
use crate::logging::JobLogger;
use crate::records::Record;

/// How the record source is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paging {
    /// `id > last_id`, stable under concurrent inserts
    Cursor,
    /// `OFFSET n`
    Offset,
}

/// Serialization of records into artifact lines.
pub trait RowFormat: Send + Sync {
    fn header(&self) -> Option<String>;

    fn row(&self, record: &Record) -> WorkerResult<String>;
}

/// Decides when another progress event is due.
#[derive(Debug)]
pub struct ProgressTicker {
    every: u64,
    reported: u64,
}

impl ProgressTicker {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            reported: 0,
        }
    }

    /// True once per `every` records crossed.
    pub fn should_report(&mut self, processed: u64) -> bool {
        let bucket = processed / self.every;
        if bucket > self.reported {
            self.reported = bucket;
            true
        } else {
            false
        }
    }
}

/// Write every record of the source to the job's artifact. Returns the number
/// of records written.
pub async fn export(
    job: &Job,
    ctx: &JobContext,
    paging: Paging,
    format: &dyn RowFormat,
) -> WorkerResult<u64> {
    let logger = JobLogger::new(job);
    let total = ctx.records.total_count().await?;
    logger.log_start(&format!("exporting {} records to {}", total, job.file_name));

    let mut out = ArtifactWriter::create(job, ctx).await?;
    if let Some(header) = format.header() {
        out.write_line(&header).await?;
    }

    let mut ticker = ProgressTicker::new(ctx.progress_every);
    let mut processed: u64 = 0;
    let mut last_id: u64 = 0;

    loop {
        let page = match paging {
            Paging::Cursor => ctx.records.fetch_after(last_id, ctx.chunk_size).await?,
            Paging::Offset => ctx.records.fetch_page(processed, ctx.chunk_size).await?,
        };
        let Some(last) = page.last() else {
            break;
        };
        last_id = last.id;

        for record in &page {
            out.write_line(&format.row(record)?).await?;
        }
        processed += page.len() as u64;

        if ticker.should_report(processed) {
            logger.log_progress(&format!("{}/{}", processed, total));
            ctx.progress.processing(total, processed).await;
        }
    }

    let path = out.finish().await?;
    logger.log_completion(&format!("{} records written to {}", processed, path.display()));
    Ok(processed)
}
