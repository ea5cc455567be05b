//! Delimited text exports.

use async_trait::async_trait;
use genq_models::{Job, JobKind};

use crate::context::JobContext;
use crate::error::WorkerResult;
use crate::handlers::export::{export, Paging, RowFormat};
use crate::handlers::JobHandler;
use crate::records::Record;

const HEADER: &str = "id,name,description,value,category,created_at";

/// Quote a field when it contains a delimiter, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

struct CsvFormat;

impl RowFormat for CsvFormat {
    fn header(&self) -> Option<String> {
        Some(HEADER.to_string())
    }

    fn row(&self, record: &Record) -> WorkerResult<String> {
        Ok(format!(
            "{},{},{},{:.2},{},{}",
            record.id,
            escape(&record.name),
            escape(&record.description),
            record.value,
            escape(&record.category),
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
        ))
    }
}

/// CSV export paging by id cursor.
#[derive(Debug, Default)]
pub struct CursorCsvHandler;

#[async_trait]
impl JobHandler for CursorCsvHandler {
    fn kind(&self) -> JobKind {
        JobKind::CursorCsv
    }

    async fn run(&self, job: &Job, ctx: &JobContext) -> WorkerResult<()> {
        export(job, ctx, Paging::Cursor, &CsvFormat).await?;
        Ok(())
    }
}

/// CSV export paging by offset.
#[derive(Debug, Default)]
pub struct OffsetCsvHandler;

#[async_trait]
impl JobHandler for OffsetCsvHandler {
    fn kind(&self) -> JobKind {
        JobKind::OffsetCsv
    }

    async fn run(&self, job: &Job, ctx: &JobContext) -> WorkerResult<()> {
        export(job, ctx, Paging::Offset, &CsvFormat).await?;
        Ok(())
    }
}
