//! JSON lines export.

use async_trait::async_trait;
use genq_models::{Job, JobKind};

use crate::context::JobContext;
use crate::error::WorkerResult;
use crate::handlers::export::{export, Paging, RowFormat};
use crate::handlers::JobHandler;
use crate::records::Record;

struct JsonLinesFormat;

impl RowFormat for JsonLinesFormat {
    fn header(&self) -> Option<String> {
        None
    }

    fn row(&self, record: &Record) -> WorkerResult<String> {
        Ok(serde_json::to_string(record)?)
    }
}

/// One JSON document per record, paging by id cursor.
#[derive(Debug, Default)]
pub struct JsonLinesHandler;

#[async_trait]
impl JobHandler for JsonLinesHandler {
    fn kind(&self) -> JobKind {
        JobKind::JsonLines
    }

    async fn run(&self, job: &Job, ctx: &JobContext) -> WorkerResult<()> {
        export(job, ctx, Paging::Cursor, &JsonLinesFormat).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::test_context;

    #[tokio::test]
    async fn every_line_is_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), 42);
        let job = Job::new(JobKind::JsonLines, "u1");

        JsonLinesHandler.run(&job, &ctx).await.unwrap();

        let body = std::fs::read_to_string(ctx.artifact_path(&job)).unwrap();
        let records: Vec<Record> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 42);
        assert_eq!(records[41].id, 42);
    }
}
