//! Job handlers and the kind -> handler registry.

pub mod csv;
pub mod export;
pub mod jsonl;
pub mod writer;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use genq_models::{Job, JobKind};

use crate::context::JobContext;
use crate::error::WorkerResult;

pub use csv::{CursorCsvHandler, OffsetCsvHandler};
pub use jsonl::JsonLinesHandler;

/// Body of a job. Returning an error marks the job failed; the message is
/// shown to the owner.
///
/// A job may be executed again from the start after a crash, so handlers must
/// not leave side effects that double-apply.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn run(&self, job: &Job, ctx: &JobContext) -> WorkerResult<()>;
}

/// Handlers by job kind, built once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler.
    pub fn with_builtin() -> Self {
        Self::new()
            .register(CursorCsvHandler)
            .register(OffsetCsvHandler)
            .register(JsonLinesHandler)
    }

    /// Add a handler, replacing any earlier one for the same kind.
    pub fn register(mut self, handler: impl JobHandler + 'static) -> Self {
        self.handlers.insert(handler.kind(), Arc::new(handler));
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<JobKind> = self.handlers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}
