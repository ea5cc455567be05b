//! Bounded-concurrency job dispatcher.
//!
//! A slot (semaphore permit) is taken before every claim and released only
//! after the claimed job has been acknowledged, so a process never holds more
//! claimed entries than it has slots.

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use genq_models::Job;
use genq_queue::{
    recover_pending, Broadcaster, ConsumerIdentity, JobQueue, LogEntry, ProgressReporter,
    StatsStore,
};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

use crate::config::WorkerConfig;
use crate::context::JobContext;
use crate::error::{WorkerError, WorkerResult};
use crate::handlers::HandlerRegistry;
use crate::logging::JobLogger;
use crate::metrics;
use crate::processing::ProcessingSet;
use crate::records::{RecordSource, SyntheticRecordSource};

/// State shared between the claim loop and the job tasks it spawns.
#[derive(Clone)]
struct Shared {
    queue: Arc<dyn JobQueue>,
    stats: Arc<dyn StatsStore>,
    broadcaster: Arc<dyn Broadcaster>,
    handlers: Arc<HandlerRegistry>,
    records: Arc<dyn RecordSource>,
    processing: Arc<ProcessingSet>,
    output_dir: PathBuf,
    chunk_size: usize,
    progress_every: u64,
}

/// Claims jobs from the log and runs them, at most `max_concurrent_jobs` at a time.
pub struct Dispatcher {
    config: WorkerConfig,
    consumer: ConsumerIdentity,
    claim_block: Duration,
    semaphore: Arc<Semaphore>,
    shared: Shared,
    shutdown: watch::Sender<bool>,
}

impl Dispatcher {
    /// Dispatcher with the built-in handlers and a synthetic record source.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        stats: Arc<dyn StatsStore>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let max = config.max_concurrent_jobs.max(1);
        let (shutdown, _) = watch::channel(false);

        let shared = Shared {
            queue,
            stats,
            broadcaster,
            handlers: Arc::new(HandlerRegistry::with_builtin()),
            records: Arc::new(SyntheticRecordSource::new(config.synthetic_rows)),
            processing: Arc::new(ProcessingSet::new(max)),
            output_dir: config.output_dir.clone(),
            chunk_size: config.chunk_size,
            progress_every: config.progress_every,
        };

        Self {
            consumer: ConsumerIdentity::from_env(),
            claim_block: Duration::from_secs(1),
            semaphore: Arc::new(Semaphore::new(max)),
            shared,
            shutdown,
            config,
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.shared.handlers = Arc::new(handlers);
        self
    }

    pub fn with_consumer(mut self, consumer: ConsumerIdentity) -> Self {
        self.consumer = consumer;
        self
    }

    /// How long a single claim waits on an empty log.
    pub fn with_claim_block(mut self, block: Duration) -> Self {
        self.claim_block = block;
        self
    }

    pub fn consumer(&self) -> &ConsumerIdentity {
        &self.consumer
    }

    pub fn processing(&self) -> &Arc<ProcessingSet> {
        &self.shared.processing
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.shared.processing.capacity()
    }

    /// Recover orphaned entries, then claim and run jobs until shut down.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting dispatcher '{}' with {} max concurrent jobs",
            self.consumer,
            self.max_concurrent_jobs()
        );

        self.shared.queue.init().await?;

        // Must finish before the first claim, or this node's own claims would be re-queued
        let report = recover_pending(self.shared.queue.as_ref()).await?;
        metrics::record_jobs_recovered(report.recovered);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping dispatcher");
                        break;
                    }
                }
                _ = self.claim_next() => {}
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "{} jobs still running after {:?}; they will be recovered on next start",
                self.shared.processing.len(),
                self.config.shutdown_timeout
            );
        }

        info!("Dispatcher stopped");
        Ok(())
    }

    /// Signal shutdown. Takes effect even before `run` has subscribed.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Take a slot, claim one entry and start it. Returns once the entry is
    /// running or the claim came back empty.
    async fn claim_next(&self) {
        let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return;
        };

        match self
            .shared
            .queue
            .claim(self.consumer.as_str(), 1, self.claim_block)
            .await
        {
            Ok(entries) => match entries.into_iter().next() {
                Some(entry) => self.start(entry, permit),
                None => {
                    drop(permit);
                    if self.claim_block.is_zero() {
                        tokio::time::sleep(self.config.tick_interval).await;
                    }
                }
            },
            Err(e) => {
                drop(permit);
                error!("Error claiming jobs: {}", e);
                tokio::time::sleep(self.config.tick_interval).await;
            }
        }
    }

    fn start(&self, entry: LogEntry, permit: OwnedSemaphorePermit) {
        if !self.shared.processing.insert(entry.job.id.clone()) {
            // The running copy reports the outcome; this entry is only settled
            JobLogger::new(&entry.job).log_warning(&format!(
                "already executing in this process, discarding entry {}",
                entry.position
            ));
            let queue = Arc::clone(&self.shared.queue);
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = queue.ack_and_delete(&entry.position).await {
                    error!(position = %entry.position, "Failed to discard duplicate entry: {}", e);
                }
            });
            return;
        }
        debug!(
            job_id = %entry.job.id,
            position = %entry.position,
            consumer = %self.consumer,
            "Claimed job"
        );

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let _permit = permit;
            shared.execute(entry).await;
        });
    }

    /// Wait until every slot is free again.
    async fn wait_for_jobs(&self) {
        let all = self.max_concurrent_jobs() as u32;
        let _ = self.semaphore.acquire_many(all).await;
    }
}

impl Shared {
    async fn execute(&self, entry: LogEntry) {
        let LogEntry { position, job } = entry;
        let logger = JobLogger::new(&job);
        let reporter =
            ProgressReporter::new(Arc::clone(&self.broadcaster), job.owner.clone(), job.id.clone());

        metrics::record_job_claimed(job.kind);
        metrics::set_jobs_in_flight(self.processing.len());
        reporter.started().await;
        logger.log_start(&format!("claimed at {}", position));

        let started = Instant::now();
        let result = self
            .run_handler(&job, reporter.clone())
            .instrument(logger.create_span())
            .await;
        let elapsed = started.elapsed();

        if let Err(e) = self.queue.ack_and_delete(&position).await {
            error!(job_id = %job.id, position = %position, "Failed to ack job: {}", e);
        }
        self.processing.remove(&job.id);
        metrics::set_jobs_in_flight(self.processing.len());

        match result {
            Ok(()) => {
                if let Err(e) = self.stats.record_success().await {
                    warn!(job_id = %job.id, "Failed to record success: {}", e);
                }
                metrics::record_job_completed(job.kind, elapsed);
                logger.log_completion(&format!("in {:.2}s", elapsed.as_secs_f64()));
                reporter.completed(job.artifact_location()).await;
            }
            Err(e) => {
                if let Err(stats_err) = self.stats.record_failure().await {
                    warn!(job_id = %job.id, "Failed to record failure: {}", stats_err);
                }
                metrics::record_job_failed(job.kind, elapsed);
                logger.log_error(&e.to_string());
                reporter.failed(e.to_string()).await;
            }
        }
    }

    /// Run the job body in its own task so a panic surfaces as an error.
    async fn run_handler(&self, job: &Job, progress: ProgressReporter) -> WorkerResult<()> {
        let handler = self
            .handlers
            .get(job.kind)
            .ok_or(WorkerError::UnsupportedKind(job.kind))?;

        let ctx = JobContext {
            records: Arc::clone(&self.records),
            progress,
            output_dir: self.output_dir.clone(),
            chunk_size: self.chunk_size,
            progress_every: self.progress_every,
        };
        let job = job.clone();

        match tokio::spawn(async move { handler.run(&job, &ctx).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(WorkerError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(WorkerError::job_failed(format!("job task aborted: {}", e))),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
