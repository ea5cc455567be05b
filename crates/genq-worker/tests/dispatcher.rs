//! Dispatcher scenarios against the in-memory queue and broadcaster.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use genq_models::{Job, JobId, JobKind, ProgressEvent, ProgressState};
use genq_queue::{
    decode_message, AtomicStats, Broadcaster, Connection, ConnectionDirectory, ConsumerIdentity,
    InMemoryJobQueue, JobQueue, LocalBroadcaster, ProgressRelay, QueueResult, StatsStore,
};
use genq_worker::{
    Dispatcher, HandlerRegistry, JobContext, JobHandler, WorkerConfig, WorkerError, WorkerResult,
};
use tokio::sync::Semaphore;

/// Handler that blocks every run until the test opens the gate.
#[derive(Clone)]
struct GatedHandler {
    gate: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    runs: Arc<Mutex<HashMap<JobId, usize>>>,
}

impl GatedHandler {
    fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            running: Arc::default(),
            max_running: Arc::default(),
            runs: Arc::default(),
        }
    }

    fn open_gate(&self) -> Self {
        self.gate.add_permits(1_000);
        self.clone()
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    fn started(&self) -> usize {
        self.runs.lock().unwrap().values().sum()
    }

    fn runs_of(&self, id: &JobId) -> usize {
        self.runs.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl JobHandler for GatedHandler {
    fn kind(&self) -> JobKind {
        JobKind::CursorCsv
    }

    async fn run(&self, job: &Job, _ctx: &JobContext) -> WorkerResult<()> {
        *self.runs.lock().unwrap().entry(job.id.clone()).or_default() += 1;
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingHandler;

#[async_trait]
impl JobHandler for FailingHandler {
    fn kind(&self) -> JobKind {
        JobKind::OffsetCsv
    }

    async fn run(&self, _job: &Job, _ctx: &JobContext) -> WorkerResult<()> {
        Err(WorkerError::job_failed("record source unavailable"))
    }
}

struct PanickingHandler;

#[async_trait]
impl JobHandler for PanickingHandler {
    fn kind(&self) -> JobKind {
        JobKind::JsonLines
    }

    async fn run(&self, _job: &Job, _ctx: &JobContext) -> WorkerResult<()> {
        panic!("handler exploded");
    }
}

struct Node {
    queue: Arc<InMemoryJobQueue>,
    stats: Arc<AtomicStats>,
    broadcaster: Arc<LocalBroadcaster>,
}

impl Node {
    fn new() -> Self {
        Self {
            queue: Arc::new(InMemoryJobQueue::new()),
            stats: Arc::new(AtomicStats::new()),
            broadcaster: Arc::new(LocalBroadcaster::default()),
        }
    }

    fn dispatcher(&self, max: usize, handlers: HandlerRegistry, output: &std::path::Path) -> Arc<Dispatcher> {
        self.dispatcher_as("worker-test-1", max, handlers, output)
    }

    fn dispatcher_as(
        &self,
        consumer: &str,
        max: usize,
        handlers: HandlerRegistry,
        output: &std::path::Path,
    ) -> Arc<Dispatcher> {
        let config = WorkerConfig {
            max_concurrent_jobs: max,
            output_dir: output.to_path_buf(),
            tick_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(5),
            synthetic_rows: 50,
            ..WorkerConfig::default()
        };
        Arc::new(
            Dispatcher::new(
                config,
                self.queue.clone(),
                self.stats.clone(),
                self.broadcaster.clone(),
            )
            .with_handlers(handlers)
            .with_consumer(ConsumerIdentity::new(consumer))
            .with_claim_block(Duration::from_millis(20)),
        )
    }
}

fn spawn_run(dispatcher: &Arc<Dispatcher>) -> tokio::task::JoinHandle<WorkerResult<()>> {
    let dispatcher = Arc::clone(dispatcher);
    tokio::spawn(async move { dispatcher.run().await })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

async fn stop(dispatcher: &Arc<Dispatcher>, handle: tokio::task::JoinHandle<WorkerResult<()>>) {
    dispatcher.shutdown();
    tokio_test::assert_ok!(handle.await.unwrap());
}

#[tokio::test]
async fn never_runs_more_jobs_than_slots() {
    let node = Node::new();
    let dir = tempfile::tempdir().unwrap();
    let handler = GatedHandler::new();
    let dispatcher = node.dispatcher(
        2,
        HandlerRegistry::new().register(handler.clone()),
        dir.path(),
    );

    for owner in ["a", "b", "c"] {
        node.queue.append(&Job::new(JobKind::CursorCsv, owner)).await.unwrap();
    }

    let handle = spawn_run(&dispatcher);

    wait_until(|| handler.running() == 2).await;
    // Give a third claim every chance to happen
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.started(), 2);
    assert_eq!(dispatcher.processing().len(), 2);
    assert_eq!(node.queue.pending_count().await.unwrap(), 2);

    // Third job is claimed only once a slot frees up
    handler.release(1);
    wait_until(|| handler.started() == 3).await;

    handler.release(2);
    let stats = node.stats.clone();
    wait_until(|| dispatcher.processing().is_empty()).await;
    wait_until(|| stats.load().success == 3).await;

    assert_eq!(handler.max_running.load(Ordering::SeqCst), 2);
    assert_eq!(node.queue.len().await.unwrap(), 0);
    assert_eq!(node.queue.pending_count().await.unwrap(), 0);

    stop(&dispatcher, handle).await;
}

#[tokio::test]
async fn orphaned_job_is_recovered_and_completed_once() {
    let node = Node::new();
    let dir = tempfile::tempdir().unwrap();

    let job = Job::new(JobKind::CursorCsv, "u1");
    let original = node.queue.append(&job).await.unwrap();
    // A previous worker claimed it and died before acknowledging
    let claimed = node
        .queue
        .claim("worker-crashed-7", 1, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(claimed[0].position, original);

    let handler = GatedHandler::new().open_gate();
    let dispatcher = node.dispatcher(2, HandlerRegistry::new().register(handler.clone()), dir.path());
    let handle = spawn_run(&dispatcher);

    let stats = node.stats.clone();
    wait_until(|| stats.load().success == 1).await;
    // No second execution sneaks in afterwards
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop(&dispatcher, handle).await;

    assert_eq!(handler.runs_of(&job.id), 1);
    assert_eq!(node.stats.failure_count().await.unwrap(), 0);
    assert_eq!(node.queue.len().await.unwrap(), 0);
    assert_eq!(node.queue.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn failures_are_terminal_and_reported() {
    let node = Node::new();
    let dir = tempfile::tempdir().unwrap();
    let mut messages = node.broadcaster.subscribe().await.unwrap();

    let dispatcher = node.dispatcher(2, HandlerRegistry::new().register(FailingHandler), dir.path());
    let job = Job::new(JobKind::OffsetCsv, "carol");
    node.queue.append(&job).await.unwrap();
    let handle = spawn_run(&dispatcher);

    let mut states = Vec::new();
    while states.last() != Some(&ProgressState::Failed) {
        let raw = tokio::time::timeout(Duration::from_secs(5), messages.next())
            .await
            .unwrap()
            .unwrap();
        let (owner, payload) = decode_message(&raw).unwrap();
        assert_eq!(owner, "carol");
        let event: ProgressEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.job_id, job.id);
        if event.state == ProgressState::Failed {
            assert_eq!(
                event.error.as_deref(),
                Some("Job failed: record source unavailable")
            );
        }
        states.push(event.state);
    }
    assert_eq!(states, vec![ProgressState::Processing, ProgressState::Failed]);

    stop(&dispatcher, handle).await;
    assert_eq!(node.stats.failure_count().await.unwrap(), 1);
    assert_eq!(node.stats.success_count().await.unwrap(), 0);
    // Not redelivered
    assert_eq!(node.queue.len().await.unwrap(), 0);
    assert_eq!(node.queue.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn panics_and_unknown_kinds_count_as_failures() {
    let node = Node::new();
    let dir = tempfile::tempdir().unwrap();
    let handler = GatedHandler::new().open_gate();
    let registry = HandlerRegistry::new()
        .register(PanickingHandler)
        .register(handler.clone());
    let dispatcher = node.dispatcher(1, registry, dir.path());

    node.queue.append(&Job::new(JobKind::JsonLines, "u")).await.unwrap();
    // No handler registered for this kind
    node.queue.append(&Job::new(JobKind::OffsetCsv, "u")).await.unwrap();
    // The dispatcher keeps going afterwards
    node.queue.append(&Job::new(JobKind::CursorCsv, "u")).await.unwrap();

    let handle = spawn_run(&dispatcher);
    let stats = node.stats.clone();
    wait_until(|| stats.load().total() == 3).await;
    stop(&dispatcher, handle).await;

    let snapshot = node.stats.snapshot().await.unwrap();
    assert_eq!(snapshot.failure, 2);
    assert_eq!(snapshot.success, 1);
    assert_eq!(handler.started(), 1);
}

#[tokio::test]
async fn builtin_handler_writes_artifact_and_announces_it() {
    let node = Node::new();
    let dir = tempfile::tempdir().unwrap();
    let mut messages = node.broadcaster.subscribe().await.unwrap();

    let dispatcher = node.dispatcher(2, HandlerRegistry::with_builtin(), dir.path());
    let job = Job::new(JobKind::JsonLines, "dave");
    node.queue.append(&job).await.unwrap();
    let handle = spawn_run(&dispatcher);

    let completed = loop {
        let raw = tokio::time::timeout(Duration::from_secs(5), messages.next())
            .await
            .unwrap()
            .unwrap();
        let (_, payload) = decode_message(&raw).unwrap();
        let event: ProgressEvent = serde_json::from_str(payload).unwrap();
        if event.state.is_terminal() {
            break event;
        }
    };
    stop(&dispatcher, handle).await;

    assert_eq!(completed.state, ProgressState::Completed);
    assert_eq!(completed.percentage, 100);
    assert_eq!(
        completed.artifact_location.as_deref(),
        Some(job.artifact_location().as_str())
    );
    let body = std::fs::read_to_string(dir.path().join(&job.file_name)).unwrap();
    assert_eq!(body.lines().count(), 50);
}

#[derive(Default)]
struct Inbox {
    id: String,
    received: Mutex<Vec<String>>,
}

#[async_trait]
impl Connection for Inbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, payload: String) -> QueueResult<()> {
        self.received.lock().unwrap().push(payload);
        Ok(())
    }
}

#[tokio::test]
async fn progress_reaches_owner_on_another_node() {
    // Node A runs the job; the owner is connected to node B
    let node_a = Node::new();
    let dir = tempfile::tempdir().unwrap();

    let directory_b = Arc::new(ConnectionDirectory::new());
    let inbox = Arc::new(Inbox {
        id: "ws-1".to_string(),
        ..Default::default()
    });
    directory_b.on_connect("erin", inbox.clone());
    let relay_b = ProgressRelay::new(node_a.broadcaster.clone(), directory_b);

    let (relay_tx, relay_rx) = tokio::sync::watch::channel(false);
    let relay_handle = tokio::spawn(async move { relay_b.run(relay_rx).await });
    let broadcaster = node_a.broadcaster.clone();
    wait_until(|| broadcaster.subscriber_count() == 1).await;

    let dispatcher = node_a.dispatcher(1, HandlerRegistry::with_builtin(), dir.path());
    let job = Job::new(JobKind::CursorCsv, "erin");
    node_a.queue.append(&job).await.unwrap();
    let handle = spawn_run(&dispatcher);

    wait_until(|| {
        inbox
            .received
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.contains("\"COMPLETED\""))
    })
    .await;
    stop(&dispatcher, handle).await;
    relay_tx.send(true).unwrap();
    relay_handle.await.unwrap().unwrap();

    let received = inbox.received.lock().unwrap().clone();
    let states: Vec<ProgressState> = received
        .iter()
        .map(|p| serde_json::from_str::<ProgressEvent>(p).unwrap().state)
        .collect();
    assert_eq!(states.first(), Some(&ProgressState::Processing));
    assert_eq!(states.last(), Some(&ProgressState::Completed));
    assert_eq!(
        states.iter().filter(|s| **s == ProgressState::Completed).count(),
        1
    );
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_jobs() {
    let node = Node::new();
    let dir = tempfile::tempdir().unwrap();
    let handler = GatedHandler::new();
    let dispatcher = node.dispatcher(2, HandlerRegistry::new().register(handler.clone()), dir.path());

    node.queue.append(&Job::new(JobKind::CursorCsv, "u")).await.unwrap();
    let handle = spawn_run(&dispatcher);
    wait_until(|| handler.running() == 1).await;

    dispatcher.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    handler.release(1);
    handle.await.unwrap().unwrap();
    assert_eq!(node.stats.success_count().await.unwrap(), 1);
    assert_eq!(node.queue.len().await.unwrap(), 0);
}

#[tokio::test]
async fn shutdown_before_run_is_not_lost() {
    let node = Node::new();
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = node.dispatcher(2, HandlerRegistry::with_builtin(), dir.path());

    dispatcher.shutdown();
    let stopped = tokio::time::timeout(Duration::from_secs(2), dispatcher.run()).await;
    tokio_test::assert_ok!(stopped.unwrap());
}

#[tokio::test]
async fn duplicate_job_id_runs_once() {
    let node = Node::new();
    let dir = tempfile::tempdir().unwrap();
    let handler = GatedHandler::new();
    let dispatcher = node.dispatcher(2, HandlerRegistry::new().register(handler.clone()), dir.path());

    let job = Job::new(JobKind::CursorCsv, "u");
    node.queue.append(&job).await.unwrap();
    node.queue.append(&job).await.unwrap();
    let handle = spawn_run(&dispatcher);

    wait_until(|| handler.running() == 1).await;
    // The second entry is settled without running while the first is held at the gate
    let queue = node.queue.clone();
    for _ in 0..500 {
        if queue.len().await.unwrap() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(node.queue.len().await.unwrap(), 1);
    assert_eq!(handler.started(), 1);
    assert!(dispatcher.processing().contains(&job.id));

    handler.release(1);
    let stats = node.stats.clone();
    wait_until(|| stats.load().total() == 1).await;
    stop(&dispatcher, handle).await;

    assert_eq!(handler.runs_of(&job.id), 1);
    assert_eq!(node.stats.success_count().await.unwrap(), 1);
    assert_eq!(node.queue.len().await.unwrap(), 0);
    assert_eq!(node.queue.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn competing_workers_run_each_job_once() {
    let node = Node::new();
    let dir = tempfile::tempdir().unwrap();
    let handler = GatedHandler::new().open_gate();

    let first = node.dispatcher_as(
        "worker-host-a-1",
        2,
        HandlerRegistry::new().register(handler.clone()),
        dir.path(),
    );
    let second = node.dispatcher_as(
        "worker-host-b-2",
        3,
        HandlerRegistry::new().register(handler.clone()),
        dir.path(),
    );
    let first_handle = spawn_run(&first);
    let second_handle = spawn_run(&second);
    // Both finish startup recovery on the empty log before any job exists
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut jobs = Vec::new();
    for i in 0..40 {
        let job = Job::new(JobKind::CursorCsv, format!("owner-{}", i));
        node.queue.append(&job).await.unwrap();
        jobs.push(job);
    }

    let stats = node.stats.clone();
    wait_until(|| stats.load().total() == 40).await;
    // Nothing runs a second time after the last completion
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop(&first, first_handle).await;
    stop(&second, second_handle).await;

    for job in &jobs {
        assert_eq!(handler.runs_of(&job.id), 1, "job {} ran more than once", job.id);
    }
    let snapshot = node.stats.snapshot().await.unwrap();
    assert_eq!(snapshot.success + snapshot.failure, 40);
    assert!(handler.max_running.load(Ordering::SeqCst) <= 5);
    assert_eq!(node.queue.len().await.unwrap(), 0);
    assert_eq!(node.queue.pending_count().await.unwrap(), 0);
}
