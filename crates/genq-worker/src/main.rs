//! File generation worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use genq_queue::{QueueConfig, RedisBroadcaster, RedisJobQueue, RedisStats};
use genq_worker::cleanup::run_cleanup_loop;
use genq_worker::{metrics, Dispatcher, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for rediss:// URLs)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("genq=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting genq-worker");

    let config = WorkerConfig::from_env();
    let queue_config = QueueConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        match metrics::init_metrics(port) {
            Ok(()) => info!("Metrics exporter listening on port {}", port),
            Err(e) => warn!("Metrics disabled: {}", e),
        }
    }

    let queue = match RedisJobQueue::new(queue_config.clone()) {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    let stats = match RedisStats::new(&queue_config.redis_url, &queue_config.stats_prefix) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create stats store: {}", e);
            std::process::exit(1);
        }
    };
    let broadcaster =
        match RedisBroadcaster::new(&queue_config.redis_url, &queue_config.progress_channel) {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to create progress broadcaster: {}", e);
                std::process::exit(1);
            }
        };

    let dispatcher = Arc::new(
        Dispatcher::new(
            config.clone(),
            Arc::new(queue),
            Arc::new(stats),
            Arc::new(broadcaster),
        )
        .with_claim_block(queue_config.claim_block),
    );

    let (cleanup_tx, cleanup_rx) = tokio::sync::watch::channel(false);
    let cleanup_task = tokio::spawn(run_cleanup_loop(
        config.output_dir.clone(),
        config.output_retention,
        config.cleanup_interval,
        cleanup_rx,
    ));

    // Setup signal handler
    let signal_dispatcher = Arc::clone(&dispatcher);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_dispatcher.shutdown();
    });

    let result = dispatcher.run().await;

    let _ = cleanup_tx.send(true);
    cleanup_task.await.ok();

    if let Err(e) = result {
        error!("Dispatcher error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
