//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use genq_api::{create_router, metrics, ApiConfig, AppState, QueueBackend};
use genq_queue::QueueConfig;
use genq_worker::cleanup::run_cleanup_loop;
use genq_worker::{Dispatcher, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rediss:// URLs)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

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

    info!("Starting genq-api");

    let config = ApiConfig::from_env();
    let queue_config = QueueConfig::from_env();
    let mut worker_config = WorkerConfig::from_env();
    worker_config.output_dir = config.output_dir.clone();
    info!(
        "API config: host={}, port={}, backend={:?}",
        config.host, config.port, config.queue_backend
    );

    let state = match config.queue_backend {
        QueueBackend::Redis => {
            match AppState::redis(config.clone(), &queue_config, worker_config.max_concurrent_jobs)
            {
                Ok(s) => s,
                Err(e) => {
                    error!("Failed to create application state: {}", e);
                    std::process::exit(1);
                }
            }
        }
        QueueBackend::Memory => {
            AppState::in_memory(config.clone(), worker_config.max_concurrent_jobs)
        }
    };

    let metrics_handle = if config.metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!("Metrics disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = state.relay.clone();
    let relay_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = relay.run(shutdown).await {
                error!("Progress relay error: {}", e);
            }
        }
    });

    // Single-process mode: this process is also the worker
    let embedded = match config.queue_backend {
        QueueBackend::Memory => {
            let dispatcher = Arc::new(
                Dispatcher::new(
                    worker_config.clone(),
                    Arc::clone(&state.queue),
                    Arc::clone(&state.stats),
                    Arc::clone(state.relay.broadcaster()),
                )
                .with_claim_block(queue_config.claim_block),
            );
            let dispatcher_task = tokio::spawn({
                let dispatcher = Arc::clone(&dispatcher);
                async move {
                    if let Err(e) = dispatcher.run().await {
                        error!("Dispatcher error: {}", e);
                    }
                }
            });
            let cleanup_task = tokio::spawn(run_cleanup_loop(
                worker_config.output_dir.clone(),
                worker_config.output_retention,
                worker_config.cleanup_interval,
                shutdown_rx.clone(),
            ));
            info!("Embedded dispatcher started");
            Some((dispatcher, dispatcher_task, cleanup_task))
        }
        QueueBackend::Redis => None,
    };

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address: {}", e);
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    let _ = shutdown_tx.send(true);
    if let Some((dispatcher, dispatcher_task, cleanup_task)) = embedded {
        dispatcher.shutdown();
        dispatcher_task.await.ok();
        cleanup_task.await.ok();
    }
    relay_task.await.ok();

    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Received shutdown signal");
}
