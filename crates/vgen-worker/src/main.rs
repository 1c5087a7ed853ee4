//! Video generation worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgen_queue::{JobQueue, QueueConfig};
use vgen_worker::{JobExecutor, WorkerConfig, WorkerContext};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install rustls crypto provider");
        std::process::exit(1);
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting vgen-worker");

    if let Ok(addr) = std::env::var("WORKER_METRICS_ADDR") {
        match addr.parse::<SocketAddr>() {
            Ok(addr) => match PrometheusBuilder::new().with_http_listener(addr).install() {
                Ok(()) => info!("Metrics exporter listening on {}", addr),
                Err(e) => error!("Failed to install metrics exporter: {}", e),
            },
            Err(e) => error!("Invalid WORKER_METRICS_ADDR '{}': {}", addr, e),
        }
    }

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let queue_config = QueueConfig::from_env();
    let redis_url = queue_config.redis_url.clone();

    let queue = match JobQueue::new(queue_config) {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };

    let ctx = match WorkerContext::from_env(config, &redis_url) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to create worker context: {}", e.detail());
            std::process::exit(1);
        }
    };

    let executor = Arc::new(JobExecutor::new(queue, ctx));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e.detail());
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
    // JSON in production, colored output for dev
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vgen=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}
