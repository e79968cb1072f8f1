// ==============================================================================
// main.rs - Contact Import Worker Process
// ==============================================================================
// Description: Background worker that persists staged contact imports from
//              the Redis queue
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use contact_import::bootstrap;
use contact_import::config::{DatabaseConfig, QueueConfig, StorageConfig, WorkerConfig};
use contact_import::db::PgContactStore;
use contact_import::logging::init_tracing;
use std::sync::Arc;
use tracing::{info, warn};

mod job_processor;
mod runner;

use job_processor::JobProcessor;
use runner::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing("info");

    info!("Starting Contact Import Worker v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let worker_config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    let database_config = DatabaseConfig::from_env().context("Invalid database configuration")?;
    let storage_config = StorageConfig::from_env().context("Invalid storage configuration")?;
    let queue_config = QueueConfig::from_env().context("Invalid queue configuration")?;

    // Initialize database connection and schema
    let contacts = PgContactStore::connect(&database_config.url, database_config.max_connections)
        .await
        .context("Failed to connect to PostgreSQL")?;
    contacts.migrate().await.context("Failed to run database migrations")?;

    // Initialize object storage
    let handles = bootstrap::connect_storage(&storage_config).await?;

    // Initialize Redis queue under this worker's consumer name
    let redis = bootstrap::connect_redis(&queue_config.redis_url).await?;
    let queue = Arc::new(bootstrap::task_queue(redis, &queue_config, &worker_config.worker_id));

    // Start main processing loop
    let processor = Arc::new(JobProcessor::new(handles.storage, Arc::new(contacts)));

    Worker::new(queue, processor, worker_config)
        .run(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
