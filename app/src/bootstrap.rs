// ==============================================================================
// bootstrap.rs - Collaborator Construction
// ==============================================================================
// Description: Builds storage, resumable transport, queue, and session store
//              handles from configuration for the binaries
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use crate::config::{QueueConfig, StorageBackend, StorageConfig, UploadConfig};
use crate::queue::{RedisQueue, RetryPolicy};
use crate::storage::{LocalStorage, ObjectStorage, S3Storage};
use crate::upload::session::SESSION_TTL_SECS;
use crate::upload::{
    RedisSessionStore, ResumableTransport, ResumableUploader, TusTransport, UploadOrchestrator,
};
use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const UPLOAD_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Storage handle plus the local backend when it can also serve resumable uploads
pub struct StorageHandles {
    pub storage: Arc<dyn ObjectStorage>,
    local: Option<Arc<LocalStorage>>,
}

pub async fn connect_storage(config: &StorageConfig) -> Result<StorageHandles> {
    match &config.backend {
        StorageBackend::Local { root } => {
            let local = Arc::new(
                LocalStorage::new(root.clone())
                    .await
                    .with_context(|| format!("Failed to open storage root {}", root.display()))?,
            );
            Ok(StorageHandles {
                storage: local.clone(),
                local: Some(local),
            })
        }
        StorageBackend::S3(s3) => Ok(StorageHandles {
            storage: Arc::new(S3Storage::new(s3, &config.bucket)),
            local: None,
        }),
    }
}

/// Resumable transport for the configured endpoint
///
/// Falls back to the local filesystem backend when no endpoint is configured.
pub fn resumable_transport(
    config: &StorageConfig,
    handles: &StorageHandles,
) -> Result<Option<Arc<dyn ResumableTransport>>> {
    if let Some(endpoint) = &config.resumable_endpoint {
        let transport = TusTransport::new(endpoint, &config.bucket, config.api_key.clone())
            .context("Failed to configure resumable endpoint")?;
        info!("Resumable uploads via {}", transport.endpoint());
        return Ok(Some(Arc::new(transport)));
    }

    Ok(handles.local.clone().map(|local| {
        info!("Resumable uploads via {}", local.endpoint());
        local as Arc<dyn ResumableTransport>
    }))
}

/// Hourly removal of local resumable uploads abandoned past the session TTL
///
/// Does nothing unless the local backend is in use.
pub fn spawn_upload_cleanup(handles: &StorageHandles) {
    let Some(local) = handles.local.clone() else {
        return;
    };

    tokio::spawn(async move {
        let max_age = Duration::from_secs(SESSION_TTL_SECS);
        loop {
            if let Err(e) = local.sweep_stale_uploads(max_age).await {
                error!("Abandoned upload cleanup failed: {}", e);
            }
            tokio::time::sleep(UPLOAD_SWEEP_INTERVAL).await;
        }
    });
}

pub async fn connect_redis(url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(url).context("Failed to create Redis client")?;
    let conn = ConnectionManager::new(client)
        .await
        .context("Failed to create Redis connection manager")?;
    info!("Connected to Redis");
    Ok(conn)
}

pub fn task_queue(conn: ConnectionManager, config: &QueueConfig, consumer: &str) -> RedisQueue {
    RedisQueue::new(
        conn,
        consumer,
        RetryPolicy {
            max_attempts: config.max_attempts,
            base_delay: config.retry_base,
            max_delay: Duration::from_secs(15 * 60),
        },
    )
}

/// Orchestrator wired with the resumable path when a transport is available
pub fn upload_orchestrator(
    handles: &StorageHandles,
    transport: Option<Arc<dyn ResumableTransport>>,
    conn: ConnectionManager,
    upload: &UploadConfig,
) -> UploadOrchestrator {
    let resumable = transport.map(|transport| {
        ResumableUploader::new(
            transport,
            Arc::new(RedisSessionStore::new(conn)),
            upload.chunk_size,
            upload.retry.clone(),
        )
    });
    UploadOrchestrator::new(handles.storage.clone(), resumable)
}
