// ==============================================================================
// state.rs - Application State Management
// ==============================================================================
// Description: Shared collaborator handles for the API gateway
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use contact_import::bootstrap;
use contact_import::config::{QueueConfig, ServerConfig, StorageConfig, UploadConfig};
use contact_import::handoff::JobHandoff;
use contact_import::queue::TaskQueue;
use contact_import::storage::ObjectStorage;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    handoff: JobHandoff,
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<dyn TaskQueue>,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        handoff: JobHandoff,
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<dyn TaskQueue>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                handoff,
                storage,
                queue,
                max_upload_bytes,
            }),
        }
    }

    /// Connect every collaborator described by the environment
    pub async fn from_env(server: &ServerConfig) -> Result<Self> {
        let storage_config = StorageConfig::from_env()?;
        let upload_config = UploadConfig::from_env()?;
        let queue_config = QueueConfig::from_env()?;

        // Initialize object storage and the resumable transport
        let handles = bootstrap::connect_storage(&storage_config).await?;
        let transport = bootstrap::resumable_transport(&storage_config, &handles)?;

        // Start cleanup task for abandoned local uploads (runs every hour)
        bootstrap::spawn_upload_cleanup(&handles);

        // Initialize Redis for the task queue and upload sessions

        let redis = bootstrap::connect_redis(&queue_config.redis_url)
            .await
            .context("Redis is required for the task queue")?;
        let queue: Arc<dyn TaskQueue> =
            Arc::new(bootstrap::task_queue(redis.clone(), &queue_config, "gateway"));

        // Initialize the upload orchestrator and job handoff
        let uploads = Arc::new(bootstrap::upload_orchestrator(
            &handles,
            transport,
            redis,
            &upload_config,
        ));

        Ok(Self::new(
            JobHandoff::new(uploads, queue.clone()),
            handles.storage,
            queue,
            server.max_upload_bytes,
        ))
    }

    pub fn handoff(&self) -> &JobHandoff {
        &self.inner.handoff
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.inner.storage
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.inner.queue
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.inner.max_upload_bytes
    }
}
