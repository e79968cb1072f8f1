// ==============================================================================
// upload/mod.rs - Upload Orchestrator
// ==============================================================================
// Description: Stages artifact bytes either with one direct write or through
//              the chunked resumable protocol
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use crate::models::ObjectMetadata;
use crate::storage::{ObjectStorage, StorageError};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub mod fingerprint;
pub mod resumable;
pub mod retry;
pub mod session;
pub mod transport;
pub mod tus;

pub use resumable::{ResumableUploader, UploadState, DEFAULT_CHUNK_SIZE};
pub use retry::RetrySchedule;
pub use session::{RedisSessionStore, SessionError, SessionStore, UploadSession};
pub use transport::{CreateUpload, ResumableEndpoint, ResumableTransport, TransportError};
pub use tus::TusTransport;

/// Progress callback, invoked with `(bytes_uploaded, bytes_total)`
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to stage artifact {key}: {source}")]
    Storage {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Resumable upload of {key} rejected: {source}")]
    Rejected {
        key: String,
        #[source]
        source: TransportError,
    },

    #[error("Resumable upload of {key} failed at offset {offset} after {retries} retries: {source}")]
    RetriesExhausted {
        key: String,
        retries: usize,
        offset: u64,
        #[source]
        source: TransportError,
    },

    #[error("Resumable upload of {key} lost its server session at offset {offset}")]
    SessionLost { key: String, offset: u64 },
}

/// Everything needed to stage one artifact
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub key: String,
    /// Who the payload was submitted for; part of the resume identity
    pub source: String,
    pub bytes: Bytes,
    pub content_type: String,
    pub metadata: ObjectMetadata,
    pub use_resumable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub key: String,
    /// Server location of the resumable upload; `None` for direct writes
    pub location: Option<String>,
    pub bytes_total: u64,
    /// Offset an interrupted upload was resumed from
    pub resumed_from: Option<u64>,
}

pub struct UploadOrchestrator {
    storage: Arc<dyn ObjectStorage>,
    resumable: Option<ResumableUploader>,
}

impl UploadOrchestrator {
    pub fn new(storage: Arc<dyn ObjectStorage>, resumable: Option<ResumableUploader>) -> Self {
        Self { storage, resumable }
    }

    /// Session an earlier, interrupted attempt left for this exact payload
    ///
    /// Always `None` without a resumable transport.
    pub async fn pending_session(
        &self,
        source: &str,
        content_type: &str,
        content: &[u8],
    ) -> Option<UploadSession> {
        match &self.resumable {
            Some(uploader) => uploader.pending_session(source, content_type, content).await,
            None => None,
        }
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<UploadOutcome, UploadError> {
        self.upload_with_progress(request, &|_, _| {}).await
    }

    pub async fn upload_with_progress(
        &self,
        request: UploadRequest,
        progress: ProgressFn<'_>,
    ) -> Result<UploadOutcome, UploadError> {
        match (&self.resumable, request.use_resumable) {
            (Some(uploader), true) => uploader.upload(&request, progress).await,
            (None, true) => {
                warn!(key = %request.key, "No resumable transport configured, using direct upload");
                self.direct(request, progress).await
            }
            (_, false) => self.direct(request, progress).await,
        }
    }

    async fn direct(
        &self,
        request: UploadRequest,
        progress: ProgressFn<'_>,
    ) -> Result<UploadOutcome, UploadError> {
        let total = request.bytes.len() as u64;

        self.storage
            .upload(&request.key, request.bytes, &request.content_type, &request.metadata)
            .await
            .map_err(|source| UploadError::Storage {
                key: request.key.clone(),
                source,
            })?;

        progress(total, total);
        info!(key = %request.key, bytes = total, "Direct upload complete");

        Ok(UploadOutcome {
            key: request.key,
            location: None,
            bytes_total: total,
            resumed_from: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemorySessionStore, MemoryStorage, MemoryTransport};

    fn request(use_resumable: bool) -> UploadRequest {
        let mut metadata = ObjectMetadata::new();
        metadata.insert("job-id".to_string(), "1-abc".to_string());
        metadata.insert("source".to_string(), "acme".to_string());

        UploadRequest {
            key: "import-1-abc.json".to_string(),
            source: "acme".to_string(),
            bytes: Bytes::from_static(br#"[{"name":"A","email":"a@x.io"}]"#),
            content_type: "application/json".to_string(),
            metadata,
            use_resumable,
        }
    }

    #[tokio::test]
    async fn test_direct_upload_writes_object_and_metadata() {
        let storage = Arc::new(MemoryStorage::new());
        let orchestrator = UploadOrchestrator::new(storage.clone(), None);

        let outcome = orchestrator.upload(request(false)).await.unwrap();

        assert_eq!(outcome.location, None);
        let object = storage.object("import-1-abc.json").unwrap();
        assert_eq!(object.content_type, "application/json");
        assert_eq!(object.metadata.get("source").map(String::as_str), Some("acme"));
    }

    #[tokio::test]
    async fn test_direct_upload_failure_is_reported() {
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_uploads(true);
        let orchestrator = UploadOrchestrator::new(storage.clone(), None);

        let err = orchestrator.upload(request(false)).await.unwrap_err();

        assert!(matches!(err, UploadError::Storage { .. }));
        assert!(storage.object("import-1-abc.json").is_none());
    }

    #[tokio::test]
    async fn test_resumable_flag_selects_transport() {
        let storage = Arc::new(MemoryStorage::new());
        let transport = Arc::new(MemoryTransport::with_sink(storage.clone()));
        let uploader = ResumableUploader::new(
            transport.clone(),
            Arc::new(MemorySessionStore::new()),
            DEFAULT_CHUNK_SIZE,
            RetrySchedule::none(),
        );
        let orchestrator = UploadOrchestrator::new(storage.clone(), Some(uploader));

        let outcome = orchestrator.upload(request(true)).await.unwrap();

        assert!(outcome.location.is_some());
        assert_eq!(transport.append_calls(), 1);
        let object = storage.object("import-1-abc.json").unwrap();
        assert_eq!(object.metadata.get("job-id").map(String::as_str), Some("1-abc"));
    }

    #[tokio::test]
    async fn test_resumable_without_transport_falls_back_to_direct() {
        let storage = Arc::new(MemoryStorage::new());
        let orchestrator = UploadOrchestrator::new(storage.clone(), None);

        let outcome = orchestrator.upload(request(true)).await.unwrap();

        assert_eq!(outcome.location, None);
        assert!(storage.object("import-1-abc.json").is_some());
        assert!(orchestrator
            .pending_session("acme", "application/json", b"[]")
            .await
            .is_none());
    }
}
