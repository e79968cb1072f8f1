// ==============================================================================
// handoff.rs - Import Job Handoff
// ==============================================================================
// Description: Stages a normalized payload and enqueues exactly one import
//              task referencing it
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use crate::models::{
    metadata_keys, ImportJob, ImportTask, JobId, NormalizedPayload, ObjectMetadata, IMPORT_TASK_NAME,
};
use crate::queue::{QueueError, TaskQueue};
use crate::upload::{UploadError, UploadOrchestrator, UploadRequest};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("Upload failed for job {job_id}: {source}")]
    Upload {
        job_id: JobId,
        #[source]
        source: UploadError,
    },

    #[error("Failed to enqueue import task for job {job_id}: {source}")]
    Enqueue {
        job_id: JobId,
        #[source]
        source: QueueError,
    },

    #[error("Failed to serialize import task for job {job_id}: {source}")]
    Serialize {
        job_id: JobId,
        #[source]
        source: serde_json::Error,
    },
}

pub struct JobHandoff {
    uploads: Arc<UploadOrchestrator>,
    queue: Arc<dyn TaskQueue>,
}

impl JobHandoff {
    pub fn new(uploads: Arc<UploadOrchestrator>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { uploads, queue }
    }

    /// Stage the payload, then enqueue its import task
    ///
    /// Nothing is enqueued unless staging completed. Enqueue failures are not
    /// retried; the caller must not report success.
    #[instrument(skip(self, payload), fields(source = %payload.source, job_id))]
    pub async fn submit(&self, payload: NormalizedPayload) -> Result<ImportJob, HandoffError> {
        let content_type = payload.content_type_or_default().to_string();

        // A resubmitted payload continues the job its interrupted upload belongs to
        let (job_id, artifact_key, metadata) = match self.interrupted_job(&payload, &content_type).await {
            Some(resumed) => resumed,
            None => {
                let job_id = JobId::generate();
                let artifact_key = job_id.artifact_key(payload.key_suffix.as_deref());
                let metadata = artifact_metadata(&job_id, &payload, &artifact_key);
                (job_id, artifact_key, metadata)
            }
        };
        tracing::Span::current().record("job_id", job_id.as_str());

        let request = UploadRequest {
            key: artifact_key.clone(),
            source: payload.source.clone(),
            bytes: payload.bytes,
            content_type,
            metadata,
            use_resumable: payload.use_resumable,
        };

        let outcome = self
            .uploads
            .upload(request)
            .await
            .map_err(|source| HandoffError::Upload {
                job_id: job_id.clone(),
                source,
            })?;

        info!(
            artifact_key = %outcome.key,
            bytes = outcome.bytes_total,
            resumable = outcome.location.is_some(),
            "Artifact staged"
        );

        let task = ImportTask {
            job_id: job_id.clone(),
            source: payload.source.clone(),
            artifact_key: artifact_key.clone(),
        };
        let task_payload = serde_json::to_value(&task).map_err(|source| HandoffError::Serialize {
            job_id: job_id.clone(),
            source,
        })?;

        let handle = match self.queue.enqueue(IMPORT_TASK_NAME, task_payload).await {
            Ok(handle) => handle,
            Err(source) => {
                error!(artifact_key = %artifact_key, "Artifact staged but task enqueue failed: {}", source);
                return Err(HandoffError::Enqueue { job_id, source });
            }
        };

        info!(task_id = %handle.id, "Import task enqueued");

        Ok(ImportJob {
            job_id,
            source: payload.source,
            artifact_key,
            task_id: handle.id,
        })
    }

    async fn interrupted_job(
        &self,
        payload: &NormalizedPayload,
        content_type: &str,
    ) -> Option<(JobId, String, ObjectMetadata)> {
        if !payload.use_resumable {
            return None;
        }

        let session = self
            .uploads
            .pending_session(&payload.source, content_type, &payload.bytes)
            .await?;
        let Some(job_id) = session.metadata.get(metadata_keys::JOB_ID).cloned().map(JobId::from) else {
            warn!(artifact_key = %session.key, "Upload session has no job id, starting a new job");
            return None;
        };

        info!(
            job_id = %job_id,
            artifact_key = %session.key,
            bytes_uploaded = session.bytes_uploaded,
            "Continuing interrupted upload"
        );
        Some((job_id, session.key, session.metadata))
    }
}

/// Caller metadata overlaid with the job fields, which always win
fn artifact_metadata(job_id: &JobId, payload: &NormalizedPayload, artifact_key: &str) -> ObjectMetadata {
    let mut metadata = payload.metadata.clone().unwrap_or_default();
    metadata.insert(metadata_keys::JOB_ID.to_string(), job_id.to_string());
    metadata.insert(metadata_keys::SOURCE.to_string(), payload.source.clone());
    metadata.insert(metadata_keys::ARTIFACT_KEY.to_string(), artifact_key.to_string());
    metadata.insert(metadata_keys::SUBMITTED_AT.to_string(), Utc::now().to_rfc3339());
    metadata
}
