// ==============================================================================
// job_processor.rs - Contact Import Processing Logic
// ==============================================================================
// Description: Download a staged artifact, validate its contacts, persist them
//              as one batch, and remove the artifact
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use contact_import::artifact::{parse_artifact, ArtifactError};
use contact_import::db::{ContactStore, ContactStoreError, InsertOutcome};
use contact_import::models::{ContactBatch, ImportTask, JobId};
use contact_import::storage::{ObjectStorage, StorageError};
use contact_import::validation::{contacts_from_values, ValidationError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    Dequeued,
    Downloading,
    Parsing,
    Validating,
    Persisting,
    CleaningUp,
    Done,
    Failed,
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessingStage::Dequeued => "dequeued",
            ProcessingStage::Downloading => "downloading",
            ProcessingStage::Parsing => "parsing",
            ProcessingStage::Validating => "validating",
            ProcessingStage::Persisting => "persisting",
            ProcessingStage::CleaningUp => "cleaning_up",
            ProcessingStage::Done => "done",
            ProcessingStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Failures that end the current attempt; the queue decides about retries
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to download artifact {artifact_key} for job {job_id}: {source}")]
    Download {
        job_id: JobId,
        artifact_key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to parse artifact for job {job_id}: {source}")]
    Parse {
        job_id: JobId,
        #[source]
        source: ArtifactError,
    },

    #[error("Invalid contacts in job {job_id}: {source}")]
    Validation {
        job_id: JobId,
        #[source]
        source: ValidationError,
    },

    #[error("Failed to persist contacts for job {job_id}: {source}")]
    Persist {
        job_id: JobId,
        #[source]
        source: ContactStoreError,
    },
}

impl ProcessError {
    /// Stage the attempt was in when it failed
    pub fn stage(&self) -> ProcessingStage {
        match self {
            ProcessError::Download { .. } => ProcessingStage::Downloading,
            ProcessError::Parse { .. } => ProcessingStage::Parsing,
            ProcessError::Validation { .. } => ProcessingStage::Validating,
            ProcessError::Persist { .. } => ProcessingStage::Persisting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub job_id: JobId,
    pub inserted: u64,
    /// An earlier delivery of the same job already persisted its contacts
    pub already_imported: bool,
    pub artifact_removed: bool,
}

/// Executes one import task against storage and the contact store
pub struct JobProcessor {
    storage: Arc<dyn ObjectStorage>,
    contacts: Arc<dyn ContactStore>,
}

impl JobProcessor {
    pub fn new(storage: Arc<dyn ObjectStorage>, contacts: Arc<dyn ContactStore>) -> Self {
        Self { storage, contacts }
    }

    pub async fn process(&self, task: &ImportTask) -> Result<ProcessOutcome, ProcessError> {
        let job_id = &task.job_id;
        debug!(stage = %ProcessingStage::Dequeued, artifact_key = %task.artifact_key, "Processing import task");

        // Step 1: Download the staged artifact
        debug!(stage = %ProcessingStage::Downloading, "Downloading artifact");
        let bytes = self
            .storage
            .download(&task.artifact_key)
            .await
            .map_err(|source| ProcessError::Download {
                job_id: job_id.clone(),
                artifact_key: task.artifact_key.clone(),
                source,
            })?;

        // Step 2: Parse either artifact shape (an empty artifact is an empty list)
        debug!(stage = %ProcessingStage::Parsing, bytes = bytes.len(), "Parsing artifact");
        let values = parse_artifact(&bytes).map_err(|source| ProcessError::Parse {
            job_id: job_id.clone(),
            source,
        })?;

        // Step 3: Validate every entry before anything is written
        debug!(stage = %ProcessingStage::Validating, entries = values.len(), "Validating contacts");
        let contacts = contacts_from_values(&values, "").map_err(|source| ProcessError::Validation {
            job_id: job_id.clone(),
            source,
        })?;

        // Step 4: Persist the batch under one timestamp
        debug!(stage = %ProcessingStage::Persisting, contacts = contacts.len(), "Persisting contacts");
        let batch = ContactBatch::new(job_id.clone(), task.source.clone(), contacts);
        let outcome = self
            .contacts
            .insert_batch(&batch)
            .await
            .map_err(|source| ProcessError::Persist {
                job_id: job_id.clone(),
                source,
            })?;

        let (inserted, already_imported) = match outcome {
            InsertOutcome::Inserted(count) => (count, false),
            InsertOutcome::AlreadyImported => {
                info!("Contacts for job {} were already imported", job_id);
                (0, true)
            }
        };

        // Step 5: Remove the artifact (best effort)
        debug!(stage = %ProcessingStage::CleaningUp, "Removing artifact");
        let artifact_removed = self.remove_artifact(task).await;

        info!(
            stage = %ProcessingStage::Done,
            inserted,
            "Imported {} contacts for job {}", inserted, job_id
        );

        Ok(ProcessOutcome {
            job_id: job_id.clone(),
            inserted,
            already_imported,
            artifact_removed,
        })
    }

    /// Remove the artifact of a task that will never be processed again
    ///
    /// Returns whether the artifact is gone; failures are only logged.
    pub async fn discard(&self, task: &ImportTask) -> bool {
        debug!(stage = %ProcessingStage::Failed, artifact_key = %task.artifact_key, "Discarding artifact");
        self.remove_artifact(task).await
    }

    async fn remove_artifact(&self, task: &ImportTask) -> bool {
        match self.storage.delete(&task.artifact_key).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    artifact_key = %task.artifact_key,
                    "Failed to remove artifact for job {}: {}", task.job_id, e
                );
                false
            }
        }
    }
}
