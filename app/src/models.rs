// ==============================================================================
// models.rs - Contact Import Data Models
// ==============================================================================
// Description: Job identifiers, contact records, queued task payloads, and the
//              normalized upload payload shared by gateway and worker
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use validator::Validate;

/// Queue task name for the contact import handler
pub const IMPORT_TASK_NAME: &str = "import-contacts";

/// Length of the random suffix appended to job ids
const JOB_ID_SUFFIX_LEN: usize = 10;

/// Metadata attached to a staged artifact (lowercase, hyphenated keys)
pub type ObjectMetadata = BTreeMap<String, String>;

/// Metadata keys written onto every staged artifact
pub mod metadata_keys {
    pub const JOB_ID: &str = "job-id";
    pub const SOURCE: &str = "source";
    pub const ARTIFACT_KEY: &str = "artifact-key";
    pub const SUBMITTED_AT: &str = "submitted-at";
}

/// Opaque identifier for one import attempt
///
/// Format: `<unix-millis>-<10 lowercase alphanumerics>`. Unique per submission,
/// not per logical contact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh job id from the current time plus a random suffix
    pub fn generate() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(JOB_ID_SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();

        Self(format!("{}-{}", Utc::now().timestamp_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage key for this job's artifact
    ///
    /// JSON submissions stage under `import-<jobId>.json`; file and stream
    /// submissions append a suffix derived from the upload.
    pub fn artifact_key(&self, suffix: Option<&str>) -> String {
        match suffix {
            Some(suffix) => format!("import-{}-{}", self.0, suffix),
            None => format!("import-{}.json", self.0),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Contact as submitted by a client or read from a staged artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ContactInput {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,

    #[validate(email(message = "Invalid email"))]
    pub email: String,
}

/// Validated contacts for one job, stamped and ready for a single batch insert
#[derive(Debug, Clone)]
pub struct ContactBatch {
    pub job_id: JobId,
    pub source: String,
    pub imported_at: DateTime<Utc>,
    pub contacts: Vec<ContactInput>,
}

impl ContactBatch {
    pub fn new(job_id: JobId, source: String, contacts: Vec<ContactInput>) -> Self {
        Self {
            job_id,
            source,
            imported_at: Utc::now(),
            contacts,
        }
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

/// Payload of the queued import task
///
/// The artifact key travels explicitly so the worker never has to re-derive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportTask {
    pub job_id: JobId,
    pub source: String,
    pub artifact_key: String,
}

/// A staged and queued import, as reported back to the submitter
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub job_id: JobId,
    pub source: String,
    pub artifact_key: String,
    pub task_id: uuid::Uuid,
}

/// Uniform payload produced by every input adapter
#[derive(Debug, Clone)]
pub struct NormalizedPayload {
    pub bytes: Bytes,
    pub source: String,
    pub use_resumable: bool,
    pub content_type: Option<String>,
    pub metadata: Option<ObjectMetadata>,
    /// Appended to the artifact key for file and stream uploads
    pub key_suffix: Option<String>,
}

impl NormalizedPayload {
    pub fn content_type_or_default(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}

/// Make an uploaded file name safe to embed in a storage key
///
/// Returns `None` when nothing usable is left after sanitization.
pub fn sanitize_key_suffix(name: &str) -> Option<String> {
    let safe: String = name
        .replace(['/', '\\', '\0'], "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.' || *c == '-')
        .take(128)
        .collect();

    let trimmed = safe.trim_start_matches('.');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
