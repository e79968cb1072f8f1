// ==============================================================================
// upload/transport.rs - Resumable Upload Transport
// ==============================================================================
// Description: Contract for chunked, offset-addressed uploads and resolution
//              of the resumable endpoint
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use crate::models::ObjectMetadata;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Worth retrying after re-reading the server offset
    #[error("Transient transport failure: {0}")]
    Transient(String),

    #[error("Upload rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// Parameters for opening a new resumable upload
#[derive(Debug, Clone)]
pub struct CreateUpload {
    pub key: String,
    pub content_type: String,
    pub total: u64,
    pub metadata: ObjectMetadata,
}

/// Server side of a chunked upload
///
/// Locations are opaque strings owned by the transport. Offsets are the number
/// of bytes the server has durably acknowledged.
#[async_trait]
pub trait ResumableTransport: Send + Sync {
    /// Stable identifier of the endpoint, part of the upload fingerprint
    fn endpoint(&self) -> &str;

    async fn create(&self, request: &CreateUpload) -> Result<String, TransportError>;

    /// `None` when the upload is unknown or has expired
    async fn offset(&self, location: &str) -> Result<Option<u64>, TransportError>;

    /// Append `chunk` at `offset`, returning the new acknowledged offset
    async fn append(&self, location: &str, offset: u64, chunk: Bytes) -> Result<u64, TransportError>;
}

/// Where resumable uploads are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumableEndpoint {
    Local { url: String },
    Hosted { project_ref: String },
}

impl ResumableEndpoint {
    pub fn url(&self) -> String {
        match self {
            ResumableEndpoint::Local { url } => url.clone(),
            ResumableEndpoint::Hosted { project_ref } => format!(
                "https://{}.storage.supabase.co/storage/v1/upload/resumable",
                project_ref
            ),
        }
    }
}
