// ==============================================================================
// storage/mod.rs - Object Storage Collaborator
// ==============================================================================
// Description: Storage trait for staged import artifacts plus S3 and local
//              filesystem backends
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use crate::models::ObjectMetadata;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod local;
pub mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Key/value object store holding staged artifacts
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Write the whole buffer under `key` with its content type and metadata
    async fn upload(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError>;

    async fn download(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Remove an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Metadata attached at upload time
    async fn metadata(&self, key: &str) -> Result<ObjectMetadata, StorageError>;

    /// Cheap reachability check used by the readiness endpoint
    async fn ping(&self) -> Result<(), StorageError>;
}

/// Reject keys that could escape a bucket prefix or a storage root
pub(crate) fn check_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");

    if bad {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_key() {
        assert!(check_key("import-1-abc.json").is_ok());
        assert!(check_key("imports/2026/import-1-abc.json").is_ok());

        assert!(check_key("").is_err());
        assert!(check_key("/etc/passwd").is_err());
        assert!(check_key("../escape").is_err());
        assert!(check_key("a//b").is_err());
        assert!(check_key("a\\b").is_err());
    }
}
