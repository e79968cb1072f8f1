// ==============================================================================
// storage/local.rs - Local Filesystem Object Storage
// ==============================================================================
// Description: Directory-backed ObjectStorage for development volumes, also
//              serving as the resumable transport when no tus endpoint is set
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
//
// Layout under the root:
//   objects/<key>            staged artifact bytes
//   metadata/<key>.json      content type + attached metadata
//   uploads/<id>.part        bytes received so far for a resumable upload
//   uploads/<id>.json        resumable upload state, removed on completion
//   tmp/                     scratch files renamed into place
//
// ==============================================================================

use super::{check_key, ObjectStorage, StorageError};
use crate::models::ObjectMetadata;
use crate::upload::{CreateUpload, ResumableTransport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct StoredMetadata {
    content_type: String,
    metadata: ObjectMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct UploadState {
    key: String,
    content_type: String,
    total: u64,
    metadata: ObjectMetadata,
}

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    endpoint: String,
}

impl LocalStorage {
    /// Open (creating if needed) a storage root
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        for dir in ["objects", "metadata", "uploads", "tmp"] {
            fs::create_dir_all(root.join(dir)).await?;
        }

        let endpoint = format!("local://{}", root.display());
        info!("Local storage initialized at {}", root.display());

        Ok(Self { root, endpoint })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join("objects").join(key)
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join("metadata").join(format!("{}.json", key))
    }

    fn upload_paths(&self, id: &str) -> (PathBuf, PathBuf) {
        let dir = self.root.join("uploads");
        (dir.join(format!("{}.part", id)), dir.join(format!("{}.json", id)))
    }

    /// Write to a scratch file, then rename over the destination
    async fn write_atomic(&self, dest: &Path, data: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.root.join("tmp").join(Uuid::new_v4().to_string());
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, dest).await?;
        Ok(())
    }

    async fn write_metadata(
        &self,
        key: &str,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        let doc = StoredMetadata {
            content_type: content_type.to_string(),
            metadata: metadata.clone(),
        };
        let json = serde_json::to_vec(&doc).map_err(|e| StorageError::Backend(e.to_string()))?;
        self.write_atomic(&self.metadata_path(key), &json).await
    }

    fn upload_id<'a>(&self, location: &'a str) -> Result<&'a str, TransportError> {
        let id = location
            .strip_prefix(&self.endpoint)
            .and_then(|rest| rest.strip_prefix("/uploads/"))
            .ok_or_else(|| TransportError::Rejected(format!("Unknown upload location: {}", location)))?;

        if Uuid::parse_str(id).is_err() {
            return Err(TransportError::Rejected(format!("Unknown upload location: {}", location)));
        }
        Ok(id)
    }

    async fn load_state(&self, id: &str) -> Result<Option<UploadState>, TransportError> {
        let (_, state_path) = self.upload_paths(id);
        match fs::read(&state_path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| TransportError::Rejected(format!("Corrupt upload state: {}", e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(transient(e)),
        }
    }

    async fn save_state(&self, id: &str, state: &UploadState) -> Result<(), TransportError> {
        let (_, state_path) = self.upload_paths(id);
        let json = serde_json::to_vec(state)
            .map_err(|e| TransportError::Rejected(format!("Unserializable upload state: {}", e)))?;
        self.write_atomic(&state_path, &json)
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))
    }

    /// Move a fully received upload into the object namespace
    async fn promote(&self, id: &str, state: &UploadState) -> Result<(), TransportError> {
        let (part_path, state_path) = self.upload_paths(id);
        let dest = self.object_path(&state.key);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(transient)?;
        }
        fs::rename(&part_path, &dest).await.map_err(transient)?;
        self.write_metadata(&state.key, &state.content_type, &state.metadata)
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        match fs::remove_file(&state_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove state of upload {}: {}", id, e),
        }

        info!("Resumable upload {} promoted to {}", id, state.key);
        Ok(())
    }

    /// Remove resumable uploads untouched for longer than `max_age`
    ///
    /// Returns how many abandoned uploads were removed.
    pub async fn sweep_stale_uploads(&self, max_age: Duration) -> Result<usize, StorageError> {
        let mut entries = fs::read_dir(self.root.join("uploads")).await?;
        let mut swept = BTreeSet::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            // Clock skew reads as fresh
            let stale = modified.elapsed().map_or(false, |age| age > max_age);
            if !stale {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
            if let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) {
                swept.insert(id.to_string());
            }
        }

        if !swept.is_empty() {
            info!("Removed {} abandoned resumable uploads", swept.len());
        }
        Ok(swept.len())
    }
}

fn transient(err: std::io::Error) -> TransportError {
    TransportError::Transient(err.to_string())
}

fn not_found_as(key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    #[instrument(skip(self, bytes, metadata), fields(size = bytes.len()))]
    async fn upload(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        check_key(key)?;

        self.write_atomic(&self.object_path(key), &bytes).await?;
        self.write_metadata(key, content_type, metadata).await?;

        debug!("Stored {} bytes under {}", bytes.len(), key);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        check_key(key)?;
        let data = fs::read(self.object_path(key))
            .await
            .map_err(|e| not_found_as(key, e))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        check_key(key)?;

        for path in [self.object_path(key), self.metadata_path(key)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }

        debug!("Deleted {}", key);
        Ok(())
    }

    async fn metadata(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        check_key(key)?;
        let raw = fs::read(self.metadata_path(key))
            .await
            .map_err(|e| not_found_as(key, e))?;
        let doc: StoredMetadata =
            serde_json::from_slice(&raw).map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(doc.metadata)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let meta = fs::metadata(&self.root).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(StorageError::Backend(format!(
                "Storage root is not a directory: {}",
                self.root.display()
            )))
        }
    }
}

#[async_trait]
impl ResumableTransport for LocalStorage {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn create(&self, request: &CreateUpload) -> Result<String, TransportError> {
        check_key(&request.key).map_err(|e| TransportError::Rejected(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let (part_path, _) = self.upload_paths(&id);
        fs::File::create(&part_path).await.map_err(transient)?;

        let state = UploadState {
            key: request.key.clone(),
            content_type: request.content_type.clone(),
            total: request.total,
            metadata: request.metadata.clone(),
        };
        self.save_state(&id, &state).await?;

        if request.total == 0 {
            self.promote(&id, &state).await?;
        }

        Ok(format!("{}/uploads/{}", self.endpoint, id))
    }

    async fn offset(&self, location: &str) -> Result<Option<u64>, TransportError> {
        let id = self.upload_id(location)?;
        if self.load_state(id).await?.is_none() {
            return Ok(None);
        }

        let (part_path, _) = self.upload_paths(id);
        match fs::metadata(&part_path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(transient(e)),
        }
    }

    async fn append(&self, location: &str, offset: u64, chunk: Bytes) -> Result<u64, TransportError> {
        let id = self.upload_id(location)?;
        let state = self
            .load_state(id)
            .await?
            .ok_or_else(|| TransportError::Rejected(format!("Upload expired or complete: {}", location)))?;

        let end = offset + chunk.len() as u64;
        if end > state.total {
            return Err(TransportError::Rejected(format!(
                "Chunk ends at {} past declared length {}",
                end, state.total
            )));
        }

        let (part_path, _) = self.upload_paths(id);
        let current = fs::metadata(&part_path).await.map_err(transient)?.len();
        if current != offset {
            return Err(TransportError::Transient(format!(
                "Offset mismatch: expected {}, got {}",
                current, offset
            )));
        }

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&part_path)
            .await
            .map_err(transient)?;
        file.write_all(&chunk).await.map_err(transient)?;
        file.sync_data().await.map_err(transient)?;
        drop(file);

        if end == state.total {
            self.promote(id, &state).await?;
        }

        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_metadata() -> ObjectMetadata {
        let mut metadata = ObjectMetadata::new();
        metadata.insert("job-id".to_string(), "1-abc".to_string());
        metadata.insert("source".to_string(), "acme".to_string());
        metadata
    }

    fn upload_files(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path().join("uploads"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn create_request(key: &str, total: u64) -> CreateUpload {
        CreateUpload {
            key: key.to_string(),
            content_type: "application/octet-stream".to_string(),
            total,
            metadata: ObjectMetadata::new(),
        }
    }

    #[tokio::test]
    async fn test_upload_download_delete() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        storage
            .upload("import-1-abc.json", Bytes::from_static(b"[]"), "application/json", &sample_metadata())
            .await
            .unwrap();

        assert_eq!(storage.download("import-1-abc.json").await.unwrap(), Bytes::from_static(b"[]"));
        assert_eq!(storage.metadata("import-1-abc.json").await.unwrap(), sample_metadata());

        storage.delete("import-1-abc.json").await.unwrap();
        assert!(matches!(
            storage.download("import-1-abc.json").await,
            Err(StorageError::NotFound(_))
        ));

        // Deleting again is not an error
        storage.delete("import-1-abc.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let result = storage
            .upload("../outside", Bytes::from_static(b"x"), "text/plain", &ObjectMetadata::new())
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_resumable_upload_promotes_on_final_chunk() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let location = storage
            .create(&CreateUpload {
                key: "import-1-abc-stream".to_string(),
                content_type: "application/octet-stream".to_string(),
                total: 10,
                metadata: sample_metadata(),
            })
            .await
            .unwrap();

        assert_eq!(storage.offset(&location).await.unwrap(), Some(0));
        assert_eq!(storage.append(&location, 0, Bytes::from_static(b"hello")).await.unwrap(), 5);
        assert_eq!(storage.offset(&location).await.unwrap(), Some(5));

        // Wrong offset is retryable, past-the-end is not
        assert!(storage
            .append(&location, 0, Bytes::from_static(b"hello"))
            .await
            .unwrap_err()
            .is_transient());
        assert!(!storage
            .append(&location, 5, Bytes::from_static(b"world!"))
            .await
            .unwrap_err()
            .is_transient());

        assert_eq!(storage.append(&location, 5, Bytes::from_static(b"world")).await.unwrap(), 10);

        // Completed uploads leave nothing behind under uploads/
        assert_eq!(storage.offset(&location).await.unwrap(), None);
        assert_eq!(upload_files(&dir), Vec::<String>::new());
        assert_eq!(
            storage.download("import-1-abc-stream").await.unwrap(),
            Bytes::from_static(b"helloworld")
        );
        assert_eq!(storage.metadata("import-1-abc-stream").await.unwrap(), sample_metadata());
    }

    #[tokio::test]
    async fn test_zero_length_upload_completes_on_create() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let location = storage
            .create(&CreateUpload {
                key: "empty".to_string(),
                content_type: "application/json".to_string(),
                total: 0,
                metadata: ObjectMetadata::new(),
            })
            .await
            .unwrap();

        assert_eq!(storage.offset(&location).await.unwrap(), None);
        assert!(storage.download("empty").await.unwrap().is_empty());
        assert!(upload_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_location_has_no_offset() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let location = format!("{}/uploads/{}", storage.endpoint(), Uuid::new_v4());
        assert_eq!(storage.offset(&location).await.unwrap(), None);
        assert!(storage.offset("http://elsewhere/upload").await.is_err());
    }

    #[tokio::test]
    async fn test_repeated_uploads_do_not_accumulate_state() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        for n in 0..3 {
            let key = format!("import-{}-repeat", n);
            let location = storage.create(&create_request(&key, 4)).await.unwrap();
            storage.append(&location, 0, Bytes::from_static(b"data")).await.unwrap();
            storage.delete(&key).await.unwrap();
        }

        assert!(upload_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale_uploads() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let abandoned = storage.create(&create_request("abandoned", 8)).await.unwrap();
        storage.append(&abandoned, 0, Bytes::from_static(b"half")).await.unwrap();
        assert_eq!(upload_files(&dir).len(), 2);

        // Nothing is old enough yet
        assert_eq!(storage.sweep_stale_uploads(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(storage.offset(&abandoned).await.unwrap(), Some(4));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(storage.sweep_stale_uploads(Duration::from_millis(1)).await.unwrap(), 1);
        assert!(upload_files(&dir).is_empty());
        assert_eq!(storage.offset(&abandoned).await.unwrap(), None);
    }
}
