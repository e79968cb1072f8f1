// ==============================================================================
// upload/resumable.rs - Chunked Resumable Upload
// ==============================================================================
// Description: Sequential chunk upload with server-offset resume, transient
//              retry schedule, and session bookkeeping
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use super::fingerprint::fingerprint;
use super::retry::RetrySchedule;
use super::session::{SessionStore, UploadSession};
use super::transport::{CreateUpload, ResumableTransport, TransportError};
use super::{ProgressFn, UploadError, UploadOutcome, UploadRequest};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 6 * 1024 * 1024;

/// Lifecycle of one resumable upload attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Init,
    Resuming,
    Uploading,
    Complete,
    Failed,
}

pub struct ResumableUploader {
    transport: Arc<dyn ResumableTransport>,
    sessions: Arc<dyn SessionStore>,
    chunk_size: usize,
    retry: RetrySchedule,
}

/// Mutable view of one transfer as it moves through the state machine
struct Transfer<'a> {
    request: &'a UploadRequest,
    fingerprint: String,
    state: UploadState,
    total: u64,
}

impl Transfer<'_> {
    fn enter(&mut self, next: UploadState) {
        debug!(
            key = %self.request.key,
            from = ?self.state,
            to = ?next,
            "Resumable upload state change"
        );
        self.state = next;
    }
}

/// Outcome of a transport call wrapped in the retry schedule
enum Retried<T> {
    Done(T),
    Failed { error: TransportError, retries: usize },
}

impl ResumableUploader {
    pub fn new(
        transport: Arc<dyn ResumableTransport>,
        sessions: Arc<dyn SessionStore>,
        chunk_size: usize,
        retry: RetrySchedule,
    ) -> Self {
        Self {
            transport,
            sessions,
            chunk_size: chunk_size.max(1),
            retry,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Unfinished session recorded for this payload, if any
    ///
    /// Lookup failures read as "no session" so an outage never blocks uploads.
    pub async fn pending_session(
        &self,
        source: &str,
        content_type: &str,
        content: &[u8],
    ) -> Option<UploadSession> {
        let fp = fingerprint(self.transport.endpoint(), source, content_type, content);
        match self.sessions.find(&fp).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Session lookup failed: {}", e);
                None
            }
        }
    }

    pub async fn upload(
        &self,
        request: &UploadRequest,
        progress: ProgressFn<'_>,
    ) -> Result<UploadOutcome, UploadError> {
        let mut transfer = Transfer {
            request,
            fingerprint: fingerprint(
                self.transport.endpoint(),
                &request.source,
                &request.content_type,
                &request.bytes,
            ),
            state: UploadState::Init,
            total: request.bytes.len() as u64,
        };

        let result = self.run(&mut transfer, progress).await;
        if result.is_err() {
            transfer.enter(UploadState::Failed);
        }
        result
    }

    async fn run(
        &self,
        transfer: &mut Transfer<'_>,
        progress: ProgressFn<'_>,
    ) -> Result<UploadOutcome, UploadError> {
        let key = transfer.request.key.clone();
        let total = transfer.total;

        let existing = match self.sessions.find(&transfer.fingerprint).await {
            Ok(session) => session,
            Err(e) => {
                warn!(key = %key, "Session lookup failed, starting a fresh upload: {}", e);
                None
            }
        };

        let mut resumed_from = None;
        let (location, mut offset) = match existing {
            Some(session) if session.key != key => {
                info!(
                    key = %key,
                    session_key = %session.key,
                    "Upload session belongs to another object, starting fresh"
                );
                self.forget(&transfer.fingerprint).await;
                (self.start(transfer).await?, 0)
            }
            Some(session) => {
                transfer.enter(UploadState::Resuming);
                match self.resume_point(&session, transfer).await? {
                    Some(offset) => {
                        info!(
                            key = %key,
                            offset,
                            total,
                            "Resuming upload from server-acknowledged offset"
                        );
                        resumed_from = Some(offset);
                        (session.location, offset)
                    }
                    None => {
                        info!(key = %key, "Discarding stale upload session");
                        self.forget(&transfer.fingerprint).await;
                        (self.start(transfer).await?, 0)
                    }
                }
            }
            None => (self.start(transfer).await?, 0),
        };

        transfer.enter(UploadState::Uploading);

        if offset == total {
            progress(total, total);
        }

        let mut retries = 0usize;
        while offset < total {
            let end = (offset + self.chunk_size as u64).min(total);
            let chunk = transfer.request.bytes.slice(offset as usize..end as usize);

            match self.transport.append(&location, offset, chunk).await {
                Ok(acked) => {
                    if acked <= offset || acked > total {
                        return Err(UploadError::Rejected {
                            key,
                            source: TransportError::Rejected(format!(
                                "Server acknowledged offset {} after sending from {} (total {})",
                                acked, offset, total
                            )),
                        });
                    }
                    offset = acked;
                    retries = 0;
                    self.record_progress(transfer, &location, offset, progress).await;
                }
                Err(error) if error.is_transient() => {
                    let Some(delay) = self.retry.delay_for(retries) else {
                        warn!(key = %key, offset, "Chunk retries exhausted, session kept for resume");
                        return Err(UploadError::RetriesExhausted {
                            key,
                            retries,
                            offset,
                            source: error,
                        });
                    };
                    retries += 1;
                    warn!(
                        key = %key,
                        offset,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "Chunk failed, retrying: {}",
                        error
                    );
                    tokio::time::sleep(delay).await;

                    // A chunk may have been partially accepted before the failure
                    match self.transport.offset(&location).await {
                        Ok(Some(server)) if server <= total => {
                            if server > offset {
                                retries = 0;
                                offset = server;
                                self.record_progress(transfer, &location, offset, progress).await;
                            } else {
                                offset = server;
                            }
                        }
                        Ok(_) => {
                            self.forget(&transfer.fingerprint).await;
                            return Err(UploadError::SessionLost { key, offset });
                        }
                        Err(e) if e.is_transient() => {
                            debug!(key = %key, "Offset query failed, retrying from {}: {}", offset, e);
                        }
                        Err(e) => return Err(UploadError::Rejected { key, source: e }),
                    }
                }
                Err(error) => return Err(UploadError::Rejected { key, source: error }),
            }
        }

        transfer.enter(UploadState::Complete);
        self.forget(&transfer.fingerprint).await;

        info!(key = %key, bytes = total, "Resumable upload complete");
        Ok(UploadOutcome {
            key,
            location: Some(location),
            bytes_total: total,
            resumed_from,
        })
    }

    /// Server offset to continue from, or `None` when the session is unusable
    async fn resume_point(
        &self,
        session: &UploadSession,
        transfer: &Transfer<'_>,
    ) -> Result<Option<u64>, UploadError> {
        let location = session.location.as_str();
        match self.with_retry(|| self.transport.offset(location)).await {
            Retried::Done(Some(offset)) if offset <= transfer.total => Ok(Some(offset)),
            Retried::Done(_) => Ok(None),
            Retried::Failed { error, retries } => Err(self.failure(transfer, error, retries, 0)),
        }
    }

    /// Open a new upload on the server and record its session
    async fn start(&self, transfer: &Transfer<'_>) -> Result<String, UploadError> {
        let create = CreateUpload {
            key: transfer.request.key.clone(),
            content_type: transfer.request.content_type.clone(),
            total: transfer.total,
            metadata: transfer.request.metadata.clone(),
        };

        let location = match self.with_retry(|| self.transport.create(&create)).await {
            Retried::Done(location) => location,
            Retried::Failed { error, retries } => {
                return Err(self.failure(transfer, error, retries, 0))
            }
        };

        debug!(key = %transfer.request.key, location = %location, "Created resumable upload");

        let session = UploadSession {
            fingerprint: transfer.fingerprint.clone(),
            location: location.clone(),
            key: transfer.request.key.clone(),
            bytes_total: transfer.total,
            bytes_uploaded: 0,
            metadata: transfer.request.metadata.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.sessions.save(&session).await {
            warn!(key = %session.key, "Failed to record upload session: {}", e);
        }

        Ok(location)
    }

    async fn record_progress(
        &self,
        transfer: &Transfer<'_>,
        location: &str,
        offset: u64,
        progress: ProgressFn<'_>,
    ) {
        progress(offset, transfer.total);

        if offset == transfer.total {
            return;
        }

        let session = UploadSession {
            fingerprint: transfer.fingerprint.clone(),
            location: location.to_string(),
            key: transfer.request.key.clone(),
            bytes_total: transfer.total,
            bytes_uploaded: offset,
            metadata: transfer.request.metadata.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.sessions.save(&session).await {
            warn!(key = %session.key, offset, "Failed to update upload session: {}", e);
        }
    }

    async fn forget(&self, fingerprint: &str) {
        if let Err(e) = self.sessions.remove(fingerprint).await {
            warn!("Failed to remove upload session: {}", e);
        }
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Retried<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut retries = 0usize;
        loop {
            match op().await {
                Ok(value) => return Retried::Done(value),
                Err(error) if error.is_transient() => match self.retry.delay_for(retries) {
                    Some(delay) => {
                        retries += 1;
                        warn!(retry = retries, "Transport call failed, retrying: {}", error);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Retried::Failed { error, retries },
                },
                Err(error) => return Retried::Failed { error, retries },
            }
        }
    }

    fn failure(
        &self,
        transfer: &Transfer<'_>,
        error: TransportError,
        retries: usize,
        offset: u64,
    ) -> UploadError {
        let key = transfer.request.key.clone();
        if error.is_transient() {
            UploadError::RetriesExhausted {
                key,
                retries,
                offset,
                source: error,
            }
        } else {
            UploadError::Rejected { key, source: error }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectMetadata;
    use crate::testing::{MemorySessionStore, MemoryTransport};
    use bytes::Bytes;
    use std::sync::Mutex;

    const MIB: usize = 1024 * 1024;

    fn request(key: &str, bytes: Bytes) -> UploadRequest {
        UploadRequest {
            key: key.to_string(),
            source: "acme".to_string(),
            bytes,
            content_type: "application/octet-stream".to_string(),
            metadata: ObjectMetadata::new(),
            use_resumable: true,
        }
    }

    fn payload(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    fn uploader(
        transport: &Arc<MemoryTransport>,
        sessions: &Arc<MemorySessionStore>,
        retry: RetrySchedule,
    ) -> ResumableUploader {
        ResumableUploader::new(transport.clone(), sessions.clone(), DEFAULT_CHUNK_SIZE, retry)
    }

    #[tokio::test]
    async fn test_uploads_in_chunks_and_clears_session() {
        let transport = Arc::new(MemoryTransport::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let uploader = uploader(&transport, &sessions, RetrySchedule::none());

        let seen = Mutex::new(Vec::new());
        let progress = |done: u64, total: u64| seen.lock().unwrap().push((done, total));

        let bytes = payload(13 * MIB);
        let outcome = uploader.upload(&request("k", bytes.clone()), &progress).await.unwrap();

        let total = (13 * MIB) as u64;
        assert_eq!(outcome.bytes_total, total);
        assert_eq!(outcome.resumed_from, None);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(6 * MIB as u64, total), (12 * MIB as u64, total), (total, total)]
        );
        assert_eq!(transport.completed_bytes("k"), Some(bytes));
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_resumes_from_server_offset() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_once_after(20 * MIB as u64);
        let sessions = Arc::new(MemorySessionStore::new());
        let uploader = uploader(&transport, &sessions, RetrySchedule::from_millis(&[0]));

        let bytes = payload(50 * MIB);
        uploader.upload(&request("big", bytes.clone()), &|_, _| {}).await.unwrap();

        assert_eq!(transport.bytes_received(), 50 * MIB as u64);
        assert_eq!(transport.completed_bytes("big"), Some(bytes));
    }

    #[tokio::test]
    async fn test_interrupted_upload_resumes_in_later_invocation() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_once_after(20 * MIB as u64);
        let sessions = Arc::new(MemorySessionStore::new());
        let bytes = payload(50 * MIB);

        let first = uploader(&transport, &sessions, RetrySchedule::none());
        let err = first.upload(&request("big", bytes.clone()), &|_, _| {}).await.unwrap_err();
        assert!(matches!(err, UploadError::RetriesExhausted { .. }));
        assert_eq!(sessions.len(), 1);

        let acknowledged = 20 * MIB as u64;
        let seen = Mutex::new(Vec::new());
        let progress = |done: u64, _total: u64| seen.lock().unwrap().push(done);

        let second = uploader(&transport, &sessions, RetrySchedule::none());
        let outcome = second.upload(&request("big", bytes.clone()), &progress).await.unwrap();

        assert_eq!(outcome.resumed_from, Some(acknowledged));
        assert!(seen.lock().unwrap()[0] >= acknowledged);
        assert_eq!(transport.bytes_received(), 50 * MIB as u64);
        assert_eq!(transport.completed_bytes("big"), Some(bytes));
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_stale_session_starts_fresh() {
        let transport = Arc::new(MemoryTransport::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let bytes = payload(MIB);

        let fp = fingerprint(transport.endpoint(), "acme", "application/octet-stream", &bytes);
        sessions
            .save(&UploadSession {
                fingerprint: fp,
                location: "memory://uploads/expired".to_string(),
                key: "k".to_string(),
                bytes_total: MIB as u64,
                bytes_uploaded: 512,
                metadata: ObjectMetadata::new(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let uploader = uploader(&transport, &sessions, RetrySchedule::none());
        let outcome = uploader.upload(&request("k", bytes.clone()), &|_, _| {}).await.unwrap();

        assert_eq!(outcome.resumed_from, None);
        assert_eq!(transport.completed_bytes("k"), Some(bytes));
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_pending_session_is_found_by_content() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_once_after(7 * MIB as u64);
        let sessions = Arc::new(MemorySessionStore::new());
        let uploader = uploader(&transport, &sessions, RetrySchedule::none());
        let bytes = payload(8 * MIB);

        let mut first = request("import-1-first.json", bytes.clone());
        first.metadata.insert("job-id".to_string(), "1-first".to_string());
        uploader.upload(&first, &|_, _| {}).await.unwrap_err();

        let pending = uploader
            .pending_session("acme", "application/octet-stream", &bytes)
            .await
            .unwrap();
        assert_eq!(pending.key, "import-1-first.json");
        assert_eq!(pending.bytes_uploaded, 6 * MIB as u64);
        assert_eq!(pending.metadata.get("job-id").map(String::as_str), Some("1-first"));

        assert!(uploader
            .pending_session("other", "application/octet-stream", &bytes)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_session_for_another_key_is_not_resumed() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_once_after(MIB as u64);
        let sessions = Arc::new(MemorySessionStore::new());
        let uploader = uploader(&transport, &sessions, RetrySchedule::none());
        let bytes = payload(2 * MIB);

        uploader.upload(&request("a", bytes.clone()), &|_, _| {}).await.unwrap_err();
        let outcome = uploader.upload(&request("b", bytes.clone()), &|_, _| {}).await.unwrap();

        assert_eq!(outcome.resumed_from, None);
        assert_eq!(transport.completed_bytes("a"), None);
        assert_eq!(transport.completed_bytes("b"), Some(bytes));
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_zero_length_upload() {
        let transport = Arc::new(MemoryTransport::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let uploader = uploader(&transport, &sessions, RetrySchedule::none());

        let seen = Mutex::new(Vec::new());
        let progress = |done: u64, total: u64| seen.lock().unwrap().push((done, total));

        let outcome = uploader.upload(&request("empty", Bytes::new()), &progress).await.unwrap();

        assert_eq!(outcome.bytes_total, 0);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 0)]);
        assert_eq!(transport.append_calls(), 0);
        assert_eq!(transport.completed_bytes("empty"), Some(Bytes::new()));
    }

    #[tokio::test]
    async fn test_rejection_fails_without_retry() {
        let transport = Arc::new(MemoryTransport::new());
        transport.reject_appends();
        let sessions = Arc::new(MemorySessionStore::new());
        let uploader = uploader(&transport, &sessions, RetrySchedule::from_millis(&[0, 0, 0]));

        let err = uploader.upload(&request("k", payload(MIB)), &|_, _| {}).await.unwrap_err();

        assert!(matches!(err, UploadError::Rejected { .. }));
        assert_eq!(transport.append_calls(), 1);
    }

    #[tokio::test]
    async fn test_session_store_outage_degrades_to_fresh_upload() {
        let transport = Arc::new(MemoryTransport::new());
        let sessions = Arc::new(MemorySessionStore::new());
        sessions.set_unavailable(true);
        let uploader = uploader(&transport, &sessions, RetrySchedule::none());

        let bytes = payload(7 * MIB);
        uploader.upload(&request("k", bytes.clone()), &|_, _| {}).await.unwrap();

        assert_eq!(transport.completed_bytes("k"), Some(bytes));
    }
}
