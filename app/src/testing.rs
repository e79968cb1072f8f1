// ==============================================================================
// testing.rs - In-Memory Collaborators
// ==============================================================================
// Description: Storage, transport, session, queue, and contact store doubles
//              with failure injection, for tests in this and dependent crates
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use crate::db::{ContactStore, ContactStoreError, InsertOutcome};
use crate::models::{ContactBatch, ObjectMetadata};
use crate::queue::{Delivery, FailureDisposition, QueueError, RetryPolicy, TaskEnvelope, TaskHandle, TaskQueue};
use crate::storage::{ObjectStorage, StorageError};
use crate::upload::{CreateUpload, ResumableTransport, SessionError, SessionStore, TransportError, UploadSession};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ==============================================================================
// OBJECT STORAGE
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
    pub metadata: ObjectMetadata,
}

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    fail_upload: AtomicBool,
    fail_download: AtomicBool,
    fail_delete: AtomicBool,
    deletes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an artifact directly, bypassing failure injection
    pub fn insert(&self, key: &str, bytes: impl Into<Bytes>, content_type: &str) {
        lock(&self.objects).insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.into(),
                content_type: content_type.to_string(),
                metadata: ObjectMetadata::new(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        lock(&self.objects).get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.objects).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_upload.store(fail, Ordering::SeqCst);
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.fail_download.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected upload failure".to_string()));
        }
        lock(&self.objects).insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected download failure".to_string()));
        }
        lock(&self.objects)
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected delete failure".to_string()));
        }
        lock(&self.objects).remove(key);
        Ok(())
    }

    async fn metadata(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        lock(&self.objects)
            .get(key)
            .map(|o| o.metadata.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

// ==============================================================================
// RESUMABLE TRANSPORT
// ==============================================================================

struct MemoryUpload {
    request: CreateUpload,
    data: Vec<u8>,
}

/// Resumable transport keeping uploads in memory
///
/// Counts every byte it accepts so tests can prove nothing was re-sent.
#[derive(Default)]
pub struct MemoryTransport {
    uploads: Mutex<HashMap<String, MemoryUpload>>,
    completed: Mutex<HashMap<String, Bytes>>,
    next_id: AtomicU64,
    fail_after: Mutex<Option<u64>>,
    reject: AtomicBool,
    bytes_received: AtomicU64,
    append_calls: AtomicUsize,
    sink: Option<Arc<MemoryStorage>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed uploads are also written into `storage`
    pub fn with_sink(storage: Arc<MemoryStorage>) -> Self {
        Self {
            sink: Some(storage),
            ..Self::default()
        }
    }

    /// Accept bytes up to `offset`, then fail the chunk crossing it once
    pub fn fail_once_after(&self, offset: u64) {
        *lock(&self.fail_after) = Some(offset);
    }

    pub fn reject_appends(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::SeqCst)
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    pub fn completed_bytes(&self, key: &str) -> Option<Bytes> {
        lock(&self.completed).get(key).cloned()
    }

    async fn complete(&self, request: CreateUpload, data: Bytes) -> Result<(), TransportError> {
        lock(&self.completed).insert(request.key.clone(), data.clone());
        if let Some(sink) = &self.sink {
            sink.upload(&request.key, data, &request.content_type, &request.metadata)
                .await
                .map_err(|e| TransportError::Transient(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResumableTransport for MemoryTransport {
    fn endpoint(&self) -> &str {
        "memory://uploads"
    }

    async fn create(&self, request: &CreateUpload) -> Result<String, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let location = format!("memory://uploads/{}", id);

        lock(&self.uploads).insert(
            location.clone(),
            MemoryUpload {
                request: request.clone(),
                data: Vec::new(),
            },
        );

        if request.total == 0 {
            self.complete(request.clone(), Bytes::new()).await?;
        }
        Ok(location)
    }

    async fn offset(&self, location: &str) -> Result<Option<u64>, TransportError> {
        Ok(lock(&self.uploads).get(location).map(|u| u.data.len() as u64))
    }

    async fn append(&self, location: &str, offset: u64, chunk: Bytes) -> Result<u64, TransportError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("injected rejection".to_string()));
        }

        let (request, data, new_offset) = {
            let mut uploads = lock(&self.uploads);
            let upload = uploads
                .get_mut(location)
                .ok_or_else(|| TransportError::Rejected(format!("Unknown upload {}", location)))?;

            if upload.data.len() as u64 != offset {
                return Err(TransportError::Transient(format!(
                    "Offset mismatch: server at {}, client sent {}",
                    upload.data.len(),
                    offset
                )));
            }

            let mut fail_after = lock(&self.fail_after);
            if let Some(limit) = *fail_after {
                if offset + chunk.len() as u64 > limit {
                    let accepted = limit.saturating_sub(offset) as usize;
                    upload.data.extend_from_slice(&chunk[..accepted]);
                    self.bytes_received.fetch_add(accepted as u64, Ordering::SeqCst);
                    *fail_after = None;
                    return Err(TransportError::Transient("injected connection reset".to_string()));
                }
            }

            upload.data.extend_from_slice(&chunk);
            self.bytes_received.fetch_add(chunk.len() as u64, Ordering::SeqCst);

            let new_offset = upload.data.len() as u64;
            if new_offset < upload.request.total {
                return Ok(new_offset);
            }
            (upload.request.clone(), Bytes::from(upload.data.clone()), new_offset)
        };

        self.complete(request, data).await?;
        Ok(new_offset)
    }
}

// ==============================================================================
// SESSION STORE
// ==============================================================================

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, UploadSession>>,
    unavailable: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), SessionError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SessionError::Other("injected session store outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find(&self, fingerprint: &str) -> Result<Option<UploadSession>, SessionError> {
        self.check()?;
        Ok(lock(&self.sessions).get(fingerprint).cloned())
    }

    async fn save(&self, session: &UploadSession) -> Result<(), SessionError> {
        self.check()?;
        lock(&self.sessions).insert(session.fingerprint.clone(), session.clone());
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<(), SessionError> {
        self.check()?;
        lock(&self.sessions).remove(fingerprint);
        Ok(())
    }
}

// ==============================================================================
// TASK QUEUE
// ==============================================================================

#[derive(Default)]
struct QueueState {
    ready: HashMap<String, VecDeque<String>>,
    in_flight: Vec<String>,
    delayed: Vec<(DateTime<Utc>, String)>,
    dead: Vec<String>,
    history: Vec<TaskEnvelope>,
}

/// Task queue with the same delivery semantics as the Redis queue
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    policy: RetryPolicy,
    fail_enqueue: AtomicBool,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::with_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        })
    }
}

impl MemoryQueue {
    /// Queue whose retries are due immediately
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            policy,
            fail_enqueue: AtomicBool::new(false),
        }
    }

    pub fn fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Every envelope ever enqueued under `task`
    pub fn enqueued(&self, task: &str) -> Vec<TaskEnvelope> {
        lock(&self.state)
            .history
            .iter()
            .filter(|e| e.task == task)
            .cloned()
            .collect()
    }

    pub fn ready_len(&self, task: &str) -> usize {
        lock(&self.state).ready.get(task).map_or(0, VecDeque::len)
    }

    pub fn in_flight_len(&self) -> usize {
        lock(&self.state).in_flight.len()
    }

    pub fn delayed_len(&self) -> usize {
        lock(&self.state).delayed.len()
    }

    pub fn dead_letters(&self) -> Vec<TaskEnvelope> {
        lock(&self.state)
            .dead
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    fn take_in_flight(state: &mut QueueState, receipt: &str) {
        if let Some(pos) = state.in_flight.iter().position(|r| r == receipt) {
            state.in_flight.remove(pos);
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, task: &str, payload: Value) -> Result<TaskHandle, QueueError> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("injected enqueue failure".to_string()));
        }

        let envelope = TaskEnvelope {
            id: Uuid::new_v4(),
            task: task.to_string(),
            payload,
            attempt: 1,
            max_attempts: self.policy.max_attempts,
            enqueued_at: Utc::now(),
            last_error: None,
        };
        let raw = serde_json::to_string(&envelope)?;

        let mut state = lock(&self.state);
        state.ready.entry(task.to_string()).or_default().push_back(raw);
        state.history.push(envelope.clone());
        Ok(TaskHandle { id: envelope.id })
    }

    async fn dequeue(&self, task: &str) -> Result<Option<Delivery>, QueueError> {
        let mut state = lock(&self.state);
        let Some(raw) = state.ready.get_mut(task).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        state.in_flight.push(raw.clone());

        let envelope: TaskEnvelope = serde_json::from_str(&raw)?;
        Ok(Some(Delivery::new(envelope, raw)))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        Self::take_in_flight(&mut lock(&self.state), delivery.receipt());
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, reason: &str) -> Result<FailureDisposition, QueueError> {
        let policy = RetryPolicy {
            max_attempts: delivery.envelope.max_attempts,
            ..self.policy.clone()
        };
        let disposition = policy.disposition(delivery.envelope.attempt, Utc::now());

        let mut next = delivery.envelope.clone();
        next.last_error = Some(reason.to_string());

        let mut state = lock(&self.state);
        Self::take_in_flight(&mut state, delivery.receipt());
        match &disposition {
            FailureDisposition::Retrying { attempt, run_at } => {
                next.attempt = *attempt;
                state.delayed.push((*run_at, serde_json::to_string(&next)?));
            }
            FailureDisposition::DeadLettered => state.dead.push(serde_json::to_string(&next)?),
        }
        Ok(disposition)
    }

    async fn promote_due(&self, task: &str) -> Result<usize, QueueError> {
        let now = Utc::now();
        let mut state = lock(&self.state);

        let (due, later): (Vec<_>, Vec<_>) = state.delayed.drain(..).partition(|(at, raw)| {
            *at <= now
                && serde_json::from_str::<TaskEnvelope>(raw)
                    .map(|e| e.task == task)
                    .unwrap_or(false)
        });
        state.delayed = later;

        let promoted = due.len();
        let ready = state.ready.entry(task.to_string()).or_default();
        for (_, raw) in due {
            ready.push_back(raw);
        }
        Ok(promoted)
    }

    async fn recover_in_flight(&self, task: &str) -> Result<usize, QueueError> {
        let mut state = lock(&self.state);
        let (mine, others): (Vec<String>, Vec<String>) = state.in_flight.drain(..).partition(|raw| {
            serde_json::from_str::<TaskEnvelope>(raw)
                .map(|e| e.task == task)
                .unwrap_or(false)
        });
        state.in_flight = others;

        let recovered = mine.len();
        let ready = state.ready.entry(task.to_string()).or_default();
        for raw in mine.into_iter().rev() {
            ready.push_front(raw);
        }
        Ok(recovered)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

// ==============================================================================
// CONTACT STORE
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContact {
    pub name: String,
    pub email: String,
    pub source: String,
    pub imported_at: DateTime<Utc>,
}

#[derive(Default)]
struct ContactState {
    rows: Vec<StoredContact>,
    jobs: HashSet<String>,
}

/// Contact store with the same per-job ledger semantics as Postgres
#[derive(Default)]
pub struct MemoryContactStore {
    state: Mutex<ContactState>,
    fail: AtomicBool,
    insert_calls: AtomicUsize,
}

impl MemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<StoredContact> {
        lock(&self.state).rows.clone()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn insert_batch(&self, batch: &ContactBatch) -> Result<InsertOutcome, ContactStoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ContactStoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut state = lock(&self.state);
        if !state.jobs.insert(batch.job_id.to_string()) {
            return Ok(InsertOutcome::AlreadyImported);
        }

        state.rows.extend(batch.contacts.iter().map(|c| StoredContact {
            name: c.name.clone(),
            email: c.email.clone(),
            source: batch.source.clone(),
            imported_at: batch.imported_at,
        }));
        Ok(InsertOutcome::Inserted(batch.len() as u64))
    }
}
