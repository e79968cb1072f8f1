// ==============================================================================
// upload/session.rs - Resumable Upload Sessions
// ==============================================================================
// Description: Records of in-progress resumable uploads keyed by fingerprint,
//              persisted in Redis so resumes survive process restarts
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use crate::models::ObjectMetadata;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SESSION_PREFIX: &str = "contact_import:upload_session:";

/// Abandoned sessions are kept this long for a later resume
pub const SESSION_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub fingerprint: String,
    pub location: String,
    pub key: String,
    pub bytes_total: u64,
    pub bytes_uploaded: u64,
    /// Object metadata the server-side upload was created with
    #[serde(default)]
    pub metadata: ObjectMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt session record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session store error: {0}")]
    Other(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find(&self, fingerprint: &str) -> Result<Option<UploadSession>, SessionError>;
    async fn save(&self, session: &UploadSession) -> Result<(), SessionError>;
    async fn remove(&self, fingerprint: &str) -> Result<(), SessionError>;
}

pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn session_key(fingerprint: &str) -> String {
    format!("{}{}", SESSION_PREFIX, fingerprint)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn find(&self, fingerprint: &str) -> Result<Option<UploadSession>, SessionError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(session_key(fingerprint)).await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, session: &UploadSession) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(session)?;

        conn.set_ex::<_, _, ()>(session_key(&session.fingerprint), json, SESSION_TTL_SECS)
            .await?;
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(session_key(fingerprint)).await?;
        Ok(())
    }
}
