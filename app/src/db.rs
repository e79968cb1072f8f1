// ==============================================================================
// db.rs - Contact Persistence
// ==============================================================================
// Description: Batch insert of validated contacts into PostgreSQL, guarded by
//              a per-job ledger so redelivered tasks insert nothing
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use crate::models::ContactBatch;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ContactStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(u64),
    /// The job's contacts were persisted by an earlier delivery
    AlreadyImported,
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Insert every contact in the batch, or none of them
    async fn insert_batch(&self, batch: &ContactBatch) -> Result<InsertOutcome, ContactStoreError>;
}

// Ledger row and contact rows are written by one statement, so either both
// land or neither does.
const INSERT_BATCH_SQL: &str = r#"
WITH job AS (
    INSERT INTO contact_import_jobs (job_id, source, contact_count, imported_at)
    VALUES ($1, $2, $3, $6)
    ON CONFLICT (job_id) DO NOTHING
    RETURNING job_id
),
inserted AS (
    INSERT INTO contacts (name, email, source, imported_at)
    SELECT v.name, v.email, $2, $6
    FROM UNNEST($4::text[], $5::text[]) AS v(name, email)
    WHERE EXISTS (SELECT 1 FROM job)
    RETURNING 1
)
SELECT (SELECT count(*) FROM job), (SELECT count(*) FROM inserted)
"#;

#[derive(Clone)]
pub struct PgContactStore {
    pool: PgPool,
}

impl PgContactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, ContactStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), ContactStoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn insert_batch(&self, batch: &ContactBatch) -> Result<InsertOutcome, ContactStoreError> {
        let (names, emails): (Vec<String>, Vec<String>) = batch
            .contacts
            .iter()
            .map(|c| (c.name.clone(), c.email.clone()))
            .unzip();

        let (jobs, inserted): (i64, i64) = sqlx::query_as(INSERT_BATCH_SQL)
            .bind(batch.job_id.as_str())
            .bind(&batch.source)
            .bind(batch.len() as i64)
            .bind(&names)
            .bind(&emails)
            .bind(batch.imported_at)
            .fetch_one(&self.pool)
            .await?;

        if jobs == 0 {
            debug!(job_id = %batch.job_id, "Job already recorded in ledger");
            return Ok(InsertOutcome::AlreadyImported);
        }

        Ok(InsertOutcome::Inserted(inserted as u64))
    }
}
