// ==============================================================================
// config.rs - Environment Configuration
// ==============================================================================
// Description: Typed configuration sections loaded from environment variables
//              (optionally via .env) for the gateway and worker
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use crate::upload::{ResumableEndpoint, RetrySchedule, DEFAULT_CHUNK_SIZE};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Variable source; `std::env::var` in production, a map in tests
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(lookup: Lookup<'_>, name: &str) -> Result<String> {
    lookup(name).with_context(|| format!("{} must be set", name))
}

fn parsed_or<T>(lookup: Lookup<'_>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", name, raw)),
        None => Ok(default),
    }
}

fn string_or(lookup: Lookup<'_>, name: &str, default: &str) -> String {
    lookup(name).unwrap_or_else(|| default.to_string())
}

/// Parse a comma separated list of millisecond delays
pub fn parse_delays(raw: &str) -> Result<RetrySchedule> {
    let delays = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().with_context(|| format!("Invalid retry delay: {}", s)))
        .collect::<Result<Vec<_>>>()?;
    Ok(RetrySchedule::from_millis(&delays))
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Local { root: PathBuf },
    S3(S3Config),
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    /// Explicit or hosted tus endpoint; `None` means no remote resumable endpoint
    pub resumable_endpoint: Option<ResumableEndpoint>,
    pub api_key: Option<String>,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let backend = match string_or(lookup, "STORAGE_BACKEND", "local").to_ascii_lowercase().as_str() {
            "local" => StorageBackend::Local {
                root: PathBuf::from(string_or(lookup, "STORAGE_LOCAL_ROOT", "./data/imports")),
            },
            "s3" => StorageBackend::S3(S3Config {
                endpoint: lookup("S3_ENDPOINT"),
                region: string_or(lookup, "S3_REGION", "us-east-1"),
                access_key: required(lookup, "S3_ACCESS_KEY")?,
                secret_key: required(lookup, "S3_SECRET_KEY")?,
                path_style: parsed_or(lookup, "S3_PATH_STYLE", true)?,
            }),
            other => bail!("STORAGE_BACKEND must be `local` or `s3`, got `{}`", other),
        };

        let resumable_endpoint = match (lookup("RESUMABLE_ENDPOINT"), lookup("STORAGE_PROJECT_REF")) {
            (Some(url), _) => Some(ResumableEndpoint::Local { url }),
            (None, Some(project_ref)) => Some(ResumableEndpoint::Hosted { project_ref }),
            (None, None) => None,
        };

        Ok(Self {
            backend,
            bucket: string_or(lookup, "STORAGE_BUCKET", "contact-imports"),
            resumable_endpoint,
            api_key: lookup("STORAGE_API_KEY"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub retry: RetrySchedule,
}

impl UploadConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let chunk_size = parsed_or(lookup, "UPLOAD_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        if chunk_size == 0 {
            bail!("UPLOAD_CHUNK_SIZE must be greater than zero");
        }

        let retry = match lookup("UPLOAD_RETRY_DELAYS_MS") {
            Some(raw) => parse_delays(&raw).context("UPLOAD_RETRY_DELAYS_MS is invalid")?,
            None => RetrySchedule::default(),
        };

        Ok(Self { chunk_size, retry })
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    pub max_attempts: u32,
    pub retry_base: Duration,
}

impl QueueConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let max_attempts: u32 = parsed_or(lookup, "TASK_MAX_ATTEMPTS", 5)?;
        if max_attempts == 0 {
            bail!("TASK_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            redis_url: string_or(lookup, "REDIS_URL", "redis://127.0.0.1:6379"),
            max_attempts,
            retry_base: Duration::from_millis(parsed_or(lookup, "TASK_RETRY_BASE_MS", 2_000)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        Ok(Self {
            url: required(lookup, "DATABASE_URL")?,
            max_connections: parsed_or(lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        Ok(Self {
            port: parsed_or(lookup, "SERVER_PORT", 8080)?,
            max_upload_bytes: parsed_or(lookup, "MAX_UPLOAD_BYTES", 100 * 1024 * 1024)?,
            cors_origins: string_or(lookup, "CORS_ALLOWED_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub concurrency: usize,
    /// Consumer name used for this worker's in-flight list
    ///
    /// Defaults to `<HOSTNAME>-<random>`, unique per process. Set `WORKER_ID`
    /// to a stable per-replica name so a restart recovers its own in-flight
    /// tasks.
    pub worker_id: String,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let concurrency: usize = parsed_or(lookup, "WORKER_CONCURRENCY", 4)?;
        if concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be at least 1");
        }

        Ok(Self {
            poll_interval: Duration::from_millis(parsed_or(lookup, "WORKER_POLL_INTERVAL_MS", 1_000)?),
            concurrency,
            worker_id: lookup("WORKER_ID").unwrap_or_else(|| default_worker_id(lookup)),
        })
    }
}

fn default_worker_id(lookup: Lookup<'_>) -> String {
    let host = string_or(lookup, "HOSTNAME", "worker");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..12])
}
