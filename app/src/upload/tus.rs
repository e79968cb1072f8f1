// ==============================================================================
// upload/tus.rs - tus 1.0.0 Resumable Transport
// ==============================================================================
// Description: ResumableTransport over the tus protocol (creation + core) as
//              served by hosted storage resumable endpoints
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use super::transport::{CreateUpload, ResumableEndpoint, ResumableTransport, TransportError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use reqwest::{header::HeaderMap, Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

const TUS_VERSION: &str = "1.0.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct TusTransport {
    client: Client,
    endpoint: Url,
    endpoint_str: String,
    bucket: String,
    api_key: Option<String>,
}

impl TusTransport {
    pub fn new(
        endpoint: &ResumableEndpoint,
        bucket: &str,
        api_key: Option<String>,
    ) -> Result<Self, TransportError> {
        let endpoint_str = endpoint.url();
        let url = Url::parse(&endpoint_str).map_err(|e| {
            TransportError::Rejected(format!("Invalid resumable endpoint {}: {}", endpoint_str, e))
        })?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Rejected(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: url,
            endpoint_str,
            bucket: bucket.to_string(),
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header("Tus-Resumable", TUS_VERSION);

        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    fn upload_metadata(&self, request: &CreateUpload) -> Result<String, TransportError> {
        let user_metadata = serde_json::to_string(&request.metadata)
            .map_err(|e| TransportError::Rejected(format!("Unserializable metadata: {}", e)))?;

        Ok(encode_metadata(&[
            ("bucketName", self.bucket.as_str()),
            ("objectName", request.key.as_str()),
            ("contentType", request.content_type.as_str()),
            ("cacheControl", "3600"),
            ("metadata", user_metadata.as_str()),
        ]))
    }
}

/// Encode tus `Upload-Metadata`: comma separated `key base64(value)` pairs
fn encode_metadata(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{} {}", k, STANDARD.encode(v)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Map a non-success status to a transport error
fn classify(status: StatusCode, context: &str) -> TransportError {
    let message = format!("{} returned {}", context, status);
    match status {
        StatusCode::CONFLICT | StatusCode::LOCKED | StatusCode::TOO_MANY_REQUESTS => {
            TransportError::Transient(message)
        }
        s if s.is_server_error() => TransportError::Transient(message),
        _ => TransportError::Rejected(message),
    }
}

fn network(err: reqwest::Error) -> TransportError {
    TransportError::Transient(format!("Network error: {}", err))
}

fn header_offset(headers: &HeaderMap) -> Result<u64, TransportError> {
    headers
        .get("Upload-Offset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| TransportError::Transient("Response missing Upload-Offset".to_string()))
}

#[async_trait]
impl ResumableTransport for TusTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint_str
    }

    async fn create(&self, request: &CreateUpload) -> Result<String, TransportError> {
        let response = self
            .request(reqwest::Method::POST, self.endpoint.as_str())
            .header("Upload-Length", request.total.to_string())
            .header("Upload-Metadata", self.upload_metadata(request)?)
            .header("x-upsert", "true")
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify(status, "Upload creation"));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| TransportError::Rejected("Creation response missing Location".to_string()))?;

        let resolved = self
            .endpoint
            .join(location)
            .map_err(|e| TransportError::Rejected(format!("Invalid Location {}: {}", location, e)))?;

        debug!(key = %request.key, location = %resolved, "tus upload created");
        Ok(resolved.to_string())
    }

    async fn offset(&self, location: &str) -> Result<Option<u64>, TransportError> {
        let response = self
            .request(reqwest::Method::HEAD, location)
            .send()
            .await
            .map_err(network)?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            s if s.is_success() => header_offset(response.headers()).map(Some),
            s => Err(classify(s, "Offset query")),
        }
    }

    async fn append(&self, location: &str, offset: u64, chunk: Bytes) -> Result<u64, TransportError> {
        let response = self
            .request(reqwest::Method::PATCH, location)
            .header(reqwest::header::CONTENT_TYPE, "application/offset+octet-stream")
            .header("Upload-Offset", offset.to_string())
            .body(chunk)
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify(status, "Chunk upload"));
        }
        header_offset(response.headers())
    }
}
