// ==============================================================================
// handlers.rs - API Request Handlers
// ==============================================================================
// Description: HTTP request handlers for the contact import endpoints
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use contact_import::handoff::HandoffError;
use contact_import::validation::ValidationIssue;
use tracing::{error, info, warn};

use crate::{
    content_type::InputKind,
    models::*,
    normalizer::{self, NormalizeError},
    state::AppState,
};

/// Root endpoint - API information
pub async fn root() -> Json<ApiInfoResponse> {
    Json(ApiInfoResponse {
        service: "Contact Import API Gateway",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "/api/contacts/import - Submit contacts (POST; JSON, multipart, or raw stream)",
            "/api/contacts/health - Health check",
            "/api/contacts/ready - Readiness check",
        ],
    })
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let queue_ready = match state.queue().ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Queue not ready: {}", e);
            false
        }
    };

    let storage_ready = match state.storage().ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Storage not ready: {}", e);
            false
        }
    };

    let ready = queue_ready && storage_ready;
    let response = ReadinessResponse {
        ready,
        queue: queue_ready,
        storage: storage_ready,
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Accept an import in any supported shape, stage it, and enqueue it
pub async fn submit_import(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<ImportAcceptedResponse>, AppError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let kind = InputKind::from_content_type(content_type.as_deref());

    info!(input = kind.as_str(), "Received import submission");

    let input = normalizer::read_input(kind, request, state.max_upload_bytes()).await?;
    let payload = normalizer::normalize(input)?;
    let job = state.handoff().submit(payload).await?;

    info!(
        job_id = %job.job_id,
        task_id = %job.task_id,
        artifact_key = %job.artifact_key,
        "Import accepted"
    );

    Ok(Json(ImportAcceptedResponse {
        job_id: job.job_id.to_string(),
    }))
}

// ==============================================================================
// ERROR HANDLING
// ==============================================================================

#[derive(Debug)]
pub enum AppError {
    Validation(Vec<ValidationIssue>),
    MissingParameter(String),
    PayloadRead(String),
    Internal(String),
}

impl From<NormalizeError> for AppError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::Validation(e) => AppError::Validation(e.issues),
            NormalizeError::MissingParameter(msg) => AppError::MissingParameter(msg),
            NormalizeError::PayloadRead(msg) => AppError::PayloadRead(msg),
            NormalizeError::Encode(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<HandoffError> for AppError {
    fn from(err: HandoffError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation(issues) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_issues("Validation failed", issues),
            ),
            AppError::MissingParameter(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(msg)),
            AppError::PayloadRead(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(format!("Failed to read request body: {}", msg)),
            ),
            AppError::Internal(msg) => {
                error!("Import failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
