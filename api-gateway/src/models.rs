// ==============================================================================
// models.rs - API Data Models
// ==============================================================================
// Description: Response bodies for the contact import API
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use contact_import::validation::ValidationIssue;
use serde::Serialize;

/// Successful import submission
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportAcceptedResponse {
    pub job_id: String,
}

/// Error body; `issues` only for validation failures
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<ValidationIssue>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            issues: None,
        }
    }

    pub fn with_issues(error: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        Self {
            error: error.into(),
            issues: Some(issues),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiInfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub queue: bool,
    pub storage: bool,
}
