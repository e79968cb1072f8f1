// ==============================================================================
// validation.rs - Contact Import Request Validation
// ==============================================================================
// Description: Schema checks for JSON import requests and staged contact
//              records, reporting every offending field path
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use crate::models::ContactInput;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use validator::Validate;

pub const SOURCE_MIN_LEN: usize = 1;
pub const SOURCE_MAX_LEN: usize = 100;

/// One failed check, addressed by a dot-separated field path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Validation failed: {}", summarize(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![ValidationIssue::new(path, message)],
        }
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parsed body of a JSON import submission
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: String,
    pub data: Vec<ContactInput>,
    pub use_resumable: bool,
}

/// Check a caller-supplied source label
pub fn validate_source(source: &str) -> Result<(), ValidationIssue> {
    let len = source.chars().count();
    if (SOURCE_MIN_LEN..=SOURCE_MAX_LEN).contains(&len) {
        Ok(())
    } else {
        Err(ValidationIssue::new(
            "source",
            format!(
                "Source must be between {} and {} characters",
                SOURCE_MIN_LEN, SOURCE_MAX_LEN
            ),
        ))
    }
}

/// Parse and validate a JSON import request body
///
/// All issues are collected before returning; malformed JSON is reported
/// against the empty path.
pub fn parse_import_request(body: &[u8]) -> Result<ImportRequest, ValidationError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ValidationError::single("", format!("Malformed JSON: {}", e)))?;

    let Value::Object(mut object) = value else {
        return Err(ValidationError::single("", "Expected a JSON object"));
    };

    let mut issues = Vec::new();

    let source = match object.remove("source") {
        Some(Value::String(source)) => {
            if let Err(issue) = validate_source(&source) {
                issues.push(issue);
            }
            source
        }
        Some(_) => {
            issues.push(ValidationIssue::new("source", "Expected string"));
            String::new()
        }
        None => {
            issues.push(ValidationIssue::new("source", "Required"));
            String::new()
        }
    };

    let use_resumable = match object.remove("useResumable") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => flag,
        Some(_) => {
            issues.push(ValidationIssue::new("useResumable", "Expected boolean"));
            false
        }
    };

    let data = match object.remove("data") {
        Some(Value::Array(items)) if items.is_empty() => {
            issues.push(ValidationIssue::new("data", "At least one contact is required"));
            Vec::new()
        }
        Some(Value::Array(items)) => match contacts_from_values(&items, "data") {
            Ok(contacts) => contacts,
            Err(err) => {
                issues.extend(err.issues);
                Vec::new()
            }
        },
        Some(_) => {
            issues.push(ValidationIssue::new("data", "Expected array"));
            Vec::new()
        }
        None => {
            issues.push(ValidationIssue::new("data", "Required"));
            Vec::new()
        }
    };

    if issues.is_empty() {
        Ok(ImportRequest {
            source,
            data,
            use_resumable,
        })
    } else {
        Err(ValidationError { issues })
    }
}

/// Validate contact-like JSON values against the ingress contact schema
///
/// All-or-nothing: any invalid element fails the whole batch. `prefix` is
/// prepended to each issue path (`data` yields `data.1.email`).
pub fn contacts_from_values(
    values: &[Value],
    prefix: &str,
) -> Result<Vec<ContactInput>, ValidationError> {
    let mut issues = Vec::new();
    let mut contacts = Vec::with_capacity(values.len());

    for (index, value) in values.iter().enumerate() {
        let item_path = join_path(prefix, &index.to_string());
        match contact_from_value(value, &item_path) {
            Ok(contact) => contacts.push(contact),
            Err(item_issues) => issues.extend(item_issues),
        }
    }

    if issues.is_empty() {
        Ok(contacts)
    } else {
        Err(ValidationError { issues })
    }
}

fn contact_from_value(value: &Value, path: &str) -> Result<ContactInput, Vec<ValidationIssue>> {
    let Value::Object(object) = value else {
        return Err(vec![ValidationIssue::new(path, "Expected object")]);
    };

    let mut issues = Vec::new();
    let name = string_field(object, "name", path, &mut issues);
    let email = string_field(object, "email", path, &mut issues);

    if !issues.is_empty() {
        return Err(issues);
    }

    let contact = ContactInput { name, email };
    if let Err(errors) = contact.validate() {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        for (field, field_errors) in fields {
            for error in field_errors {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| error.code.to_string());
                issues.push(ValidationIssue::new(join_path(path, &field), message));
            }
        }
        return Err(issues);
    }

    Ok(contact)
}

fn string_field(
    object: &Map<String, Value>,
    field: &str,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> String {
    match object.get(field) {
        Some(Value::String(value)) => value.clone(),
        Some(_) => {
            issues.push(ValidationIssue::new(join_path(path, field), "Expected string"));
            String::new()
        }
        None => {
            issues.push(ValidationIssue::new(join_path(path, field), "Required"));
            String::new()
        }
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paths(err: &ValidationError) -> Vec<&str> {
        err.issues.iter().map(|i| i.path.as_str()).collect()
    }

    #[test]
    fn test_valid_request() {
        let body = json!({
            "source": "acme",
            "data": [{"name": "A", "email": "a@x.io"}],
        });

        let request = parse_import_request(body.to_string().as_bytes()).unwrap();
        assert_eq!(request.source, "acme");
        assert_eq!(request.data.len(), 1);
        assert!(!request.use_resumable);
    }

    #[test]
    fn test_use_resumable_flag() {
        let body = json!({
            "source": "acme",
            "data": [{"name": "A", "email": "a@x.io"}],
            "useResumable": true,
        });

        let request = parse_import_request(body.to_string().as_bytes()).unwrap();
        assert!(request.use_resumable);
    }

    #[test]
    fn test_empty_data_reports_data_path() {
        let body = json!({"source": "acme", "data": []});

        let err = parse_import_request(body.to_string().as_bytes()).unwrap_err();
        assert_eq!(paths(&err), vec!["data"]);
    }

    #[test]
    fn test_malformed_json_reports_empty_path() {
        let err = parse_import_request(b"{not json").unwrap_err();
        assert_eq!(paths(&err), vec![""]);
    }

    #[test]
    fn test_every_offending_path_reported() {
        let body = json!({
            "source": "",
            "data": [
                {"name": "A", "email": "a@x.io"},
                {"name": "B", "email": "not-an-email"},
                {"email": "c@x.io"},
            ],
        });

        let err = parse_import_request(body.to_string().as_bytes()).unwrap_err();
        assert_eq!(paths(&err), vec!["source", "data.1.email", "data.2.name"]);
    }

    #[test]
    fn test_name_length_bounds() {
        let long_name = "n".repeat(256);
        let values = vec![
            json!({"name": "", "email": "a@x.io"}),
            json!({"name": long_name, "email": "b@x.io"}),
            json!({"name": "n".repeat(255), "email": "c@x.io"}),
        ];

        let err = contacts_from_values(&values, "").unwrap_err();
        assert_eq!(paths(&err), vec!["0.name", "1.name"]);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let values = vec![
            json!({"name": "A", "email": "a@x.io"}),
            json!({"name": "B"}),
        ];

        assert!(contacts_from_values(&values, "").is_err());
    }

    #[test]
    fn test_source_length_bounds() {
        assert!(validate_source("a").is_ok());
        assert!(validate_source(&"s".repeat(100)).is_ok());
        assert!(validate_source("").is_err());
        assert!(validate_source(&"s".repeat(101)).is_err());
    }
}
