// ==============================================================================
// artifact.rs - Staged Artifact Parsing
// ==============================================================================
// Description: Reads a staged import artifact in either accepted shape (bare
//              contact array or `{data: [...]}` envelope)
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Artifact must be a JSON array or an object with a `data` array, found {0}")]
    UnexpectedShape(&'static str),
}

/// Extract the contact-like entries from a staged artifact
///
/// Entries are returned unvalidated; schema checks happen separately. A
/// zero-length (or whitespace-only) artifact is an empty upload and reads as
/// an empty contact list.
pub fn parse_artifact(bytes: &[u8]) -> Result<Vec<Value>, ArtifactError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_slice(bytes)?;

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(ArtifactError::UnexpectedShape(kind_of(&other))),
            None => Err(ArtifactError::UnexpectedShape("object without `data`")),
        },
        other => Err(ArtifactError::UnexpectedShape(kind_of(&other))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_array_and_envelope_parse_identically() {
        let contacts = json!([
            {"name": "A", "email": "a@x.io"},
            {"name": "B", "email": "b@x.io"},
        ]);
        let envelope = json!({"source": "acme", "data": contacts.clone(), "extra": 1});

        let bare = parse_artifact(contacts.to_string().as_bytes()).unwrap();
        let wrapped = parse_artifact(envelope.to_string().as_bytes()).unwrap();

        assert_eq!(bare, wrapped);
        assert_eq!(bare.len(), 2);
    }

    #[test]
    fn test_empty_array_is_valid() {
        assert!(parse_artifact(b"[]").unwrap().is_empty());
        assert!(parse_artifact(br#"{"data": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_zero_length_artifact_is_empty_list() {
        assert!(parse_artifact(b"").unwrap().is_empty());
        assert!(parse_artifact(b" \n\t").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_other_shapes() {
        assert!(matches!(
            parse_artifact(br#"{"contacts": []}"#),
            Err(ArtifactError::UnexpectedShape(_))
        ));
        assert!(matches!(
            parse_artifact(br#"{"data": "nope"}"#),
            Err(ArtifactError::UnexpectedShape("string"))
        ));
        assert!(matches!(parse_artifact(b"42"), Err(ArtifactError::UnexpectedShape("number"))));
        assert!(matches!(parse_artifact(b"name,email"), Err(ArtifactError::InvalidJson(_))));
    }
}
