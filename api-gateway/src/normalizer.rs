// ==============================================================================
// normalizer.rs - Import Input Normalization
// ==============================================================================
// Description: Reads JSON, multipart, and raw stream import requests and
//              reduces each to one NormalizedPayload
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use axum::{
    body::{to_bytes, Body},
    extract::{FromRequest, Multipart, Request},
    http::{header, HeaderMap},
};
use bytes::Bytes;
use contact_import::models::{sanitize_key_suffix, NormalizedPayload, ObjectMetadata};
use contact_import::validation::{parse_import_request, validate_source, ValidationError};
use thiserror::Error;
use tracing::debug;

use crate::content_type::InputKind;

pub const SOURCE_HEADER: &str = "x-source";
pub const USE_RESUMABLE_HEADER: &str = "x-use-resumable";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const STREAM_KEY_SUFFIX: &str = "stream";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    MissingParameter(String),

    #[error("Failed to read request body: {0}")]
    PayloadRead(String),

    #[error("Failed to encode contacts: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Uploaded file part of a multipart request
#[derive(Debug, Clone)]
pub struct FilePart {
    pub bytes: Bytes,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

/// Raw request contents, one variant per input adapter
#[derive(Debug, Clone)]
pub enum ImportInput {
    Json {
        body: Bytes,
    },
    File {
        file: Option<FilePart>,
        source: Option<String>,
        use_resumable: Option<String>,
    },
    Stream {
        body: Bytes,
        source: Option<String>,
        use_resumable: Option<String>,
        content_type: Option<String>,
    },
}

/// Drain the request body into the input shape its content type selects
pub async fn read_input(kind: InputKind, request: Request, limit: usize) -> Result<ImportInput, NormalizeError> {
    match kind {
        InputKind::Json => Ok(ImportInput::Json {
            body: read_body(request.into_body(), limit).await?,
        }),
        InputKind::Multipart => read_multipart(request).await,
        InputKind::Stream => {
            let headers = request.headers().clone();
            let body = read_body(request.into_body(), limit).await?;
            Ok(ImportInput::Stream {
                body,
                source: header_value(&headers, SOURCE_HEADER),
                use_resumable: header_value(&headers, USE_RESUMABLE_HEADER),
                content_type: header_value(&headers, header::CONTENT_TYPE.as_str()),
            })
        }
    }
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, NormalizeError> {
    to_bytes(body, limit)
        .await
        .map_err(|e| NormalizeError::PayloadRead(e.to_string()))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn read_multipart(request: Request) -> Result<ImportInput, NormalizeError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| NormalizeError::PayloadRead(e.body_text()))?;

    let mut file = None;
    let mut source = None;
    let mut use_resumable = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| NormalizeError::PayloadRead(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| NormalizeError::PayloadRead(e.body_text()))?;
                file = Some(FilePart {
                    bytes,
                    file_name,
                    content_type,
                });
            }
            "source" => {
                source = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| NormalizeError::PayloadRead(e.body_text()))?,
                );
            }
            "useResumable" => {
                use_resumable = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| NormalizeError::PayloadRead(e.body_text()))?,
                );
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    Ok(ImportInput::File {
        file,
        source,
        use_resumable,
    })
}

fn flag(value: Option<&str>) -> bool {
    value.map(str::trim) == Some("true")
}

fn check_source(source: &str) -> Result<(), ValidationError> {
    validate_source(source).map_err(|issue| ValidationError { issues: vec![issue] })
}

fn metadata_for(kind: InputKind) -> ObjectMetadata {
    let mut metadata = ObjectMetadata::new();
    metadata.insert("input-kind".to_string(), kind.as_str().to_string());
    metadata
}

/// Reduce any input shape to the payload the upload path stages
pub fn normalize(input: ImportInput) -> Result<NormalizedPayload, NormalizeError> {
    match input {
        ImportInput::Json { body } => {
            let request = parse_import_request(&body)?;
            let bytes = serde_json::to_vec(&request.data)?;

            Ok(NormalizedPayload {
                bytes: Bytes::from(bytes),
                source: request.source,
                use_resumable: request.use_resumable,
                content_type: Some("application/json".to_string()),
                metadata: Some(metadata_for(InputKind::Json)),
                key_suffix: None,
            })
        }

        ImportInput::File {
            file,
            source,
            use_resumable,
        } => {
            let file = file.ok_or_else(|| missing_field("file"))?;
            let source = source.ok_or_else(|| missing_field("source"))?;
            check_source(&source)?;

            let mut metadata = metadata_for(InputKind::Multipart);
            if let Some(name) = &file.file_name {
                metadata.insert("filename".to_string(), name.clone());
            }

            let key_suffix = file.file_name.as_deref().and_then(sanitize_key_suffix);

            Ok(NormalizedPayload {
                bytes: file.bytes,
                source,
                use_resumable: flag(use_resumable.as_deref()),
                content_type: Some(
                    file.content_type
                        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                ),
                metadata: Some(metadata),
                key_suffix,
            })
        }

        ImportInput::Stream {
            body,
            source,
            use_resumable,
            content_type,
        } => {
            let mut missing = Vec::new();
            if source.is_none() {
                missing.push("X-Source header is required");
            }
            if body.is_empty() {
                missing.push("request body is empty");
            }
            if !missing.is_empty() {
                return Err(NormalizeError::MissingParameter(format!(
                    "Missing required parameters for stream upload: {}",
                    missing.join(", ")
                )));
            }

            let source = source.unwrap_or_default();
            check_source(&source)?;

            Ok(NormalizedPayload {
                bytes: body,
                source,
                use_resumable: flag(use_resumable.as_deref()),
                content_type: Some(content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())),
                metadata: Some(metadata_for(InputKind::Stream)),
                key_suffix: Some(STREAM_KEY_SUFFIX.to_string()),
            })
        }
    }
}

fn missing_field(name: &str) -> NormalizeError {
    NormalizeError::MissingParameter(format!("Missing required field: {}", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file(name: Option<&str>, content_type: Option<&str>) -> FilePart {
        FilePart {
            bytes: Bytes::from_static(br#"[{"name":"A","email":"a@x.io"}]"#),
            file_name: name.map(str::to_string),
            content_type: content_type.map(str::to_string),
        }
    }

    #[test]
    fn test_json_stages_bare_data_array() {
        let body = json!({
            "source": "acme",
            "data": [{"name": "A", "email": "a@x.io"}],
            "useResumable": true,
        });

        let payload = normalize(ImportInput::Json {
            body: Bytes::from(body.to_string()),
        })
        .unwrap();

        let staged: serde_json::Value = serde_json::from_slice(&payload.bytes).unwrap();
        assert_eq!(staged, json!([{"name": "A", "email": "a@x.io"}]));
        assert_eq!(payload.source, "acme");
        assert!(payload.use_resumable);
        assert_eq!(payload.content_type.as_deref(), Some("application/json"));
        assert_eq!(payload.key_suffix, None);
    }

    #[test]
    fn test_json_validation_issues_surface() {
        let body = json!({"source": "acme", "data": []});

        let err = normalize(ImportInput::Json {
            body: Bytes::from(body.to_string()),
        })
        .unwrap_err();

        match err {
            NormalizeError::Validation(e) => assert_eq!(e.issues[0].path, "data"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_multipart_missing_source() {
        let err = normalize(ImportInput::File {
            file: Some(file(Some("contacts.json"), None)),
            source: None,
            use_resumable: None,
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "Missing required field: source");
    }

    #[test]
    fn test_multipart_missing_file() {
        let err = normalize(ImportInput::File {
            file: None,
            source: Some("acme".to_string()),
            use_resumable: None,
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "Missing required field: file");
    }

    #[test]
    fn test_multipart_payload() {
        let payload = normalize(ImportInput::File {
            file: Some(file(Some("../My Contacts.json"), None)),
            source: Some("crm".to_string()),
            use_resumable: Some("true".to_string()),
        })
        .unwrap();

        assert!(payload.use_resumable);
        assert_eq!(payload.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(payload.key_suffix.as_deref(), Some("_MyContacts.json"));
        let metadata = payload.metadata.unwrap();
        assert_eq!(metadata.get("filename").map(String::as_str), Some("../My Contacts.json"));
    }

    #[test]
    fn test_multipart_resumable_only_for_literal_true() {
        let payload = normalize(ImportInput::File {
            file: Some(file(Some("c.json"), Some("application/json"))),
            source: Some("crm".to_string()),
            use_resumable: Some("yes".to_string()),
        })
        .unwrap();

        assert!(!payload.use_resumable);
        assert_eq!(payload.content_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn test_multipart_source_length_checked() {
        let err = normalize(ImportInput::File {
            file: Some(file(Some("c.json"), None)),
            source: Some("s".repeat(101)),
            use_resumable: None,
        })
        .unwrap_err();

        assert!(matches!(err, NormalizeError::Validation(_)));
    }

    #[test]
    fn test_stream_missing_parameters() {
        let err = normalize(ImportInput::Stream {
            body: Bytes::new(),
            source: None,
            use_resumable: None,
            content_type: None,
        })
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Missing required parameters for stream upload: X-Source header is required, request body is empty"
        );
    }

    #[test]
    fn test_stream_payload() {
        let payload = normalize(ImportInput::Stream {
            body: Bytes::from_static(b"[]"),
            source: Some("pipe".to_string()),
            use_resumable: None,
            content_type: None,
        })
        .unwrap();

        assert_eq!(payload.key_suffix.as_deref(), Some("stream"));
        assert_eq!(payload.content_type.as_deref(), Some("application/octet-stream"));
        assert!(!payload.use_resumable);
    }
}
