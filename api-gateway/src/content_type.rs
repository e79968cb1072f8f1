// ==============================================================================
// content_type.rs - Import Content-Type Routing
// ==============================================================================
// Description: Chooses the input adapter for an import request from its
//              declared Content-Type
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

/// Input adapter selected for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Multipart,
    Json,
    Stream,
}

impl InputKind {
    /// Case-insensitive substring match; anything unrecognized, including an
    /// absent header, is a raw stream
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let declared = content_type.unwrap_or_default().to_ascii_lowercase();

        if declared.contains("multipart/form-data") {
            InputKind::Multipart
        } else if declared.contains("application/json") {
            InputKind::Json
        } else {
            InputKind::Stream
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Multipart => "multipart",
            InputKind::Json => "json",
            InputKind::Stream => "stream",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_by_substring() {
        assert_eq!(
            InputKind::from_content_type(Some("multipart/form-data; boundary=xyz")),
            InputKind::Multipart
        );
        assert_eq!(
            InputKind::from_content_type(Some("application/json; charset=utf-8")),
            InputKind::Json
        );
        assert_eq!(InputKind::from_content_type(Some("text/csv")), InputKind::Stream);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(InputKind::from_content_type(Some("Application/JSON")), InputKind::Json);
        assert_eq!(
            InputKind::from_content_type(Some("MULTIPART/FORM-DATA; boundary=a")),
            InputKind::Multipart
        );
    }

    #[test]
    fn test_missing_or_empty_is_stream() {
        assert_eq!(InputKind::from_content_type(None), InputKind::Stream);
        assert_eq!(InputKind::from_content_type(Some("")), InputKind::Stream);
        assert_eq!(
            InputKind::from_content_type(Some("application/octet-stream")),
            InputKind::Stream
        );
    }
}
