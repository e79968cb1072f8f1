// ==============================================================================
// upload/fingerprint.rs - Resumable Upload Fingerprint
// ==============================================================================
// Description: Stable identity of an upload attempt, used to find and resume
//              an interrupted session
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use sha2::{Digest, Sha256};

const FINGERPRINT_VERSION: &str = "contact-import-v2";

/// Lowercase hex SHA-256 identifying an upload
///
/// Two attempts share a fingerprint iff they target the same endpoint for the
/// same source with byte-identical content of the same declared type. The
/// storage key is left out: it is minted per job, and a resubmitted payload
/// must find the session its earlier attempt left behind.
pub fn fingerprint(endpoint: &str, source: &str, content_type: &str, content: &[u8]) -> String {
    let content_hash = Sha256::digest(content);

    let mut hasher = Sha256::new();
    for part in [FINGERPRINT_VERSION, endpoint, source, content_type] {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    hasher.update(content.len().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(content_hash);

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_and_hex() {
        let a = fingerprint("local:///data", "acme", "application/json", b"[]");
        let b = fingerprint("local:///data", "acme", "application/json", b"[]");

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_every_input_participates() {
        let base = fingerprint("e", "k", "t", b"content");

        assert_ne!(base, fingerprint("e2", "k", "t", b"content"));
        assert_ne!(base, fingerprint("e", "k2", "t", b"content"));
        assert_ne!(base, fingerprint("e", "k", "t2", b"content"));
        assert_ne!(base, fingerprint("e", "k", "t", b"content!"));
    }

    #[test]
    fn test_length_is_part_of_identity() {
        assert_ne!(fingerprint("e", "s", "t", b""), fingerprint("e", "s", "t", b"\0"));
    }
}
