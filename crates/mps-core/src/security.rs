//! Constant-time comparison for bearer tokens guarding admin and metrics routes.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compare two secrets without leaking their content or length through timing.
///
/// Both inputs are hashed to SHA-256 first, so the comparison always runs
/// over 32 bytes.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

/// Check an `Authorization: Bearer <token>` header value against `expected`.
pub fn bearer_matches(header: Option<&str>, expected: &str) -> bool {
    header
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| constant_time_eq(token.as_bytes(), expected.as_bytes()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_tokens() {
        assert!(constant_time_eq(b"admin-token", b"admin-token"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn mismatched_tokens() {
        assert!(!constant_time_eq(b"admin-token", b"admin-tokem"));
        assert!(!constant_time_eq(b"short", b"a much longer token"));
    }

    #[test]
    fn bearer_header_parsing() {
        assert!(bearer_matches(Some("Bearer s3cret"), "s3cret"));
        assert!(!bearer_matches(Some("bearer s3cret"), "s3cret"));
        assert!(!bearer_matches(Some("s3cret"), "s3cret"));
        assert!(!bearer_matches(None, "s3cret"));
    }
}
