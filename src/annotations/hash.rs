//! Text normalization and content hashing
//!
//! Selected text is compared the way a browser renders it: every run of
//! whitespace collapses to a single space and the ends are trimmed. The
//! record hash is computed over that normalized form, so markup-only
//! whitespace changes on the host page never invalidate a record.

use sha2::{Digest, Sha256};

/// Collapse whitespace runs to single spaces and trim the ends
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Lowercase hex SHA-256 of the normalized text
pub fn hash_text(text: &str) -> String {
    let normalized = normalize_text(text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a stored hash against the text it claims to cover
pub fn verify_hash(text: &str, expected: &str) -> bool {
    hash_text(text).eq_ignore_ascii_case(expected)
}
