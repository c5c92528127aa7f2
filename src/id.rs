//! Position-ID derivation.
//!
//! A position's identity is determined by its *normalized* text, not the
//! literal bytes an agent returned — two responses that differ only in
//! casing or incidental whitespace must collapse onto the same position.

use sha2::{Digest, Sha256};

/// Number of hex characters retained from the SHA-256 digest.
const ID_LEN: usize = 12;

/// Normalize position text: trim, collapse internal whitespace runs to a
/// single space, lower-case.
///
/// Deliberately does *not* strip punctuation — two positions that differ
/// only in punctuation are still distinct positions.
pub fn normalize_position_text(text: &str) -> String {
    text.trim().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Derive a position ID from raw position text.
///
/// The ID is the first 12 hex characters of the SHA-256 digest of the
/// normalized text. Two responses whose normalized text matches receive the
/// identical ID, which is what lets the round runner group responses into
/// positions and tally votes against them.
pub fn position_id(text: &str) -> String {
    let normalized = normalize_position_text(text);
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)[..ID_LEN].to_string()
}
