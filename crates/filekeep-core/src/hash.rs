//! Content hashing for change detection and integrity checks.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Whether two byte buffers have the same content hash.
pub fn same_content(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && content_hash(a) == content_hash(b)
}
