//! Hex digest helpers shared by fingerprinting, drift detection and diffs.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// SHA-1 hex digest, used for snapshot section hashes and the etag.
pub fn sha1_hex(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hex digest, used for parameter dumps and the runtime fingerprint.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
