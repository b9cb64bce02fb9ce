//! SHA-256 checksumming over envelope bodies.
//!
//! The checksum is computed over whatever bytes land in the wire `body`
//! for that envelope — for a chunked REQ that means the chunk's own bytes,
//! not a digest of the whole logical message. Full-message integrity then
//! relies on the union of per-chunk checksums plus correct base64
//! encoding, rather than an end-to-end digest; this is preserved for wire
//! compatibility.

use sha2::{Digest, Sha256};

/// Compute a hex-encoded SHA-256 digest over `bytes`.
pub fn compute(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Verify `bytes` against a previously-computed hex digest.
pub fn verify(bytes: &[u8], expected: &str) -> bool {
    compute(bytes).eq_ignore_ascii_case(expected)
}
