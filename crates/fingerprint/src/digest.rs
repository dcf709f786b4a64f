//! Content digests used by fingerprint rules.

use md5::{Digest, Md5};

/// Lowercase hex MD5 of the content.
#[must_use]
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// MurmurHash3-32 of the content, rendered as a signed decimal string
/// (the Shodan favicon-hash convention the rule files use).
#[must_use]
pub fn mmh3_32(data: &[u8]) -> String {
    let hash = murmur3::murmur3_32(&mut std::io::Cursor::new(data), 0).unwrap_or(0);
    (hash as i32).to_string()
}
