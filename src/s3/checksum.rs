//! Content hashes used on the wire
//!
//! - SHA-256 (hex) is the payload hash that goes into every signature
//! - MD5 (base64) is the `Content-MD5` integrity header
//! - MD5 (hex) is what S3 reports as the ETag of a single part

use base64::Engine;
use sha2::{Digest, Sha256};

/// SHA-256 of the empty byte sequence
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Hex encoded SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    if data.is_empty() {
        return EMPTY_SHA256.to_string();
    }
    hex::encode(Sha256::digest(data))
}

/// Hex encoded MD5 of `data`
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Base64 encoded MD5 of `data`, as expected by `Content-MD5`
pub fn md5_base64(data: &[u8]) -> String {
    let digest = md5::compute(data);
    base64::engine::general_purpose::STANDARD.encode(&digest[..])
}

/// Strip the surrounding quotes S3 puts around ETags
pub fn trim_etag(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

/// Compare a server ETag against a locally computed hex digest.
///
/// Case-insensitive, ignores quotes.
pub fn etag_matches(etag: &str, digest_hex: &str) -> bool {
    trim_etag(etag).eq_ignore_ascii_case(trim_etag(digest_hex))
}
