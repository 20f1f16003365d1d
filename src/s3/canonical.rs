//! SigV4 canonical request construction
//!
//! Everything here is a pure function of its inputs. The canonical request is
//! five newline-joined blocks (method, path, query, headers, signed header
//! names) followed by the payload hash:
//!
//! ```text
//! GET
//! /bucket/key
//! max-keys=1000&prefix=photos%2F
//! host:s3.example.com
//! x-amz-content-sha256:e3b0...
//! x-amz-date:20240101T000000Z
//!
//! host;x-amz-content-sha256;x-amz-date
//! e3b0...
//! ```

use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Hex lookup table for percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Headers that never take part in the signature
pub const IGNORED_HEADERS: [&str; 4] = ["authorization", "content-type", "content-length", "user-agent"];

fn is_unreserved(byte: u8) -> bool {
    matches!(byte, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~')
}

/// URI encode a string (RFC 3986).
///
/// `encode_slash = false` keeps `/` literal, which is what object keys in the
/// request path need. Returns `Cow::Borrowed` when nothing has to change.
pub fn uri_encode(s: &str, encode_slash: bool) -> Cow<'_, str> {
    let needs_encoding = s
        .bytes()
        .any(|b| !(is_unreserved(b) || (b == b'/' && !encode_slash)));
    if !needs_encoding {
        return Cow::Borrowed(s);
    }

    let mut result = String::with_capacity(s.len() + 16);
    for byte in s.bytes() {
        if is_unreserved(byte) || (byte == b'/' && !encode_slash) {
            result.push(byte as char);
        } else {
            result.push('%');
            result.push(HEX_UPPER[(byte >> 4) as usize] as char);
            result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
        }
    }
    Cow::Owned(result)
}

/// Build the request path for a bucket and optional object key.
///
/// `/` for the service, `/bucket` for bucket operations and
/// `/bucket/<escaped key>` for objects. Keys keep their `/` separators.
pub fn encode_path(bucket: Option<&str>, key: Option<&str>) -> String {
    let mut path = String::with_capacity(64);
    path.push('/');
    if let Some(bucket) = bucket {
        path.push_str(bucket);
        if let Some(key) = key {
            path.push('/');
            path.push_str(&uri_encode(key, false));
        }
    }
    path
}

/// Ordered query parameters of a request.
///
/// Values are stored decoded; encoding happens once, in [`canonical_query`],
/// and the same string is used both for signing and for the request URL.
///
/// [`canonical_query`]: QueryParams::canonical_query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `key=value` pair
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    /// Append a bare key such as `uploads`
    pub fn insert_flag(&mut self, key: impl Into<String>) -> &mut Self {
        self.pairs.push((key.into(), String::new()));
        self
    }

    /// Append the pair only when a value is present
    pub fn insert_opt(&mut self, key: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.pairs.push((key.to_string(), value.to_string()));
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a raw (percent-encoded) query string
    pub fn parse(query: &str) -> Self {
        let mut params = Self::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.find('=') {
                Some(pos) => (&pair[..pos], &pair[pos + 1..]),
                None => (pair, ""),
            };
            let key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
            let value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
            params.insert(key.into_owned(), value.into_owned());
        }
        params
    }

    /// Canonical query string.
    ///
    /// Keys and values are percent-encoded, bare keys get a trailing `=`,
    /// pairs are sorted by the full encoded pair and joined with `&`.
    pub fn canonical_query(&self) -> String {
        let mut encoded: Vec<String> = self
            .pairs
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
            .collect();
        encoded.sort_unstable();
        encoded.join("&")
    }
}

/// Lower-case the header name and normalise its value for signing.
fn canonical_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a header participates in the signature
pub fn is_signed_header(name: &str) -> bool {
    !IGNORED_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Description of one request, ready to be canonicalised.
#[derive(Debug, Clone)]
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    /// Already percent-encoded path, e.g. from [`encode_path`]
    pub path: &'a str,
    pub query: &'a QueryParams,
    pub headers: &'a BTreeMap<String, String>,
    /// Hex SHA-256 of the payload (or `UNSIGNED-PAYLOAD` for presigned URLs)
    pub payload_hash: &'a str,
}

impl<'a> CanonicalRequest<'a> {
    /// Headers that will be signed, lower-cased and sorted
    fn signed_header_map(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .filter(|(name, _)| is_signed_header(name))
            .map(|(name, value)| (name.to_ascii_lowercase(), canonical_header_value(value)))
            .collect()
    }

    /// `name:value\n` per signed header, in sorted order
    pub fn canonical_headers(&self) -> String {
        let headers = self.signed_header_map();
        let mut result = String::with_capacity(headers.len() * 64);
        for (name, value) in &headers {
            result.push_str(name);
            result.push(':');
            result.push_str(value);
            result.push('\n');
        }
        result
    }

    /// Semicolon-joined sorted signed header names
    pub fn signed_headers(&self) -> String {
        self.signed_header_map()
            .into_keys()
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn to_canonical_string(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.path,
            self.query.canonical_query(),
            self.canonical_headers(),
            self.signed_headers(),
            self.payload_hash
        )
    }

    /// Hex SHA-256 of the canonical request, the last line of the string to sign
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.to_canonical_string().as_bytes()))
    }
}
