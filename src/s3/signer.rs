//! AWS Signature Version 4
//!
//! Pure functions of their arguments:
//! - the signing key depends only on (secret, UTC day, region)
//! - no key cache, credentials are handed in per request
//! - fixed-size [u8; 32] arrays for HMAC results

use crate::s3::canonical::{CanonicalRequest, QueryParams};
use crate::s3::checksum::sha256_hex;
use crate::s3::credentials::Credentials;
use crate::s3::error::{Result, S3Error};
use crate::s3::transport::HttpRequest;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use hyper::Uri;
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Longest lifetime a presigned URL may have (7 days)
pub const MAX_PRESIGN_EXPIRY: u64 = 7 * 24 * 60 * 60;

/// `YYYYMMDD/region/s3/aws4_request`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningScope {
    pub date: DateTime<Utc>,
    pub region: String,
}

impl SigningScope {
    pub fn new(date: DateTime<Utc>, region: impl Into<String>) -> Self {
        Self {
            date,
            region: region.into(),
        }
    }
}

impl fmt::Display for SigningScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/aws4_request",
            date_stamp(&self.date),
            self.region,
            SERVICE
        )
    }
}

fn date_stamp(date: &DateTime<Utc>) -> String {
    date.format("%Y%m%d").to_string()
}

/// ISO-8601 basic format, as used by `x-amz-date`
pub fn amz_date(date: &DateTime<Utc>) -> String {
    date.format("%Y%m%dT%H%M%SZ").to_string()
}

/// HMAC-SHA256 returning fixed-size array (no heap allocation)
fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    let result = mac.finalize().into_bytes();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

fn derive_key_for_service(
    secret: &str,
    date: &DateTime<Utc>,
    region: &str,
    service: &str,
) -> [u8; 32] {
    let aws4_key = format!("AWS4{}", secret);
    let k_date = hmac_sha256(aws4_key.as_bytes(), date_stamp(date).as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Derive the scoped signing key (4 chained HMAC operations).
///
/// Only the calendar day of `date` matters.
pub fn derive_signing_key(secret: &str, date: &DateTime<Utc>, region: &str) -> [u8; 32] {
    derive_key_for_service(secret, date, region, SERVICE)
}

/// Build the string to sign and return the hex signature
pub fn sign(
    canonical_request_hash: &str,
    date: &DateTime<Utc>,
    region: &str,
    signing_key: &[u8; 32],
) -> String {
    let scope = SigningScope::new(*date, region);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date(date),
        scope,
        canonical_request_hash
    );
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

pub fn authorization_header(
    access_key: &str,
    scope: &SigningScope,
    signed_headers: &str,
    signature: &str,
) -> String {
    format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, access_key, scope, signed_headers, signature
    )
}

/// Host header value for a URL, default ports stripped
pub fn host_header(url: &str) -> Result<String> {
    let uri: Uri = url
        .parse()
        .map_err(|e| S3Error::InvalidArgument(format!("invalid URL {:?}: {}", url, e)))?;
    let authority = uri
        .authority()
        .ok_or_else(|| S3Error::InvalidArgument(format!("URL without host: {:?}", url)))?;

    let default_port = match uri.scheme_str() {
        Some("https") => Some(443),
        Some("http") => Some(80),
        _ => None,
    };
    match authority.port_u16() {
        Some(port) if Some(port) != default_port => Ok(format!("{}:{}", authority.host(), port)),
        _ => Ok(authority.host().to_string()),
    }
}

/// Sign `request` in place.
///
/// `path` and `query` must be exactly what `request.url` carries. Adds `host`,
/// `x-amz-date`, `x-amz-content-sha256`, `x-amz-security-token` (when the
/// credentials carry a session token) and `authorization`. The payload hash is
/// taken from an existing `x-amz-content-sha256` header if the caller set one.
pub fn sign_request(
    request: &mut HttpRequest,
    path: &str,
    query: &QueryParams,
    credentials: &Credentials,
    region: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let host = host_header(&request.url)?;
    let payload_hash = match request.header("x-amz-content-sha256") {
        Some(hash) => hash.to_string(),
        None => sha256_hex(&request.body),
    };

    request.headers.insert("host".to_string(), host);
    request.headers.insert("x-amz-date".to_string(), amz_date(&now));
    request
        .headers
        .insert("x-amz-content-sha256".to_string(), payload_hash.clone());
    if let Some(ref token) = credentials.session_token {
        request
            .headers
            .insert("x-amz-security-token".to_string(), token.clone());
    }

    let method = request.method.as_str().to_string();
    let canonical = CanonicalRequest {
        method: &method,
        path,
        query,
        headers: &request.headers,
        payload_hash: &payload_hash,
    };
    let signed_headers = canonical.signed_headers();
    let canonical_hash = canonical.hash();

    let key = derive_signing_key(&credentials.secret_key, &now, region);
    let signature = sign(&canonical_hash, &now, region, &key);
    let scope = SigningScope::new(now, region);
    let authorization =
        authorization_header(&credentials.access_key, &scope, &signed_headers, &signature);
    request
        .headers
        .insert("authorization".to_string(), authorization);

    Ok(())
}

/// Query-string signed URL.
///
/// `base_url` is `scheme://host[:port]`; `path` and `query` describe the
/// request. Only `host` is signed and the payload is `UNSIGNED-PAYLOAD`.
pub fn presign_url(
    method: &str,
    base_url: &str,
    path: &str,
    query: &QueryParams,
    credentials: &Credentials,
    scope: &SigningScope,
    expires_secs: u64,
) -> Result<String> {
    if expires_secs == 0 || expires_secs > MAX_PRESIGN_EXPIRY {
        return Err(S3Error::InvalidArgument(format!(
            "presigned URL expiry must be between 1 and {} seconds, got {}",
            MAX_PRESIGN_EXPIRY, expires_secs
        )));
    }

    let host = host_header(base_url)?;
    let mut query = query.clone();
    query
        .insert("X-Amz-Algorithm", ALGORITHM)
        .insert(
            "X-Amz-Credential",
            format!("{}/{}", credentials.access_key, scope),
        )
        .insert("X-Amz-Date", amz_date(&scope.date))
        .insert("X-Amz-Expires", expires_secs.to_string())
        .insert("X-Amz-SignedHeaders", "host");
    if let Some(ref token) = credentials.session_token {
        query.insert("X-Amz-Security-Token", token.clone());
    }

    let mut headers = std::collections::BTreeMap::new();
    headers.insert("host".to_string(), host);
    let canonical = CanonicalRequest {
        method,
        path,
        query: &query,
        headers: &headers,
        payload_hash: UNSIGNED_PAYLOAD,
    };

    let key = derive_signing_key(&credentials.secret_key, &scope.date, &scope.region);
    let signature = sign(&canonical.hash(), &scope.date, &scope.region, &key);
    query.insert("X-Amz-Signature", signature);

    Ok(format!(
        "{}{}?{}",
        base_url.trim_end_matches('/'),
        path,
        query.canonical_query()
    ))
}
