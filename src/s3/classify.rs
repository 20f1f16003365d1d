//! Response classifier
//!
//! The only place protocol-level [`ErrorResponse`]s are built. Every response
//! the client receives goes through [`classify`].

use crate::s3::error::{ErrorKind, ErrorResponse, Result, S3Error};
use crate::s3::transport::HttpResponse;
use crate::s3::xml::{self, ErrorEnvelope};
use hyper::StatusCode;
use tracing::debug;

/// Non-empty `/`-separated segments of a resource path
fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Bucket and object named by a request path like `/bucket/some/key`
fn split_resource(path: &str) -> (Option<String>, Option<String>) {
    let trimmed = path.trim_start_matches('/');
    let (bucket, key) = match trimmed.find('/') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => (trimmed, ""),
    };
    let decode = |s: &str| {
        urlencoding::decode(s)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| s.to_string())
    };
    let bucket = (!bucket.is_empty()).then(|| decode(bucket));
    let key = (!key.is_empty()).then(|| decode(key));
    (bucket, key)
}

fn header_ids(response: &HttpResponse) -> (Option<String>, Option<String>) {
    (
        response.header("x-amz-request-id").map(str::to_string),
        response.header("x-amz-id-2").map(str::to_string),
    )
}

/// Coarse mapping for error responses without a usable body
fn kind_from_status(status: StatusCode, path: &str) -> (ErrorKind, &'static str) {
    match status.as_u16() {
        404 => {
            if path_segments(path).count() >= 2 {
                (ErrorKind::ObjectNotFound, "NoSuchKey")
            } else {
                (ErrorKind::BucketNotFound, "NoSuchBucket")
            }
        }
        403 => (ErrorKind::AccessDenied, "AccessDenied"),
        405 | 501 => (ErrorKind::MethodNotAllowed, "MethodNotAllowed"),
        _ => (ErrorKind::InternalClientError, "UnexpectedStatus"),
    }
}

fn from_envelope(
    status: StatusCode,
    path: &str,
    response: &HttpResponse,
    envelope: ErrorEnvelope,
) -> ErrorResponse {
    let kind = ErrorKind::from_code(&envelope.code).unwrap_or(ErrorKind::InternalClientError);
    let resource = envelope.resource.as_deref().unwrap_or(path);
    let mut err = ErrorResponse::new(kind, status, &envelope.code, resource);
    err.message = envelope.message;

    let (header_request_id, header_host_id) = header_ids(response);
    err.request_id = envelope.request_id.or(header_request_id);
    err.host_id = envelope.host_id.or(header_host_id);

    let (bucket, object) = split_resource(path);
    err.bucket_name = envelope.bucket_name.or(bucket);
    err.object_name = envelope.key.or(object);

    if kind == ErrorKind::InternalClientError {
        err.raw = Some(String::from_utf8_lossy(&response.body).into_owned());
    }
    err
}

fn bodyless(status: StatusCode, path: &str, response: &HttpResponse) -> ErrorResponse {
    let (kind, code) = kind_from_status(status, path);
    let mut err = ErrorResponse::new(kind, status, code, path);
    err.message = status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string();

    let (request_id, host_id) = header_ids(response);
    err.request_id = request_id;
    err.host_id = host_id;

    let (bucket, object) = split_resource(path);
    err.bucket_name = bucket;
    err.object_name = object;

    if !response.body.is_empty() {
        err.raw = Some(String::from_utf8_lossy(&response.body).into_owned());
    }
    err
}

/// Map one response onto success or a typed error.
///
/// `path` is the request path; it stands in for the resource when the server
/// does not name one.
pub fn classify(path: &str, response: HttpResponse) -> Result<HttpResponse> {
    let status = response.status;

    if status.is_success() {
        return Ok(response);
    }

    if status.is_redirection() {
        let mut err = ErrorResponse::new(ErrorKind::Redirect, status, "Redirect", path);
        if let Some(region) = response.header("x-amz-bucket-region") {
            err.message = format!("bucket is in region {}", region);
        }
        let (request_id, host_id) = header_ids(&response);
        err.request_id = request_id;
        err.host_id = host_id;
        return Err(S3Error::Response(err));
    }

    let err = match xml::parse_error(&response.body) {
        Some(envelope) => from_envelope(status, path, &response, envelope),
        None => bodyless(status, path, &response),
    };
    debug!(
        status = status.as_u16(),
        code = %err.code,
        kind = %err.kind,
        resource = %err.resource,
        "classified error response"
    );
    Err(S3Error::Response(err))
}

/// Like [`classify`], but also treats an `<Error>` document inside a 2xx
/// response as a failure. CompleteMultipartUpload reports late errors this way.
pub fn classify_with_embedded_error(path: &str, response: HttpResponse) -> Result<HttpResponse> {
    let response = classify(path, response)?;
    match xml::parse_error(&response.body) {
        Some(envelope) => Err(S3Error::Response(from_envelope(
            response.status,
            path,
            &response,
            envelope,
        ))),
        None => Ok(response),
    }
}
