//! Per-request HTTP tracing
//!
//! A [`TraceSink`] is handed to the client at construction time and sees every
//! exchange. Nothing here is process-global.

use crate::s3::transport::{HttpRequest, HttpResponse, TransportError};
use std::time::Duration;
use tracing::debug;

pub trait TraceSink: Send + Sync {
    fn on_request(&self, request: &HttpRequest);
    fn on_response(&self, request: &HttpRequest, response: &HttpResponse, elapsed: Duration);
    fn on_failure(&self, request: &HttpRequest, error: &TransportError, elapsed: Duration);
}

/// Forwards to `tracing` at debug level, with credentials redacted
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

const REDACTED_HEADERS: [&str; 2] = ["authorization", "x-amz-security-token"];

/// Header dump with signature material replaced
pub fn redacted_headers(request: &HttpRequest) -> String {
    request
        .headers
        .iter()
        .map(|(name, value)| {
            if REDACTED_HEADERS.contains(&name.as_str()) {
                format!("{}: [REDACTED]", name)
            } else {
                format!("{}: {}", name, value)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl TraceSink for TracingSink {
    fn on_request(&self, request: &HttpRequest) {
        debug!(
            method = %request.method,
            url = %request.url,
            body_len = request.body.len(),
            headers = %redacted_headers(request),
            "s3 request"
        );
    }

    fn on_response(&self, request: &HttpRequest, response: &HttpResponse, elapsed: Duration) {
        debug!(
            method = %request.method,
            url = %request.url,
            status = response.status.as_u16(),
            body_len = response.body.len(),
            request_id = response.header("x-amz-request-id").unwrap_or("-"),
            elapsed_ms = elapsed.as_millis() as u64,
            "s3 response"
        );
    }

    fn on_failure(&self, request: &HttpRequest, error: &TransportError, elapsed: Duration) {
        debug!(
            method = %request.method,
            url = %request.url,
            error = %error,
            elapsed_ms = elapsed.as_millis() as u64,
            "s3 transport failure"
        );
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {
    fn on_request(&self, _request: &HttpRequest) {}
    fn on_response(&self, _request: &HttpRequest, _response: &HttpResponse, _elapsed: Duration) {}
    fn on_failure(&self, _request: &HttpRequest, _error: &TransportError, _elapsed: Duration) {}
}
