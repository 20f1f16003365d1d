//! Error taxonomy
//!
//! [`S3Error`] is what every fallible operation returns. Callers branch on
//! [`S3Error::kind`], which stays stable through context wrapping.

use crate::s3::transport::TransportError;
use hyper::StatusCode;
use std::fmt;
use thiserror::Error;

/// Closed set of failure kinds callers can match on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BucketNotFound,
    ObjectNotFound,
    InvalidBucketName,
    InvalidObjectName,
    AccessDenied,
    BucketAlreadyExists,
    BucketAlreadyOwnedByYou,
    ObjectAlreadyExists,
    /// Server reported `InternalError`
    InternalServerError,
    KeyTooLong,
    TooManyBuckets,
    Redirect,
    MethodNotAllowed,
    /// Payload length did not match the declared size
    SizeMismatch,
    /// Client-side bug or a server response we could not make sense of
    InternalClientError,
    /// Connection-level failure
    TransportError,
    /// Argument rejected before any request was sent
    InvalidArgument,
}

impl ErrorKind {
    /// Map an S3 error `Code` to a kind.
    ///
    /// Unknown codes yield `None`; the classifier turns those into
    /// `InternalClientError` rather than guessing.
    pub fn from_code(code: &str) -> Option<Self> {
        let kind = match code {
            "NoSuchBucket" => Self::BucketNotFound,
            "NoSuchKey" => Self::ObjectNotFound,
            "InvalidBucketName" => Self::InvalidBucketName,
            "InvalidObjectName" => Self::InvalidObjectName,
            "AccessDenied" => Self::AccessDenied,
            "BucketAlreadyExists" => Self::BucketAlreadyExists,
            "BucketAlreadyOwnedByYou" => Self::BucketAlreadyOwnedByYou,
            "ObjectAlreadyExists" => Self::ObjectAlreadyExists,
            "InternalError" => Self::InternalServerError,
            "KeyTooLong" => Self::KeyTooLong,
            "TooManyBuckets" => Self::TooManyBuckets,
            "PermanentRedirect" | "TemporaryRedirect" => Self::Redirect,
            "MethodNotAllowed" => Self::MethodNotAllowed,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A protocol-level error as reported (or implied) by the server.
///
/// Only the response classifier builds these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub status: StatusCode,
    /// Machine code, e.g. `NoSuchBucket`. Synthesised for bodyless responses.
    pub code: String,
    pub message: String,
    /// Resource path the error refers to
    pub resource: String,
    pub request_id: Option<String>,
    /// Secondary diagnostic id (`x-amz-id-2` / `HostId`)
    pub host_id: Option<String>,
    pub bucket_name: Option<String>,
    pub object_name: Option<String>,
    /// Raw body, kept when the code was not recognised
    pub raw: Option<String>,
}

impl ErrorResponse {
    pub(crate) fn new(kind: ErrorKind, status: StatusCode, code: &str, resource: &str) -> Self {
        Self {
            kind,
            status,
            code: code.to_string(),
            message: String::new(),
            resource: resource.to_string(),
            request_id: None,
            host_id: None,
            bucket_name: None,
            object_name: None,
            raw: None,
        }
    }

    /// Same response under a different kind
    pub(crate) fn rekind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, HTTP {})", self.kind, self.code, self.status.as_u16())?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if !self.resource.is_empty() {
            write!(f, " [resource: {}]", self.resource)?;
        }
        if let Some(ref id) = self.request_id {
            write!(f, " [request-id: {}]", id)?;
        }
        Ok(())
    }
}

/// S3 client errors
#[derive(Error, Debug)]
pub enum S3Error {
    #[error("S3 error: {0}")]
    Response(ErrorResponse),

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("part numbers are not contiguous: expected {expected}, found {found}")]
    PartSequence { expected: u32, found: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<S3Error>,
    },
}

impl From<quick_xml::Error> for S3Error {
    fn from(err: quick_xml::Error) -> Self {
        S3Error::Xml(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, S3Error>;

impl S3Error {
    /// Taxonomy kind, looking through context wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            S3Error::Response(resp) => resp.kind,
            S3Error::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            S3Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            S3Error::PartSequence { .. }
            | S3Error::InvalidResponse(_)
            | S3Error::Xml(_)
            | S3Error::Io(_) => ErrorKind::InternalClientError,
            S3Error::Transport(_) => ErrorKind::TransportError,
            S3Error::Context { source, .. } => source.kind(),
        }
    }

    /// The server response behind this error, if there is one
    pub fn response(&self) -> Option<&ErrorResponse> {
        match self {
            S3Error::Response(resp) => Some(resp),
            S3Error::Context { source, .. } => source.response(),
            _ => None,
        }
    }

    /// Wrap with additional context, keeping the kind
    pub fn context(self, context: impl Into<String>) -> Self {
        S3Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// `.context(...)` on results, mirroring anyhow
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.context(f()))
    }
}
