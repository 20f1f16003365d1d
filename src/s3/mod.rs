//! S3 protocol client
//!
//! - SigV4 canonicalisation and signing
//! - response classification into a closed error taxonomy
//! - lazy paginated listings
//! - resumable multipart uploads

pub mod canonical;
pub mod checksum;
pub mod classify;
pub mod client;
pub mod credentials;
pub mod error;
pub mod multipart;
pub mod paginate;
pub mod signer;
pub mod trace;
pub mod transport;
pub mod types;
pub mod xml;

// Re-export main types for convenience
pub use client::S3Client;
pub use credentials::{AnonymousProvider, CredentialProvider, Credentials, StaticProvider};
pub use error::{ErrorKind, ErrorResponse, Result, S3Error};
pub use paginate::{ListCursor, ListPage, PageSource};
pub use trace::{NoopSink, TraceSink, TracingSink};
pub use transport::{HttpRequest, HttpResponse, HyperTransport, Transport, TransportError};
pub use types::{
    Bucket, BucketExistence, ListEntry, ObjectStat, ObjectWriteResponse, Part, S3Object, Upload,
    UploadOptions,
};
