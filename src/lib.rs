//! bucketwire - S3-compatible object storage client
//!
//! SigV4 signing, typed error classification, lazy pagination and resumable
//! multipart uploads over a pluggable HTTP transport.

pub mod cli;
pub mod config;
pub mod s3;

pub use config::Config;
pub use s3::S3Client;
