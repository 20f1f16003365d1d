//! S3 client: request assembly and the public operations
//!
//! Every operation goes through one pipeline:
//! - build path and query, the same strings are signed and sent
//! - fetch credentials, sign (or send anonymously)
//! - hand the request to the [`Transport`], report it to the [`TraceSink`]
//! - run the response through the classifier
//!
//! No retries happen here; that policy belongs to the caller.

use crate::config::{Endpoint, Profile};
use crate::s3::canonical::{encode_path, QueryParams};
use crate::s3::checksum::md5_base64;
use crate::s3::classify::{classify, classify_with_embedded_error};
use crate::s3::credentials::{AnonymousProvider, CredentialProvider, Credentials, StaticProvider};
use crate::s3::error::{ErrorKind, Result, ResultExt, S3Error};
use crate::s3::multipart::{self, MAX_PARTS};
use crate::s3::paginate::{ListCursor, ObjectSource, PartSource, UploadSource};
use crate::s3::signer::{self, SigningScope};
use crate::s3::trace::{TraceSink, TracingSink};
use crate::s3::transport::{HttpRequest, HttpResponse, HyperTransport, Transport};
use crate::s3::types::{
    Bucket, BucketExistence, CompleteMultipartUploadResponse, CompletedPart,
    CreateMultipartUploadResponse, ListBucketResult, ListMultipartUploadsResult, ListPartsResult,
    ObjectStat, ObjectWriteResponse, UploadOptions,
};
use crate::s3::xml;
use bytes::Bytes;
use chrono::Utc;
use hyper::Method;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tracing::debug;

const USER_AGENT: &str = concat!("bucketwire/", env!("CARGO_PKG_VERSION"));

/// Region that needs no LocationConstraint on bucket creation
const DEFAULT_REGION: &str = "us-east-1";

/// Bucket names: 3..=63 chars of lowercase letters, digits, `.` and `-`,
/// alphanumeric at both ends, no `..`
pub fn validate_bucket_name(bucket: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(S3Error::InvalidArgument(format!(
            "invalid bucket name {:?}: {}",
            bucket, reason
        )))
    };

    if bucket.len() < 3 || bucket.len() > 63 {
        return invalid("must be between 3 and 63 characters");
    }
    if !bucket
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return invalid("only lowercase letters, digits, '.' and '-' are allowed");
    }
    let bytes = bucket.as_bytes();
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return invalid("must start and end with a letter or digit");
    }
    if bucket.contains("..") {
        return invalid("must not contain '..'");
    }
    Ok(())
}

/// Object keys: 1..=1024 bytes of UTF-8
pub fn validate_object_name(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(S3Error::InvalidArgument("object name must not be empty".to_string()));
    }
    if key.len() > 1024 {
        return Err(S3Error::InvalidArgument(format!(
            "object name is {} bytes, the limit is 1024",
            key.len()
        )));
    }
    Ok(())
}

/// One logical request before path encoding and signing
struct Call<'a> {
    method: Method,
    bucket: Option<&'a str>,
    key: Option<&'a str>,
    query: QueryParams,
    headers: BTreeMap<String, String>,
    body: Bytes,
    /// Treat an `<Error>` body in a 2xx response as a failure
    embedded_errors: bool,
}

impl<'a> Call<'a> {
    fn new(method: Method, bucket: Option<&'a str>, key: Option<&'a str>) -> Self {
        Self {
            method,
            bucket,
            key,
            query: QueryParams::new(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
            embedded_errors: false,
        }
    }

    fn query(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    /// Attach a body together with its Content-MD5
    fn body(mut self, body: Bytes) -> Self {
        self.headers
            .insert("content-md5".to_string(), md5_base64(&body));
        self.body = body;
        self
    }

    fn embedded_errors(mut self) -> Self {
        self.embedded_errors = true;
        self
    }
}

/// S3 client
///
/// Clone is cheap - everything is behind an Arc. Endpoint and region are
/// fixed for the lifetime of the client.
#[derive(Clone)]
pub struct S3Client {
    endpoint: Arc<Endpoint>,
    region: Arc<str>,
    provider: Arc<dyn CredentialProvider>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn TraceSink>,
}

impl S3Client {
    /// Client over an arbitrary transport, tracing through `tracing`
    pub fn new(
        endpoint: Endpoint,
        region: &str,
        provider: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            region: Arc::from(region),
            provider,
            transport,
            sink: Arc::new(TracingSink),
        }
    }

    /// Client for a configured profile over the hyper transport.
    ///
    /// Everything is validated here, once.
    pub fn from_profile(profile: &Profile) -> Result<Self> {
        let endpoint = Endpoint::parse(&profile.endpoint)?;
        if profile.region.trim().is_empty() {
            return Err(S3Error::InvalidArgument("region must not be empty".to_string()));
        }

        let provider: Arc<dyn CredentialProvider> =
            match (&profile.access_key, &profile.secret_key) {
                (Some(access_key), Some(secret_key)) => {
                    let mut credentials = Credentials::new(access_key, secret_key);
                    credentials.session_token = profile.session_token.clone();
                    Arc::new(StaticProvider::new(credentials))
                }
                (None, None) => Arc::new(AnonymousProvider),
                _ => {
                    return Err(S3Error::InvalidArgument(
                        "access_key and secret_key must be set together".to_string(),
                    ))
                }
            };

        let transport =
            HyperTransport::new(profile.insecure, Duration::from_secs(profile.request_timeout))?;

        Ok(Self::new(endpoint, &profile.region, provider, Arc::new(transport)))
    }

    /// Replace the per-request trace sink
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn execute(&self, call: Call<'_>) -> Result<HttpResponse> {
        let path = encode_path(call.bucket, call.key);
        let query_string = call.query.canonical_query();

        let mut url = String::with_capacity(64 + path.len() + query_string.len());
        let _ = write!(url, "{}{}", self.endpoint, path);
        if !query_string.is_empty() {
            url.push('?');
            url.push_str(&query_string);
        }

        let mut request = HttpRequest::new(call.method, url);
        request.headers = call.headers;
        request
            .headers
            .insert("host".to_string(), signer::host_header(&request.url)?);
        request
            .headers
            .insert("user-agent".to_string(), USER_AGENT.to_string());
        if !call.body.is_empty() || matches!(request.method, Method::PUT | Method::POST) {
            request
                .headers
                .insert("content-length".to_string(), call.body.len().to_string());
        }
        request.body = call.body;

        let credentials = self
            .provider
            .fetch()
            .await
            .context("fetching credentials")?;
        match credentials {
            Some(ref creds) => signer::sign_request(
                &mut request,
                &path,
                &call.query,
                creds,
                &self.region,
                Utc::now(),
            )?,
            None => debug!(url = %request.url, "anonymous request, not signed"),
        }
        drop(credentials);

        self.sink.on_request(&request);
        let start = Instant::now();
        let response = match self.transport.execute(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.sink.on_failure(&request, &e, start.elapsed());
                return Err(e.into());
            }
        };
        self.sink.on_response(&request, &response, start.elapsed());

        if call.embedded_errors {
            classify_with_embedded_error(&path, response)
        } else {
            classify(&path, response)
        }
    }

    // =========================================================================
    // Bucket operations
    // =========================================================================

    /// List all buckets owned by the caller
    pub async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let response = self.execute(Call::new(Method::GET, None, None)).await?;
        xml::parse_list_buckets(&response.body)
    }

    /// HEAD the bucket.
    ///
    /// `NotExists` only for a definite "no such bucket"; anything else that
    /// goes wrong is an error.
    pub async fn bucket_exists(&self, bucket: &str) -> Result<BucketExistence> {
        validate_bucket_name(bucket)?;
        match self.execute(Call::new(Method::HEAD, Some(bucket), None)).await {
            Ok(_) => Ok(BucketExistence::Exists),
            Err(e) if e.kind() == ErrorKind::BucketNotFound => Ok(BucketExistence::NotExists),
            Err(e) => Err(e),
        }
    }

    /// Create a bucket in the client's region
    pub async fn make_bucket(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        let mut call = Call::new(Method::PUT, Some(bucket), None);
        if self.region.as_ref() != DEFAULT_REGION {
            call = call
                .header("content-type", "application/xml")
                .body(Bytes::from(xml::create_bucket_body(&self.region)));
        }
        self.execute(call).await?;
        debug!(bucket = %bucket, region = %self.region, "bucket created");
        Ok(())
    }

    /// Delete an empty bucket
    pub async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        self.execute(Call::new(Method::DELETE, Some(bucket), None))
            .await?;
        Ok(())
    }

    // =========================================================================
    // Object operations
    // =========================================================================

    /// Object metadata (HEAD object)
    pub async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat> {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;

        let response = self
            .execute(Call::new(Method::HEAD, Some(bucket), Some(key)))
            .await?;

        let size = response
            .header("content-length")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                S3Error::InvalidResponse("HEAD object without a valid Content-Length".to_string())
            })?;

        Ok(ObjectStat {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            etag: response.etag(),
            last_modified: response.header("last-modified").map(str::to_string),
            content_type: response.header("content-type").map(str::to_string),
        })
    }

    /// Download a whole object into memory
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;
        let response = self
            .execute(Call::new(Method::GET, Some(bucket), Some(key)))
            .await?;
        Ok(response.body)
    }

    pub async fn remove_object(&self, bucket: &str, key: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;
        self.execute(Call::new(Method::DELETE, Some(bucket), Some(key)))
            .await?;
        Ok(())
    }

    /// Upload `size` bytes read from `reader`.
    ///
    /// Small objects go up in one PUT; larger ones through a (possibly
    /// resumed) multipart session.
    pub async fn put_object<R>(
        &self,
        bucket: &str,
        key: &str,
        reader: R,
        size: u64,
        options: &UploadOptions,
    ) -> Result<ObjectWriteResponse>
    where
        R: AsyncRead + Unpin + Send,
    {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;
        multipart::put_object(self, bucket, key, reader, size, options)
            .await
            .with_context(|| format!("put_object {}/{}", bucket, key))
    }

    /// Single PUT of an in-memory payload. Returns the ETag.
    pub async fn put_object_bytes(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<String> {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;

        let call = Call::new(Method::PUT, Some(bucket), Some(key))
            .header("content-type", content_type)
            .body(data);
        let response = self.execute(call).await?;
        response
            .etag()
            .ok_or_else(|| S3Error::InvalidResponse("PUT object response without ETag".to_string()))
    }

    /// Lazily list objects. `delimiter` rolls keys up into common prefixes.
    pub fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
    ) -> ListCursor<ObjectSource> {
        ListCursor::new(
            ObjectSource::new(self.clone(), bucket)
                .with_prefix(prefix)
                .with_delimiter(delimiter),
        )
    }

    /// One ListObjects (v1) page
    pub async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        marker: Option<&str>,
        max_keys: u32,
    ) -> Result<ListBucketResult> {
        validate_bucket_name(bucket)?;

        let mut query = QueryParams::new();
        query
            .insert_opt("delimiter", delimiter)
            .insert_opt("marker", marker)
            .insert("max-keys", max_keys.to_string())
            .insert_opt("prefix", prefix);

        let response = self
            .execute(Call::new(Method::GET, Some(bucket), None).query(query))
            .await?;
        xml::parse_list_objects(&response.body)
    }

    // =========================================================================
    // Multipart upload operations
    // =========================================================================

    /// Lazily list incomplete multipart uploads
    pub fn list_incomplete_uploads(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> ListCursor<UploadSource> {
        ListCursor::new(UploadSource::new(self.clone(), bucket, prefix))
    }

    /// One ListMultipartUploads page
    pub async fn list_uploads_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        key_marker: Option<&str>,
        upload_id_marker: Option<&str>,
        max_uploads: u32,
    ) -> Result<ListMultipartUploadsResult> {
        validate_bucket_name(bucket)?;

        let mut query = QueryParams::new();
        query
            .insert_flag("uploads")
            .insert_opt("key-marker", key_marker)
            .insert("max-uploads", max_uploads.to_string())
            .insert_opt("prefix", prefix);
        // upload-id-marker is ignored by the server without key-marker
        if key_marker.is_some() {
            query.insert_opt("upload-id-marker", upload_id_marker);
        }

        let response = self
            .execute(Call::new(Method::GET, Some(bucket), None).query(query))
            .await?;
        xml::parse_list_uploads(&response.body)
    }

    /// Lazily list the parts of an upload session
    pub fn list_parts(&self, bucket: &str, key: &str, upload_id: &str) -> ListCursor<PartSource> {
        ListCursor::new(PartSource::new(self.clone(), bucket, key, upload_id))
    }

    /// One ListParts page
    pub async fn list_parts_page(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: u32,
    ) -> Result<ListPartsResult> {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;

        let mut query = QueryParams::new();
        query
            .insert("max-parts", max_parts.to_string())
            .insert("uploadId", upload_id);
        if part_number_marker > 0 {
            query.insert("part-number-marker", part_number_marker.to_string());
        }

        let response = self
            .execute(Call::new(Method::GET, Some(bucket), Some(key)).query(query))
            .await?;
        xml::parse_list_parts(&response.body)
    }

    /// Initiate a multipart upload (CreateMultipartUpload)
    ///
    /// Returns an upload ID that must be used in subsequent UploadPart and
    /// CompleteMultipartUpload or AbortMultipartUpload calls.
    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<CreateMultipartUploadResponse> {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;

        let mut query = QueryParams::new();
        query.insert_flag("uploads");
        let call = Call::new(Method::POST, Some(bucket), Some(key))
            .query(query)
            .header("content-type", content_type);

        let response = self.execute(call).await?;
        xml::parse_create_multipart(&response.body)
    }

    /// Upload one part (UploadPart). Returns its ETag.
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String> {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;
        if part_number == 0 || part_number > MAX_PARTS {
            return Err(S3Error::InvalidArgument(format!(
                "part number {} outside 1..={}",
                part_number, MAX_PARTS
            )));
        }

        let mut query = QueryParams::new();
        query
            .insert("partNumber", part_number.to_string())
            .insert("uploadId", upload_id);
        let call = Call::new(Method::PUT, Some(bucket), Some(key))
            .query(query)
            .body(data);

        let response = self.execute(call).await?;
        response.etag().ok_or_else(|| {
            S3Error::InvalidResponse(format!("UploadPart {} response without ETag", part_number))
        })
    }

    /// Complete a multipart upload (CompleteMultipartUpload)
    ///
    /// `parts` must be non-empty and in ascending part-number order.
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartUploadResponse> {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;
        if parts.is_empty() {
            return Err(S3Error::InvalidArgument(
                "cannot complete an upload without parts".to_string(),
            ));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(S3Error::InvalidArgument(
                "parts must be in ascending part-number order".to_string(),
            ));
        }

        let mut query = QueryParams::new();
        query.insert("uploadId", upload_id);
        let call = Call::new(Method::POST, Some(bucket), Some(key))
            .query(query)
            .header("content-type", "application/xml")
            .body(Bytes::from(xml::complete_multipart_body(parts)))
            .embedded_errors();

        let response = self.execute(call).await?;
        let mut completed = xml::parse_complete_multipart(&response.body)?;
        if completed.etag.is_empty() {
            completed.etag = response.etag().unwrap_or_default();
        }
        Ok(completed)
    }

    /// Abort a multipart upload (AbortMultipartUpload)
    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;

        let mut query = QueryParams::new();
        query.insert("uploadId", upload_id);
        self.execute(Call::new(Method::DELETE, Some(bucket), Some(key)).query(query))
            .await?;
        Ok(())
    }

    /// Abort every incomplete upload, optionally only under `prefix`.
    /// Returns how many were aborted.
    pub async fn remove_incomplete_uploads(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<usize> {
        validate_bucket_name(bucket)?;
        multipart::remove_incomplete_uploads(self, bucket, prefix).await
    }

    // =========================================================================
    // Presigned URLs
    // =========================================================================

    /// URL granting GET on one object for `expires`, without credentials.
    pub async fn presigned_get_object(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
    ) -> Result<String> {
        validate_bucket_name(bucket)?;
        validate_object_name(key)?;

        let credentials = self
            .provider
            .fetch()
            .await
            .context("fetching credentials")?
            .ok_or_else(|| {
                S3Error::InvalidArgument("presigning requires credentials".to_string())
            })?;

        let scope = SigningScope::new(Utc::now(), self.region.as_ref());
        signer::presign_url(
            "GET",
            &self.endpoint.base_url(),
            &encode_path(Some(bucket), Some(key)),
            &QueryParams::new(),
            &credentials,
            &scope,
            expires.as_secs(),
        )
    }
}
