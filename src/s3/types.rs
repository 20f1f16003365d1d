//! S3 types and response structures

/// Bucket as reported by ListBuckets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub creation_date: Option<String>,
}

/// S3 Object metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Object {
    /// Object key
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp (optional)
    pub last_modified: Option<String>,
    /// ETag without quotes (optional)
    pub etag: Option<String>,
    /// Storage class (STANDARD, STANDARD_IA, GLACIER, etc.)
    pub storage_class: Option<String>,
}

impl S3Object {
    /// Create a new S3Object
    pub fn new(key: String, size: u64) -> Self {
        Self {
            key,
            size,
            last_modified: None,
            etag: None,
            storage_class: None,
        }
    }
}

/// One entry of an object listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    Object(S3Object),
    /// Common prefix rolled up by a delimiter ("directory")
    CommonPrefix(String),
}

impl ListEntry {
    pub fn key(&self) -> &str {
        match self {
            ListEntry::Object(obj) => &obj.key,
            ListEntry::CommonPrefix(prefix) => prefix,
        }
    }

    pub fn is_prefix(&self) -> bool {
        matches!(self, ListEntry::CommonPrefix(_))
    }
}

/// Response from ListObjects (v1, marker based)
#[derive(Debug, Clone, Default)]
pub struct ListBucketResult {
    pub name: Option<String>,
    pub prefix: Option<String>,
    pub marker: Option<String>,
    /// Only sent by the server when a delimiter was given
    pub next_marker: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
    pub is_truncated: bool,
    pub contents: Vec<S3Object>,
    /// Common prefixes (subdirectories when using delimiter)
    pub common_prefixes: Vec<String>,
}

/// An in-progress multipart upload session as listed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub key: String,
    pub upload_id: String,
    /// ISO-8601 initiation time
    pub initiated: Option<String>,
    pub storage_class: Option<String>,
}

/// Response from ListMultipartUploads
#[derive(Debug, Clone, Default)]
pub struct ListMultipartUploadsResult {
    pub bucket: Option<String>,
    pub key_marker: Option<String>,
    pub upload_id_marker: Option<String>,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
    pub max_uploads: Option<u32>,
    pub is_truncated: bool,
    pub uploads: Vec<Upload>,
    pub common_prefixes: Vec<String>,
}

/// An uploaded part of a multipart session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// 1-based part number
    pub part_number: u32,
    /// ETag without quotes
    pub etag: String,
    pub size: u64,
    pub last_modified: Option<String>,
}

/// Response from ListParts
#[derive(Debug, Clone, Default)]
pub struct ListPartsResult {
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub upload_id: Option<String>,
    pub part_number_marker: Option<u32>,
    pub next_part_number_marker: Option<u32>,
    pub max_parts: Option<u32>,
    pub is_truncated: bool,
    pub parts: Vec<Part>,
}

// =============================================================================
// Multipart Upload Types
// =============================================================================

/// Response from CreateMultipartUpload operation
#[derive(Debug, Clone)]
pub struct CreateMultipartUploadResponse {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Upload ID for subsequent UploadPart and CompleteMultipartUpload requests
    pub upload_id: String,
}

impl CreateMultipartUploadResponse {
    pub fn new(bucket: String, key: String, upload_id: String) -> Self {
        Self {
            bucket,
            key,
            upload_id,
        }
    }
}

/// Part information for CompleteMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// Part number (1-10000)
    pub part_number: u32,
    /// ETag returned from UploadPart
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: String) -> Self {
        Self { part_number, etag }
    }
}

impl From<&Part> for CompletedPart {
    fn from(part: &Part) -> Self {
        Self::new(part.part_number, part.etag.clone())
    }
}

/// Response from CompleteMultipartUpload operation
#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadResponse {
    /// Location URL of the completed object
    pub location: Option<String>,
    pub bucket: String,
    pub key: String,
    /// ETag of the completed object
    pub etag: String,
}

/// Client-side view of one multipart upload in flight.
///
/// `parts` only ever grows in part-number order; the completion manifest is
/// derived from it.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub size: u64,
    pub upload_id: String,
    pub parts: Vec<Part>,
}

impl UploadSession {
    pub fn new(bucket: &str, key: &str, content_type: &str, size: u64, upload_id: String) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            size,
            upload_id,
            parts: Vec::new(),
        }
    }

    /// Bytes accounted for by recorded parts
    pub fn uploaded_bytes(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }

    /// Part number the next upload will use
    pub fn next_part_number(&self) -> u32 {
        self.parts.last().map(|p| p.part_number + 1).unwrap_or(1)
    }

    pub fn manifest(&self) -> Vec<CompletedPart> {
        self.parts.iter().map(CompletedPart::from).collect()
    }
}

/// Result of HEAD object
#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

/// Result of a completed object write
#[derive(Debug, Clone)]
pub struct ObjectWriteResponse {
    pub bucket: String,
    pub key: String,
    pub etag: String,
    /// Set when the object went through a multipart session
    pub upload_id: Option<String>,
    /// Number of parts the object was assembled from (1 for single-shot)
    pub part_count: u32,
}

/// Outcome of an existence check.
///
/// "Could not determine" is the `Err` side of the surrounding `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketExistence {
    Exists,
    NotExists,
}

impl BucketExistence {
    pub fn exists(self) -> bool {
        self == BucketExistence::Exists
    }
}

/// Options for put_object
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Content type of the object (default: application/octet-stream)
    pub content_type: String,
    /// Parts uploaded concurrently; 1 keeps uploads strictly sequential
    pub concurrency: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            content_type: "application/octet-stream".to_string(),
            concurrency: 1,
        }
    }
}

impl UploadOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Opt in to concurrent part uploads
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}
