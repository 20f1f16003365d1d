//! In-memory S3 server behind the `Transport` trait
//!
//! Enough of the REST API for the client's bucket, object, listing and
//! multipart calls, with hooks to inject failures.

#![allow(dead_code)]

use async_trait::async_trait;
use bucketwire::config::Endpoint;
use bucketwire::s3::checksum::md5_hex;
use bucketwire::s3::{
    Credentials, HttpRequest, HttpResponse, S3Client, StaticProvider, Transport, TransportError,
};
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Method, StatusCode};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

pub const ENDPOINT: &str = "http://mock.local";

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub etag: String,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct MockUpload {
    pub bucket: String,
    pub key: String,
    pub initiated: String,
    pub parts: BTreeMap<u32, (String, Bytes)>,
}

/// One logged request: method, decoded path and raw query
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

impl LoggedRequest {
    pub fn is_upload_part(&self) -> bool {
        self.method == Method::PUT && self.query.contains_key("partNumber")
    }

    pub fn part_number(&self) -> Option<u32> {
        self.query.get("partNumber").and_then(|n| n.parse().ok())
    }
}

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, BTreeMap<String, StoredObject>>,
    uploads: BTreeMap<String, MockUpload>,
    upload_seq: u64,
    log: Vec<LoggedRequest>,
    fail_part: Option<u32>,
    complete_error: Option<(StatusCode, &'static str)>,
    forbidden_buckets: BTreeSet<String>,
}

#[derive(Default)]
pub struct MockS3 {
    state: Mutex<State>,
}

impl MockS3 {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_bucket(self: Arc<Self>, bucket: &str) -> Arc<Self> {
        self.state
            .lock()
            .unwrap()
            .buckets
            .insert(bucket.to_string(), BTreeMap::new());
        self
    }

    pub fn put(&self, bucket: &str, key: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let object = StoredObject {
            data: Bytes::copy_from_slice(data),
            etag: md5_hex(data),
            content_type: "application/octet-stream".to_string(),
        };
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        let state = self.state.lock().unwrap();
        state.buckets.get(bucket)?.get(key).cloned()
    }

    pub fn uploads(&self) -> Vec<MockUpload> {
        self.state.lock().unwrap().uploads.values().cloned().collect()
    }

    pub fn upload_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.keys().cloned().collect()
    }

    /// Start an upload session directly on the server
    pub fn start_upload(&self, bucket: &str, key: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.create_upload(bucket, key)
    }

    /// Store a part directly on the server
    pub fn put_part(&self, upload_id: &str, part_number: u32, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if let Some(upload) = state.uploads.get_mut(upload_id) {
            upload
                .parts
                .insert(part_number, (md5_hex(data), Bytes::copy_from_slice(data)));
        }
    }

    /// Fail UploadPart for this part number with a 500 until cleared
    pub fn fail_part(&self, part_number: Option<u32>) {
        self.state.lock().unwrap().fail_part = part_number;
    }

    /// Answer the next CompleteMultipartUpload with this error code
    pub fn fail_complete(&self, status: StatusCode, code: &'static str) {
        self.state.lock().unwrap().complete_error = Some((status, code));
    }

    /// Answer every request on this bucket with a bodyless 403
    pub fn forbid(&self, bucket: &str) {
        self.state
            .lock()
            .unwrap()
            .forbidden_buckets
            .insert(bucket.to_string());
    }

    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }
}

/// Client signed with fixed test credentials, talking to `mock`
pub fn client(mock: Arc<MockS3>) -> S3Client {
    let endpoint = Endpoint::parse(ENDPOINT).unwrap();
    let credentials = Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY");
    S3Client::new(
        endpoint,
        "us-east-1",
        Arc::new(StaticProvider::new(credentials)),
        mock,
    )
}

/// Deterministic, non-repeating test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn parse_url(url: &str) -> (String, HashMap<String, String>) {
    let rest = url.strip_prefix(ENDPOINT).unwrap_or(url);
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    let query = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(k), decode(v))
        })
        .collect();
    (decode(path), query)
}

fn xml(status: StatusCode, body: String) -> HttpResponse {
    let mut response = HttpResponse::new(status, Bytes::from(body));
    response.headers.insert(
        HeaderName::from_static("content-type"),
        HeaderValue::from_static("application/xml"),
    );
    response
}

fn error(status: StatusCode, code: &str, resource: &str) -> HttpResponse {
    xml(
        status,
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{}</Code><Message>mock error</Message><Resource>{}</Resource><RequestId>mock-req</RequestId></Error>",
            code,
            escape(resource)
        ),
    )
}

fn empty(status: StatusCode) -> HttpResponse {
    HttpResponse::new(status, Bytes::new())
}

fn with_etag(mut response: HttpResponse, etag: &str) -> HttpResponse {
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
        response.headers.insert(HeaderName::from_static("etag"), value);
    }
    response
}

fn tag(name: &str, value: impl std::fmt::Display) -> String {
    format!("<{0}>{1}</{0}>", name, escape(&value.to_string()))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn max_param(query: &HashMap<String, String>, name: &str) -> usize {
    query
        .get(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000)
}

impl State {
    fn create_upload(&mut self, bucket: &str, key: &str) -> String {
        self.upload_seq += 1;
        let seq = self.upload_seq;
        let upload_id = format!("upload-{:04}", seq);
        self.uploads.insert(
            upload_id.clone(),
            MockUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                initiated: format!("2026-01-01T00:{:02}:{:02}.000Z", seq / 60, seq % 60),
                parts: BTreeMap::new(),
            },
        );
        upload_id
    }

    fn handle(&mut self, request: &HttpRequest) -> HttpResponse {
        let (path, query) = parse_url(&request.url);
        self.log.push(LoggedRequest {
            method: request.method.clone(),
            path: path.clone(),
            query: query.clone(),
            headers: request.headers.clone(),
        });

        let trimmed = path.trim_start_matches('/');
        let (bucket, key) = match trimmed.split_once('/') {
            Some((b, k)) => (b.to_string(), k.to_string()),
            None => (trimmed.to_string(), String::new()),
        };

        if bucket.is_empty() {
            return self.list_buckets();
        }
        if self.forbidden_buckets.contains(&bucket) {
            return empty(StatusCode::FORBIDDEN);
        }
        if !self.buckets.contains_key(&bucket) && request.method != Method::PUT {
            return if request.method == Method::HEAD {
                empty(StatusCode::NOT_FOUND)
            } else {
                error(StatusCode::NOT_FOUND, "NoSuchBucket", &path)
            };
        }

        if key.is_empty() {
            self.bucket_request(request, &bucket, &path, &query)
        } else {
            self.object_request(request, &bucket, &key, &path, &query)
        }
    }

    fn list_buckets(&self) -> HttpResponse {
        let mut body = String::from("<ListAllMyBucketsResult><Buckets>");
        for name in self.buckets.keys() {
            body.push_str("<Bucket>");
            body.push_str(&tag("Name", name));
            body.push_str(&tag("CreationDate", "2026-01-01T00:00:00.000Z"));
            body.push_str("</Bucket>");
        }
        body.push_str("</Buckets></ListAllMyBucketsResult>");
        xml(StatusCode::OK, body)
    }

    fn bucket_request(
        &mut self,
        request: &HttpRequest,
        bucket: &str,
        path: &str,
        query: &HashMap<String, String>,
    ) -> HttpResponse {
        match request.method {
            Method::HEAD => empty(StatusCode::OK),
            Method::PUT => {
                if self.buckets.contains_key(bucket) {
                    return error(StatusCode::CONFLICT, "BucketAlreadyOwnedByYou", path);
                }
                self.buckets.insert(bucket.to_string(), BTreeMap::new());
                empty(StatusCode::OK)
            }
            Method::DELETE => {
                let is_empty = self.buckets.get(bucket).map_or(true, |b| b.is_empty());
                if !is_empty {
                    return error(StatusCode::CONFLICT, "BucketNotEmpty", path);
                }
                self.buckets.remove(bucket);
                empty(StatusCode::NO_CONTENT)
            }
            Method::GET if query.contains_key("uploads") => self.list_uploads(bucket, query),
            Method::GET => self.list_objects(bucket, query),
            _ => error(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", path),
        }
    }

    fn list_objects(&self, bucket: &str, query: &HashMap<String, String>) -> HttpResponse {
        let prefix = query.get("prefix").cloned().unwrap_or_default();
        let marker = query.get("marker").cloned().unwrap_or_default();
        let delimiter = query.get("delimiter").cloned();
        let max_keys = max_param(query, "max-keys");

        let mut contents = Vec::new();
        let mut prefixes: Vec<String> = Vec::new();
        let mut last = String::new();
        let mut truncated = false;

        let objects = &self.buckets[bucket];
        for (key, object) in objects.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let rolled = delimiter.as_deref().and_then(|d| {
                key[prefix.len()..]
                    .find(d)
                    .map(|pos| key[..prefix.len() + pos + d.len()].to_string())
            });
            let name = rolled.clone().unwrap_or_else(|| key.clone());
            if name <= marker || prefixes.last() == Some(&name) {
                continue;
            }
            if contents.len() + prefixes.len() == max_keys {
                truncated = true;
                break;
            }
            match rolled {
                Some(p) => prefixes.push(p),
                None => contents.push((key, object)),
            }
            last = name;
        }

        let mut body = String::from("<ListBucketResult>");
        body.push_str(&tag("Name", bucket));
        body.push_str(&tag("Prefix", &prefix));
        body.push_str(&tag("Marker", &marker));
        body.push_str(&tag("MaxKeys", max_keys));
        if let Some(ref d) = delimiter {
            body.push_str(&tag("Delimiter", d));
            if truncated {
                body.push_str(&tag("NextMarker", &last));
            }
        }
        body.push_str(&tag("IsTruncated", truncated));
        for (key, object) in contents {
            body.push_str("<Contents>");
            body.push_str(&tag("Key", key));
            body.push_str(&tag("LastModified", "2026-01-01T00:00:00.000Z"));
            body.push_str(&tag("ETag", format!("\"{}\"", object.etag)));
            body.push_str(&tag("Size", object.data.len()));
            body.push_str(&tag("StorageClass", "STANDARD"));
            body.push_str("</Contents>");
        }
        for p in prefixes {
            body.push_str("<CommonPrefixes>");
            body.push_str(&tag("Prefix", p));
            body.push_str("</CommonPrefixes>");
        }
        body.push_str("</ListBucketResult>");
        xml(StatusCode::OK, body)
    }

    fn list_uploads(&self, bucket: &str, query: &HashMap<String, String>) -> HttpResponse {
        let prefix = query.get("prefix").cloned().unwrap_or_default();
        let key_marker = query.get("key-marker").cloned();
        let id_marker = query.get("upload-id-marker").cloned().unwrap_or_default();
        let max_uploads = max_param(query, "max-uploads");

        let mut matching: Vec<(&String, &MockUpload)> = self
            .uploads
            .iter()
            .filter(|(_, u)| u.bucket == bucket && u.key.starts_with(&prefix))
            .filter(|(id, u)| match key_marker {
                Some(ref km) => u.key > *km || (u.key == *km && **id > id_marker),
                None => true,
            })
            .collect();
        matching.sort_by(|a, b| (&a.1.key, a.0).cmp(&(&b.1.key, b.0)));

        let truncated = matching.len() > max_uploads;
        matching.truncate(max_uploads);

        let mut body = String::from("<ListMultipartUploadsResult>");
        body.push_str(&tag("Bucket", bucket));
        body.push_str(&tag("MaxUploads", max_uploads));
        body.push_str(&tag("IsTruncated", truncated));
        if truncated {
            if let Some((id, upload)) = matching.last() {
                body.push_str(&tag("NextKeyMarker", &upload.key));
                body.push_str(&tag("NextUploadIdMarker", id));
            }
        }
        for (id, upload) in &matching {
            body.push_str("<Upload>");
            body.push_str(&tag("Key", &upload.key));
            body.push_str(&tag("UploadId", id));
            body.push_str("<Initiator><ID>mock</ID><DisplayName>mock</DisplayName></Initiator>");
            body.push_str(&tag("Initiated", &upload.initiated));
            body.push_str(&tag("StorageClass", "STANDARD"));
            body.push_str("</Upload>");
        }
        body.push_str("</ListMultipartUploadsResult>");
        xml(StatusCode::OK, body)
    }

    fn object_request(
        &mut self,
        request: &HttpRequest,
        bucket: &str,
        key: &str,
        path: &str,
        query: &HashMap<String, String>,
    ) -> HttpResponse {
        let upload_id = query.get("uploadId").cloned();
        match (&request.method, upload_id) {
            (&Method::POST, None) if query.contains_key("uploads") => {
                let id = self.create_upload(bucket, key);
                xml(
                    StatusCode::OK,
                    format!(
                        "<InitiateMultipartUploadResult>{}{}{}</InitiateMultipartUploadResult>",
                        tag("Bucket", bucket),
                        tag("Key", key),
                        tag("UploadId", id)
                    ),
                )
            }
            (&Method::PUT, Some(id)) => self.upload_part(request, &id, path, query),
            (&Method::GET, Some(id)) => self.list_parts(bucket, key, &id, path, query),
            (&Method::POST, Some(id)) => self.complete(request, bucket, key, &id, path),
            (&Method::DELETE, Some(id)) => match self.uploads.remove(&id) {
                Some(_) => empty(StatusCode::NO_CONTENT),
                None => error(StatusCode::NOT_FOUND, "NoSuchUpload", path),
            },
            (&Method::PUT, None) => {
                let object = StoredObject {
                    etag: md5_hex(&request.body),
                    data: request.body.clone(),
                    content_type: request
                        .header("content-type")
                        .unwrap_or("binary/octet-stream")
                        .to_string(),
                };
                let etag = object.etag.clone();
                if let Some(objects) = self.buckets.get_mut(bucket) {
                    objects.insert(key.to_string(), object);
                }
                with_etag(empty(StatusCode::OK), &etag)
            }
            (&Method::GET, None) | (&Method::HEAD, None) => {
                let Some(object) = self.buckets[bucket].get(key) else {
                    return if request.method == Method::HEAD {
                        empty(StatusCode::NOT_FOUND)
                    } else {
                        error(StatusCode::NOT_FOUND, "NoSuchKey", path)
                    };
                };
                let body = if request.method == Method::HEAD {
                    Bytes::new()
                } else {
                    object.data.clone()
                };
                let mut response = with_etag(HttpResponse::new(StatusCode::OK, body), &object.etag);
                response.headers.insert(
                    HeaderName::from_static("content-length"),
                    HeaderValue::from(object.data.len() as u64),
                );
                if let Ok(value) = HeaderValue::from_str(&object.content_type) {
                    response
                        .headers
                        .insert(HeaderName::from_static("content-type"), value);
                }
                response
            }
            (&Method::DELETE, None) => {
                if let Some(objects) = self.buckets.get_mut(bucket) {
                    objects.remove(key);
                }
                empty(StatusCode::NO_CONTENT)
            }
            _ => error(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", path),
        }
    }

    fn upload_part(
        &mut self,
        request: &HttpRequest,
        upload_id: &str,
        path: &str,
        query: &HashMap<String, String>,
    ) -> HttpResponse {
        let Some(part_number) = query.get("partNumber").and_then(|n| n.parse::<u32>().ok()) else {
            return error(StatusCode::BAD_REQUEST, "InvalidArgument", path);
        };
        if self.fail_part == Some(part_number) {
            return error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", path);
        }
        let Some(upload) = self.uploads.get_mut(upload_id) else {
            return error(StatusCode::NOT_FOUND, "NoSuchUpload", path);
        };
        let etag = md5_hex(&request.body);
        upload
            .parts
            .insert(part_number, (etag.clone(), request.body.clone()));
        with_etag(empty(StatusCode::OK), &etag)
    }

    fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        path: &str,
        query: &HashMap<String, String>,
    ) -> HttpResponse {
        let Some(upload) = self.uploads.get(upload_id) else {
            return error(StatusCode::NOT_FOUND, "NoSuchUpload", path);
        };
        let marker: u32 = query
            .get("part-number-marker")
            .and_then(|m| m.parse().ok())
            .unwrap_or(0);
        let max_parts = max_param(query, "max-parts");

        let mut parts: Vec<(&u32, &(String, Bytes))> =
            upload.parts.range(marker + 1..).collect();
        let truncated = parts.len() > max_parts;
        parts.truncate(max_parts);

        let mut body = String::from("<ListPartsResult>");
        body.push_str(&tag("Bucket", bucket));
        body.push_str(&tag("Key", key));
        body.push_str(&tag("UploadId", upload_id));
        body.push_str(&tag("PartNumberMarker", marker));
        if let Some((n, _)) = parts.last() {
            body.push_str(&tag("NextPartNumberMarker", n));
        }
        body.push_str(&tag("MaxParts", max_parts));
        body.push_str(&tag("IsTruncated", truncated));
        for (n, (etag, data)) in parts {
            body.push_str("<Part>");
            body.push_str(&tag("PartNumber", n));
            body.push_str(&tag("LastModified", "2026-01-01T00:00:00.000Z"));
            body.push_str(&tag("ETag", format!("\"{}\"", etag)));
            body.push_str(&tag("Size", data.len()));
            body.push_str("</Part>");
        }
        body.push_str("</ListPartsResult>");
        xml(StatusCode::OK, body)
    }

    fn complete(
        &mut self,
        request: &HttpRequest,
        bucket: &str,
        key: &str,
        upload_id: &str,
        path: &str,
    ) -> HttpResponse {
        if let Some((status, code)) = self.complete_error.take() {
            return error(status, code, path);
        }
        let Some(upload) = self.uploads.get(upload_id) else {
            return error(StatusCode::NOT_FOUND, "NoSuchUpload", path);
        };

        let body = String::from_utf8_lossy(&request.body);
        let mut data = Vec::new();
        let mut etags = String::new();
        for chunk in body.split("<Part>").skip(1) {
            let field = |name: &str| {
                let open = format!("<{}>", name);
                let close = format!("</{}>", name);
                let start = chunk.find(&open)? + open.len();
                let end = chunk.find(&close)?;
                Some(chunk[start..end].to_string())
            };
            let number: Option<u32> = field("PartNumber").and_then(|n| n.parse().ok());
            let etag = field("ETag").unwrap_or_default().replace("&quot;", "").replace('"', "");
            match number.and_then(|n| upload.parts.get(&n)) {
                Some((stored, bytes)) if *stored == etag => {
                    data.extend_from_slice(bytes);
                    etags.push_str(stored);
                }
                _ => return error(StatusCode::BAD_REQUEST, "InvalidPart", path),
            }
        }

        let count = body.matches("<Part>").count();
        let etag = format!("{}-{}", md5_hex(etags.as_bytes()), count);
        let object = StoredObject {
            data: Bytes::from(data),
            etag: etag.clone(),
            content_type: "application/octet-stream".to_string(),
        };
        self.uploads.remove(upload_id);
        if let Some(objects) = self.buckets.get_mut(bucket) {
            objects.insert(key.to_string(), object);
        }

        xml(
            StatusCode::OK,
            format!(
                "<CompleteMultipartUploadResult>{}{}{}{}</CompleteMultipartUploadResult>",
                tag("Location", format!("{}/{}/{}", ENDPOINT, bucket, key)),
                tag("Bucket", bucket),
                tag("Key", key),
                tag("ETag", format!("\"{}\"", etag))
            ),
        )
    }
}

#[async_trait]
impl Transport for MockS3 {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(state.handle(request))
    }
}
