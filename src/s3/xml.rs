//! XML bodies: response parsers and request body builders
//!
//! Parsers walk quick-xml events and match on local names, so the S3
//! namespace on success documents (and its absence on error documents) makes
//! no difference.

use crate::s3::checksum::trim_etag;
use crate::s3::error::{Result, S3Error};
use crate::s3::types::{
    Bucket, CompleteMultipartUploadResponse, CompletedPart, CreateMultipartUploadResponse,
    ListBucketResult, ListMultipartUploadsResult, ListPartsResult, Part, S3Object, Upload,
};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt::Write as FmtWrite;

fn reader(xml_data: &[u8]) -> Reader<&[u8]> {
    // Keys, prefixes and markers may carry significant whitespace, so
    // nothing is trimmed here. Numeric and boolean fields trim their own text.
    Reader::from_reader(xml_data)
}

fn take_non_empty(text: &mut String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(std::mem::take(text))
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, text: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| S3Error::Xml(format!("invalid {} value: {:?}", field, text)))
}

/// Parse ListAllMyBucketsResult
pub fn parse_list_buckets(xml_data: &[u8]) -> Result<Vec<Bucket>> {
    let mut reader = reader(xml_data);
    let mut buckets = Vec::new();
    let mut current: Option<Bucket> = None;
    let mut current_text = String::with_capacity(64);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_text.clear();
                if e.local_name().as_ref() == b"Bucket" {
                    current = Some(Bucket {
                        name: String::new(),
                        creation_date: None,
                    });
                }
            }
            Ok(Event::Text(e)) => {
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Name" => {
                        if let Some(ref mut bucket) = current {
                            bucket.name = std::mem::take(&mut current_text);
                        }
                    }
                    b"CreationDate" => {
                        if let Some(ref mut bucket) = current {
                            bucket.creation_date = take_non_empty(&mut current_text);
                        }
                    }
                    b"Bucket" => {
                        if let Some(bucket) = current.take() {
                            buckets.push(bucket);
                        }
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    Ok(buckets)
}

/// Parse ListBucketResult (ListObjects v1)
pub fn parse_list_objects(xml_data: &[u8]) -> Result<ListBucketResult> {
    let mut reader = reader(xml_data);

    let mut response = ListBucketResult::default();
    response.contents.reserve(1000);

    let mut current_object: Option<S3Object> = None;
    let mut current_text = String::with_capacity(256);
    let mut in_common_prefixes = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_text.clear();
                match e.local_name().as_ref() {
                    b"Contents" => current_object = Some(S3Object::new(String::new(), 0)),
                    b"CommonPrefixes" => in_common_prefixes = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match (e.local_name().as_ref(), current_object.as_mut()) {
                    (b"Key", Some(obj)) => obj.key = std::mem::take(&mut current_text),
                    (b"Size", Some(obj)) => obj.size = parse_number("Size", &current_text)?,
                    (b"LastModified", Some(obj)) => {
                        obj.last_modified = take_non_empty(&mut current_text)
                    }
                    (b"ETag", Some(obj)) => {
                        obj.etag = Some(trim_etag(&current_text).to_string())
                    }
                    (b"StorageClass", Some(obj)) => {
                        obj.storage_class = take_non_empty(&mut current_text)
                    }
                    (b"Contents", Some(_)) => {
                        if let Some(obj) = current_object.take() {
                            response.contents.push(obj);
                        }
                    }
                    (b"CommonPrefixes", _) => in_common_prefixes = false,
                    (b"Prefix", None) => {
                        if in_common_prefixes {
                            response.common_prefixes.push(std::mem::take(&mut current_text));
                        } else {
                            response.prefix = take_non_empty(&mut current_text);
                        }
                    }
                    (b"Name", None) => response.name = take_non_empty(&mut current_text),
                    (b"Marker", None) => response.marker = take_non_empty(&mut current_text),
                    (b"NextMarker", None) => {
                        response.next_marker = take_non_empty(&mut current_text)
                    }
                    (b"Delimiter", None) => {
                        response.delimiter = take_non_empty(&mut current_text)
                    }
                    (b"MaxKeys", None) => response.max_keys = current_text.trim().parse().ok(),
                    (b"IsTruncated", None) => {
                        response.is_truncated = current_text.trim() == "true"
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    Ok(response)
}

/// Parse ListMultipartUploadsResult
pub fn parse_list_uploads(xml_data: &[u8]) -> Result<ListMultipartUploadsResult> {
    let mut reader = reader(xml_data);

    let mut response = ListMultipartUploadsResult::default();
    let mut current_upload: Option<Upload> = None;
    let mut current_text = String::with_capacity(256);
    let mut in_common_prefixes = false;
    // Initiator and Owner carry their own ID/DisplayName children
    let mut in_principal = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_text.clear();
                match e.local_name().as_ref() {
                    b"Upload" => {
                        current_upload = Some(Upload {
                            key: String::new(),
                            upload_id: String::new(),
                            initiated: None,
                            storage_class: None,
                        })
                    }
                    b"CommonPrefixes" => in_common_prefixes = true,
                    b"Initiator" | b"Owner" => in_principal = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                if in_principal {
                    if matches!(e.local_name().as_ref(), b"Initiator" | b"Owner") {
                        in_principal = false;
                    }
                    current_text.clear();
                    continue;
                }
                match (e.local_name().as_ref(), current_upload.as_mut()) {
                    (b"Key", Some(upload)) => upload.key = std::mem::take(&mut current_text),
                    (b"UploadId", Some(upload)) => {
                        upload.upload_id = std::mem::take(&mut current_text)
                    }
                    (b"Initiated", Some(upload)) => {
                        upload.initiated = take_non_empty(&mut current_text)
                    }
                    (b"StorageClass", Some(upload)) => {
                        upload.storage_class = take_non_empty(&mut current_text)
                    }
                    (b"Upload", Some(_)) => {
                        if let Some(upload) = current_upload.take() {
                            response.uploads.push(upload);
                        }
                    }
                    (b"CommonPrefixes", _) => in_common_prefixes = false,
                    (b"Prefix", None) if in_common_prefixes => {
                        response.common_prefixes.push(std::mem::take(&mut current_text));
                    }
                    (b"Bucket", None) => response.bucket = take_non_empty(&mut current_text),
                    (b"KeyMarker", None) => {
                        response.key_marker = take_non_empty(&mut current_text)
                    }
                    (b"UploadIdMarker", None) => {
                        response.upload_id_marker = take_non_empty(&mut current_text)
                    }
                    (b"NextKeyMarker", None) => {
                        response.next_key_marker = take_non_empty(&mut current_text)
                    }
                    (b"NextUploadIdMarker", None) => {
                        response.next_upload_id_marker = take_non_empty(&mut current_text)
                    }
                    (b"MaxUploads", None) => {
                        response.max_uploads = current_text.trim().parse().ok()
                    }
                    (b"IsTruncated", None) => {
                        response.is_truncated = current_text.trim() == "true"
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    Ok(response)
}

/// Parse ListPartsResult
pub fn parse_list_parts(xml_data: &[u8]) -> Result<ListPartsResult> {
    let mut reader = reader(xml_data);

    let mut response = ListPartsResult::default();
    let mut current_part: Option<Part> = None;
    let mut current_text = String::with_capacity(128);
    let mut in_principal = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_text.clear();
                match e.local_name().as_ref() {
                    b"Part" => {
                        current_part = Some(Part {
                            part_number: 0,
                            etag: String::new(),
                            size: 0,
                            last_modified: None,
                        })
                    }
                    b"Initiator" | b"Owner" => in_principal = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                if in_principal {
                    if matches!(e.local_name().as_ref(), b"Initiator" | b"Owner") {
                        in_principal = false;
                    }
                    current_text.clear();
                    continue;
                }
                match (e.local_name().as_ref(), current_part.as_mut()) {
                    (b"PartNumber", Some(part)) => {
                        part.part_number = parse_number("PartNumber", &current_text)?
                    }
                    (b"ETag", Some(part)) => part.etag = trim_etag(&current_text).to_string(),
                    (b"Size", Some(part)) => part.size = parse_number("Size", &current_text)?,
                    (b"LastModified", Some(part)) => {
                        part.last_modified = take_non_empty(&mut current_text)
                    }
                    (b"Part", Some(_)) => {
                        if let Some(part) = current_part.take() {
                            response.parts.push(part);
                        }
                    }
                    (b"Bucket", None) => response.bucket = take_non_empty(&mut current_text),
                    (b"Key", None) => response.key = take_non_empty(&mut current_text),
                    (b"UploadId", None) => response.upload_id = take_non_empty(&mut current_text),
                    (b"PartNumberMarker", None) => {
                        response.part_number_marker = current_text.trim().parse().ok()
                    }
                    (b"NextPartNumberMarker", None) => {
                        response.next_part_number_marker = current_text.trim().parse().ok()
                    }
                    (b"MaxParts", None) => response.max_parts = current_text.trim().parse().ok(),
                    (b"IsTruncated", None) => {
                        response.is_truncated = current_text.trim() == "true"
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    Ok(response)
}

/// Parse InitiateMultipartUploadResult
pub fn parse_create_multipart(xml_data: &[u8]) -> Result<CreateMultipartUploadResponse> {
    let mut reader = reader(xml_data);

    let mut bucket = String::new();
    let mut key = String::new();
    let mut upload_id = String::new();
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => current_text.clear(),
            Ok(Event::Text(e)) => {
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Bucket" => bucket = std::mem::take(&mut current_text),
                    b"Key" => key = std::mem::take(&mut current_text),
                    b"UploadId" => upload_id = std::mem::take(&mut current_text),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    if upload_id.is_empty() {
        return Err(S3Error::InvalidResponse(
            "missing UploadId in InitiateMultipartUploadResult".to_string(),
        ));
    }

    Ok(CreateMultipartUploadResponse::new(bucket, key, upload_id))
}

/// Parse CompleteMultipartUploadResult
pub fn parse_complete_multipart(xml_data: &[u8]) -> Result<CompleteMultipartUploadResponse> {
    let mut reader = reader(xml_data);

    let mut location = None;
    let mut bucket = String::new();
    let mut key = String::new();
    let mut etag = String::new();
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => current_text.clear(),
            Ok(Event::Text(e)) => {
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Location" => location = take_non_empty(&mut current_text),
                    b"Bucket" => bucket = std::mem::take(&mut current_text),
                    b"Key" => key = std::mem::take(&mut current_text),
                    b"ETag" => etag = trim_etag(&current_text).to_string(),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    Ok(CompleteMultipartUploadResponse {
        location,
        bucket,
        key,
        etag,
    })
}

/// Fields of an S3 `<Error>` document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub resource: Option<String>,
    pub request_id: Option<String>,
    pub host_id: Option<String>,
    pub bucket_name: Option<String>,
    pub key: Option<String>,
}

/// Parse an `<Error>` document.
///
/// Returns `None` for anything that is not a well-formed error envelope with a
/// non-empty `Code`.
pub fn parse_error(xml_data: &[u8]) -> Option<ErrorEnvelope> {
    if xml_data.is_empty() {
        return None;
    }

    let mut reader = reader(xml_data);
    let mut envelope = ErrorEnvelope::default();
    let mut current_text = String::with_capacity(128);
    let mut seen_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_text.clear();
                if !seen_root {
                    if e.local_name().as_ref() != b"Error" {
                        return None;
                    }
                    seen_root = true;
                }
            }
            Ok(Event::Text(e)) => {
                current_text.push_str(&e.unescape().ok()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Code" => envelope.code = std::mem::take(&mut current_text),
                    b"Message" => envelope.message = std::mem::take(&mut current_text),
                    b"Resource" => envelope.resource = take_non_empty(&mut current_text),
                    b"RequestId" => envelope.request_id = take_non_empty(&mut current_text),
                    b"HostId" => envelope.host_id = take_non_empty(&mut current_text),
                    b"BucketName" => envelope.bucket_name = take_non_empty(&mut current_text),
                    b"Key" => envelope.key = take_non_empty(&mut current_text),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    if envelope.code.is_empty() {
        None
    } else {
        Some(envelope)
    }
}

/// Escape XML special characters into an existing buffer
fn xml_escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}

/// CompleteMultipartUpload request body. `parts` must already be in order.
pub fn complete_multipart_body(parts: &[CompletedPart]) -> String {
    let mut xml = String::with_capacity(parts.len() * 100 + 100);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    xml.push_str("<CompleteMultipartUpload>");
    for part in parts {
        xml.push_str("<Part><PartNumber>");
        let _ = write!(xml, "{}", part.part_number);
        xml.push_str("</PartNumber><ETag>\"");
        xml_escape_into(&mut xml, trim_etag(&part.etag));
        xml.push_str("\"</ETag></Part>");
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

/// CreateBucketConfiguration body, needed outside us-east-1
pub fn create_bucket_body(region: &str) -> String {
    let mut xml = String::with_capacity(160);
    xml.push_str("<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">");
    xml.push_str("<LocationConstraint>");
    xml_escape_into(&mut xml, region);
    xml.push_str("</LocationConstraint></CreateBucketConfiguration>");
    xml
}
