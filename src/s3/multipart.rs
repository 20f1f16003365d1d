//! put_object: single-shot or multipart, with resume
//!
//! Objects up to [`MIN_PART_SIZE`] go up in one PUT. Anything larger goes
//! through a multipart session. An existing incomplete session for the same
//! key is picked up again: its recorded parts are checked against the bytes
//! read from the source, and only what does not match is uploaded.

use crate::s3::checksum::{etag_matches, md5_hex};
use crate::s3::client::S3Client;
use crate::s3::error::{ErrorKind, Result, ResultExt, S3Error};
use crate::s3::types::{ObjectWriteResponse, Part, Upload, UploadOptions, UploadSession};
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

/// Smallest part S3 accepts (except for the last one); also the
/// single-shot threshold
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
/// Largest part S3 accepts
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
pub const MAX_PARTS: u32 = 10_000;
/// Largest object a multipart upload can produce
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024 * 1024;

/// Part size for an object of `total` bytes
pub fn part_size(total: u64) -> u64 {
    std::cmp::max(MIN_PART_SIZE, total / (MAX_PARTS as u64 - 1))
}

/// How an object of a given size is split into parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    pub total: u64,
    pub part_size: u64,
    pub part_count: u32,
    pub last_part_size: u64,
}

impl PartPlan {
    pub fn for_size(total: u64) -> Result<Self> {
        if total > MAX_OBJECT_SIZE {
            return Err(S3Error::InvalidArgument(format!(
                "object size {} exceeds the maximum of {} bytes",
                total, MAX_OBJECT_SIZE
            )));
        }

        let part_size = part_size(total);
        let part_count = total.div_ceil(part_size);
        if part_count > MAX_PARTS as u64 || part_size > MAX_PART_SIZE {
            return Err(S3Error::InvalidArgument(format!(
                "object size {} cannot be split into at most {} parts",
                total, MAX_PARTS
            )));
        }

        let last_part_size = match total % part_size {
            0 if total > 0 => part_size,
            rem => rem,
        };

        Ok(Self {
            total,
            part_size,
            part_count: part_count as u32,
            last_part_size,
        })
    }
}

/// Read up to `limit` bytes, fewer only at end of stream
async fn read_chunk<R>(reader: &mut R, limit: u64) -> Result<Bytes>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = Vec::with_capacity(limit as usize);
    reader.take(limit).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Check that parts are numbered 1..=n without gaps
pub fn verify_sequence(parts: &[Part]) -> Result<()> {
    for (idx, part) in parts.iter().enumerate() {
        let expected = idx as u32 + 1;
        if part.part_number != expected {
            return Err(S3Error::PartSequence {
                expected,
                found: part.part_number,
            });
        }
    }
    Ok(())
}

/// Upload `size` bytes from `reader` to `bucket/key`.
///
/// The reader is consumed strictly sequentially and never past `size` bytes.
pub async fn put_object<R>(
    client: &S3Client,
    bucket: &str,
    key: &str,
    mut reader: R,
    size: u64,
    options: &UploadOptions,
) -> Result<ObjectWriteResponse>
where
    R: AsyncRead + Unpin + Send,
{
    if size <= MIN_PART_SIZE {
        let data = read_chunk(&mut reader, size).await?;
        if data.len() as u64 != size {
            return Err(S3Error::SizeMismatch {
                expected: size,
                actual: data.len() as u64,
            });
        }
        let etag = client
            .put_object_bytes(bucket, key, &options.content_type, data)
            .await?;
        return Ok(ObjectWriteResponse {
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag,
            upload_id: None,
            part_count: 1,
        });
    }

    let plan = PartPlan::for_size(size)?;
    let (mut session, recorded) = open_session(client, bucket, key, size, options).await?;

    let mut reader = reader.take(size);
    let mut consumed = 0u64;

    let pending = reconcile(&mut session, &recorded, &plan, &mut reader, &mut consumed).await?;
    let reused = session.parts.len();

    let uploaded = upload_remaining(
        client,
        &mut session,
        &plan,
        &mut reader,
        &mut consumed,
        pending,
        options.concurrency,
    )
    .await?;

    if consumed != size {
        warn!(
            bucket = %bucket,
            key = %key,
            upload_id = %session.upload_id,
            expected = size,
            actual = consumed,
            "source ended early, aborting upload"
        );
        if let Err(e) = client
            .abort_multipart_upload(bucket, key, &session.upload_id)
            .await
        {
            warn!(upload_id = %session.upload_id, error = %e, "abort after size mismatch failed");
        }
        return Err(S3Error::SizeMismatch {
            expected: size,
            actual: consumed,
        });
    }

    verify_sequence(&session.parts)?;

    let manifest = session.manifest();
    let completed = client
        .complete_multipart_upload(bucket, key, &session.upload_id, &manifest)
        .await
        .map_err(|e| match e {
            S3Error::Response(resp) if resp.kind == ErrorKind::MethodNotAllowed => {
                S3Error::Response(resp.rekind(ErrorKind::ObjectAlreadyExists))
            }
            other => other,
        })
        .with_context(|| format!("completing upload {} of {}/{}", session.upload_id, bucket, key))?;

    info!(
        bucket = %bucket,
        key = %key,
        upload_id = %session.upload_id,
        parts = manifest.len(),
        reused,
        uploaded,
        "multipart upload completed"
    );

    Ok(ObjectWriteResponse {
        bucket: bucket.to_string(),
        key: key.to_string(),
        etag: completed.etag,
        upload_id: Some(session.upload_id),
        part_count: manifest.len() as u32,
    })
}

/// Most recently initiated incomplete upload for exactly `key`
async fn find_session(client: &S3Client, bucket: &str, key: &str) -> Result<Option<Upload>> {
    let mut cursor = client.list_incomplete_uploads(bucket, Some(key));
    let mut latest: Option<Upload> = None;
    while let Some(upload) = cursor.next().await {
        let upload = upload?;
        if upload.key != key {
            continue;
        }
        let newer = match latest {
            Some(ref current) => upload.initiated >= current.initiated,
            None => true,
        };
        if newer {
            latest = Some(upload);
        }
    }
    Ok(latest)
}

/// Reuse or create a session. Returns it with the parts the server already has.
async fn open_session(
    client: &S3Client,
    bucket: &str,
    key: &str,
    size: u64,
    options: &UploadOptions,
) -> Result<(UploadSession, Vec<Part>)> {
    let existing = find_session(client, bucket, key)
        .await
        .context("looking up incomplete uploads")?;

    match existing {
        Some(upload) => {
            let mut parts = client
                .list_parts(bucket, key, &upload.upload_id)
                .collect_all()
                .await
                .with_context(|| format!("listing parts of upload {}", upload.upload_id))?;
            parts.sort_by_key(|p| p.part_number);
            info!(
                bucket = %bucket,
                key = %key,
                upload_id = %upload.upload_id,
                recorded_parts = parts.len(),
                "resuming multipart upload"
            );
            let session =
                UploadSession::new(bucket, key, &options.content_type, size, upload.upload_id);
            Ok((session, parts))
        }
        None => {
            let created = client
                .create_multipart_upload(bucket, key, &options.content_type)
                .await
                .context("initiating multipart upload")?;
            info!(
                bucket = %bucket,
                key = %key,
                upload_id = %created.upload_id,
                "multipart upload initiated"
            );
            let session =
                UploadSession::new(bucket, key, &options.content_type, size, created.upload_id);
            Ok((session, Vec::new()))
        }
    }
}

/// Walk the recorded parts in order and keep those whose ETag matches the
/// source bytes. Stops at the first gap, ineligible part or mismatch.
///
/// Returns the bytes read for a mismatching part; they must be uploaded as
/// the next part number.
async fn reconcile<R>(
    session: &mut UploadSession,
    recorded: &[Part],
    plan: &PartPlan,
    reader: &mut R,
    consumed: &mut u64,
) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin + Send,
{
    for part in recorded {
        if part.part_number != session.next_part_number() {
            debug!(part_number = part.part_number, "gap in recorded parts");
            break;
        }

        let remaining = plan.total - *consumed;
        let full_part = part.size == plan.part_size && part.size <= remaining;
        let final_part = part.size == remaining && part.size <= plan.part_size;
        if part.size == 0 || !(full_part || final_part) {
            debug!(
                part_number = part.part_number,
                size = part.size,
                "recorded part does not fit the plan"
            );
            break;
        }

        let chunk = read_chunk(reader, part.size)
            .await
            .with_context(|| format!("reading source for part {}", part.part_number))?;
        *consumed += chunk.len() as u64;
        if (chunk.len() as u64) < part.size {
            // source ended early; the caller's size check reports it
            return Ok(None);
        }

        if etag_matches(&part.etag, &md5_hex(&chunk)) {
            debug!(part_number = part.part_number, "recorded part matches source");
            session.parts.push(part.clone());
            continue;
        }

        debug!(part_number = part.part_number, "recorded part differs from source");
        return Ok(Some(chunk));
    }
    Ok(None)
}

/// Upload everything left in `reader`, at most `concurrency` parts at a time.
///
/// Reading stays sequential; each in-flight upload owns its chunk. All
/// in-flight uploads are awaited before returning, and the first failure is
/// returned. Returns the number of parts uploaded.
async fn upload_remaining<R>(
    client: &S3Client,
    session: &mut UploadSession,
    plan: &PartPlan,
    reader: &mut R,
    consumed: &mut u64,
    mut pending: Option<Bytes>,
    concurrency: usize,
) -> Result<usize>
where
    R: AsyncRead + Unpin + Send,
{
    let concurrency = concurrency.max(1);
    let bucket = session.bucket.as_str();
    let key = session.key.as_str();
    let upload_id = session.upload_id.as_str();

    let mut next_part_number = session.next_part_number();
    let mut in_flight = FuturesUnordered::new();
    let mut uploaded: Vec<Part> = Vec::new();
    let mut first_error: Option<S3Error> = None;
    let mut eof = false;

    loop {
        while !eof && first_error.is_none() && in_flight.len() < concurrency {
            let chunk = match pending.take() {
                Some(chunk) => chunk,
                None => match read_chunk(reader, plan.part_size).await {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        first_error = Some(e.context(format!(
                            "reading source for part {}",
                            next_part_number
                        )));
                        break;
                    }
                },
            };
            if chunk.is_empty() {
                eof = true;
                break;
            }
            let len = chunk.len() as u64;
            *consumed += len;
            if len < plan.part_size && *consumed < plan.total {
                // short read before the declared end, nothing more to send
                eof = true;
                break;
            }
            if next_part_number > MAX_PARTS {
                first_error = Some(S3Error::InvalidArgument(format!(
                    "upload {} would exceed {} parts",
                    upload_id, MAX_PARTS
                )));
                break;
            }

            let part_number = next_part_number;
            next_part_number += 1;

            in_flight.push(async move {
                let size = chunk.len() as u64;
                let etag = client
                    .upload_part(bucket, key, upload_id, part_number, chunk)
                    .await
                    .with_context(|| format!("uploading part {} of upload {}", part_number, upload_id))?;
                debug!(part_number, size, "part uploaded");
                Ok::<Part, S3Error>(Part {
                    part_number,
                    etag,
                    size,
                    last_modified: None,
                })
            });
        }

        match in_flight.next().await {
            Some(Ok(part)) => uploaded.push(part),
            Some(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            None => break,
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    uploaded.sort_by_key(|p| p.part_number);
    let count = uploaded.len();
    session.parts.extend(uploaded);
    Ok(count)
}

/// Abort every incomplete upload in `bucket`, optionally only under `prefix`.
///
/// Returns the number of sessions aborted.
pub async fn remove_incomplete_uploads(
    client: &S3Client,
    bucket: &str,
    prefix: Option<&str>,
) -> Result<usize> {
    let mut cursor = client.list_incomplete_uploads(bucket, prefix);
    let mut removed = 0;
    while let Some(upload) = cursor.next().await {
        let upload = upload?;
        client
            .abort_multipart_upload(bucket, &upload.key, &upload.upload_id)
            .await
            .with_context(|| format!("aborting upload {} of {}", upload.upload_id, upload.key))?;
        debug!(key = %upload.key, upload_id = %upload.upload_id, "incomplete upload aborted");
        removed += 1;
    }
    info!(bucket = %bucket, removed, "incomplete uploads removed");
    Ok(removed)
}
