//! One function per subcommand

use crate::cli::{format_bytes, parse_s3_path};
use crate::s3::{ListEntry, S3Client, UploadOptions};
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// List buckets (no path) or the objects under `s3/bucket/prefix`
pub async fn cmd_ls(client: &S3Client, path: Option<&str>, recursive: bool) -> Result<()> {
    let Some(path) = path else {
        for bucket in client.list_buckets().await? {
            println!(
                "[{}] {}/",
                bucket.creation_date.as_deref().unwrap_or("-"),
                bucket.name
            );
        }
        return Ok(());
    };

    let (bucket, prefix) = parse_s3_path(path)?;
    let delimiter = if recursive { None } else { Some("/") };
    let mut cursor = client.list_objects(&bucket, prefix.as_deref(), delimiter);

    let mut count = 0usize;
    while let Some(entry) = cursor.next().await {
        match entry.with_context(|| format!("Failed to list s3/{}", bucket))? {
            ListEntry::Object(obj) => println!(
                "[{}] {:>10} {}",
                obj.last_modified.as_deref().unwrap_or("-"),
                format_bytes(obj.size),
                obj.key
            ),
            ListEntry::CommonPrefix(prefix) => println!("{:>36} {}", "PRE", prefix),
        }
        count += 1;
    }

    if count == 0 {
        println!("No objects found");
    }
    info!(entries = count, pages = cursor.fetch_count(), "listing finished");
    Ok(())
}

/// Upload a local file, resuming an earlier interrupted multipart upload
pub async fn cmd_put(
    client: &S3Client,
    source: &Path,
    destination: &str,
    content_type: Option<&str>,
    concurrency: usize,
) -> Result<()> {
    let (bucket, key) = parse_s3_path(destination)?;
    let key = match key {
        Some(key) if key.ends_with('/') => format!("{}{}", key, file_name(source)?),
        Some(key) => key,
        None => file_name(source)?,
    };

    let file = tokio::fs::File::open(source)
        .await
        .with_context(|| format!("Failed to open {}", source.display()))?;
    let size = file.metadata().await?.len();

    let mut options = UploadOptions::default().with_concurrency(concurrency);
    if let Some(content_type) = content_type {
        options = options.with_content_type(content_type);
    }

    let result = client.put_object(&bucket, &key, file, size, &options).await?;

    println!("{} -> s3/{}/{}", source.display(), bucket, key);
    println!("  {} in {} part(s), ETag {}", format_bytes(size), result.part_count, result.etag);
    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("Cannot derive an object name from {}", path.display()))
}

/// Object metadata
pub async fn cmd_stat(client: &S3Client, path: &str) -> Result<()> {
    let (bucket, key) = parse_s3_path(path)?;
    let key = key.ok_or_else(|| anyhow::anyhow!("Object key is required for stat command"))?;

    let stat = client.stat_object(&bucket, &key).await?;

    println!("Object: s3/{}/{}", bucket, stat.key);
    println!("Size: {} ({})", format_bytes(stat.size), stat.size);
    println!("Last Modified: {}", stat.last_modified.as_deref().unwrap_or("Unknown"));
    if let Some(ref etag) = stat.etag {
        println!("ETag: {}", etag);
    }
    if let Some(ref content_type) = stat.content_type {
        println!("Content-Type: {}", content_type);
    }
    Ok(())
}

/// Make bucket command
pub async fn cmd_mb(client: &S3Client, bucket: &str) -> Result<()> {
    let (bucket, _) = parse_s3_path(bucket)?;
    client.make_bucket(&bucket).await?;
    println!("Bucket created: s3/{}", bucket);
    Ok(())
}

/// Remove bucket command
pub async fn cmd_rb(client: &S3Client, bucket: &str) -> Result<()> {
    let (bucket, _) = parse_s3_path(bucket)?;
    if !client.bucket_exists(&bucket).await?.exists() {
        anyhow::bail!("Bucket does not exist: s3/{}", bucket);
    }
    client.remove_bucket(&bucket).await?;
    println!("Bucket removed: s3/{}", bucket);
    Ok(())
}

/// List incomplete multipart uploads
pub async fn cmd_uploads(client: &S3Client, path: &str) -> Result<()> {
    let (bucket, prefix) = parse_s3_path(path)?;
    let mut cursor = client.list_incomplete_uploads(&bucket, prefix.as_deref());

    let mut count = 0usize;
    while let Some(upload) = cursor.next().await {
        let upload = upload?;
        println!(
            "[{}] {} {}",
            upload.initiated.as_deref().unwrap_or("-"),
            upload.upload_id,
            upload.key
        );
        count += 1;
    }
    if count == 0 {
        println!("No incomplete uploads");
    }
    Ok(())
}

/// Abort incomplete multipart uploads under a prefix
pub async fn cmd_rm_uploads(client: &S3Client, path: &str) -> Result<()> {
    let (bucket, prefix) = parse_s3_path(path)?;
    let removed = client
        .remove_incomplete_uploads(&bucket, prefix.as_deref())
        .await?;
    println!("Removed {} incomplete upload(s)", removed);
    Ok(())
}

/// Print a presigned GET URL
pub async fn cmd_presign(client: &S3Client, path: &str, expires: u64) -> Result<()> {
    let (bucket, key) = parse_s3_path(path)?;
    let key = key.ok_or_else(|| anyhow::anyhow!("Object key is required for presign command"))?;
    let url = client
        .presigned_get_object(&bucket, &key, Duration::from_secs(expires))
        .await?;
    println!("{}", url);
    Ok(())
}

/// Write an object's content to stdout
pub async fn cmd_cat(client: &S3Client, path: &str) -> Result<()> {
    use std::io::Write;

    let (bucket, key) = parse_s3_path(path)?;
    let key = key.ok_or_else(|| anyhow::anyhow!("Object key is required for cat command"))?;
    let data = client.get_object(&bucket, &key).await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}

/// Remove one object
pub async fn cmd_rm(client: &S3Client, path: &str) -> Result<()> {
    let (bucket, key) = parse_s3_path(path)?;
    let key = key.ok_or_else(|| anyhow::anyhow!("Object key is required for rm command"))?;
    client.remove_object(&bucket, &key).await?;
    println!("Removed: s3/{}/{}", bucket, key);
    Ok(())
}
