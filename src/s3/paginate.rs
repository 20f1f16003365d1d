//! Lazy listing over paginated S3 responses
//!
//! A [`ListCursor`] pulls items out of a [`PageSource`] one page at a time.
//! A fetch only happens when the buffer is empty and the listing is not yet
//! complete. A failed fetch is handed out as the last element and ends the
//! listing; the cursor never retries on its own.

use crate::s3::client::S3Client;
use crate::s3::error::{Result, S3Error};
use crate::s3::types::{ListEntry, Part, Upload};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::VecDeque;
use tracing::debug;

/// Protocol maximum for max-keys / max-uploads / max-parts
pub const MAX_PAGE_SIZE: u32 = 1000;

/// One page of a listing
#[derive(Debug, Clone)]
pub struct ListPage<T, M> {
    pub items: Vec<T>,
    pub is_truncated: bool,
    /// Where the next page starts. Must be present when `is_truncated`.
    pub next_marker: Option<M>,
}

/// A "fetch the page after this marker" operation
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;
    type Marker: Clone + Default + PartialEq + Send + Sync + std::fmt::Debug;

    async fn fetch_page(&self, marker: &Self::Marker) -> Result<ListPage<Self::Item, Self::Marker>>;
}

/// Pull-based lazy sequence over a [`PageSource`]
pub struct ListCursor<S: PageSource> {
    source: S,
    marker: S::Marker,
    buffer: VecDeque<S::Item>,
    complete: bool,
    fetch_count: usize,
}

impl<S: PageSource> ListCursor<S> {
    pub fn new(source: S) -> Self {
        Self::starting_at(source, S::Marker::default())
    }

    /// Resume a listing after `marker`
    pub fn starting_at(source: S, marker: S::Marker) -> Self {
        Self {
            source,
            marker,
            buffer: VecDeque::new(),
            complete: false,
            fetch_count: 0,
        }
    }

    /// True once the server reported the last page (or a fetch failed)
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Pages fetched so far
    pub fn fetch_count(&self) -> usize {
        self.fetch_count
    }

    /// Current continuation marker
    pub fn marker(&self) -> &S::Marker {
        &self.marker
    }

    pub async fn next(&mut self) -> Option<Result<S::Item>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.complete {
                return None;
            }
            if let Err(e) = self.fetch().await {
                self.complete = true;
                return Some(Err(e));
            }
        }
    }

    async fn fetch(&mut self) -> Result<()> {
        let page = self.source.fetch_page(&self.marker).await?;
        self.fetch_count += 1;

        if page.is_truncated {
            match page.next_marker {
                Some(next) if next != self.marker => self.marker = next,
                Some(next) => {
                    return Err(S3Error::InvalidResponse(format!(
                        "listing marker did not advance past {:?}",
                        next
                    )))
                }
                None => {
                    return Err(S3Error::InvalidResponse(
                        "truncated listing without a continuation marker".to_string(),
                    ))
                }
            }
        } else {
            self.complete = true;
        }

        debug!(
            fetch = self.fetch_count,
            items = page.items.len(),
            truncated = page.is_truncated,
            "list page fetched"
        );
        self.buffer.extend(page.items);
        Ok(())
    }

    /// Drain the cursor, stopping at the first error
    pub async fn collect_all(mut self) -> Result<Vec<S::Item>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

impl<S: PageSource + 'static> ListCursor<S> {
    pub fn into_stream(self) -> BoxStream<'static, Result<S::Item>> {
        futures::stream::unfold(self, |mut cursor| async move {
            cursor.next().await.map(|item| (item, cursor))
        })
        .boxed()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// ListObjects (v1) over one bucket
#[derive(Clone)]
pub struct ObjectSource {
    client: S3Client,
    bucket: String,
    prefix: Option<String>,
    delimiter: Option<String>,
    max_keys: u32,
}

impl ObjectSource {
    pub fn new(client: S3Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: None,
            delimiter: None,
            max_keys: MAX_PAGE_SIZE,
        }
    }

    pub fn with_prefix(mut self, prefix: Option<&str>) -> Self {
        self.prefix = prefix.map(str::to_string);
        self
    }

    /// Roll keys up into common prefixes at `delimiter` (usually `/`)
    pub fn with_delimiter(mut self, delimiter: Option<&str>) -> Self {
        self.delimiter = delimiter.map(str::to_string);
        self
    }

    pub fn with_max_keys(mut self, max_keys: u32) -> Self {
        self.max_keys = max_keys.clamp(1, MAX_PAGE_SIZE);
        self
    }
}

#[async_trait]
impl PageSource for ObjectSource {
    type Item = ListEntry;
    /// `marker`: listing starts after this key
    type Marker = Option<String>;

    async fn fetch_page(&self, marker: &Option<String>) -> Result<ListPage<ListEntry, Option<String>>> {
        let result = self
            .client
            .list_objects_page(
                &self.bucket,
                self.prefix.as_deref(),
                self.delimiter.as_deref(),
                marker.as_deref(),
                self.max_keys,
            )
            .await?;

        // NextMarker is only sent with a delimiter; otherwise continue after
        // the greatest name on this page
        let last_key = result.contents.last().map(|o| o.key.clone());
        let last_prefix = result.common_prefixes.last().cloned();
        let next_marker = non_empty(result.next_marker)
            .or_else(|| non_empty(std::cmp::max(last_key, last_prefix)));

        let mut items: Vec<ListEntry> = result
            .contents
            .into_iter()
            .map(ListEntry::Object)
            .chain(result.common_prefixes.into_iter().map(ListEntry::CommonPrefix))
            .collect();
        items.sort_by(|a, b| a.key().cmp(b.key()));

        Ok(ListPage {
            items,
            is_truncated: result.is_truncated,
            next_marker: next_marker.map(Some),
        })
    }
}

/// Position in a ListMultipartUploads listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMarker {
    pub key_marker: Option<String>,
    pub upload_id_marker: Option<String>,
}

/// ListMultipartUploads over one bucket
#[derive(Clone)]
pub struct UploadSource {
    client: S3Client,
    bucket: String,
    prefix: Option<String>,
    max_uploads: u32,
}

impl UploadSource {
    pub fn new(client: S3Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.map(str::to_string),
            max_uploads: MAX_PAGE_SIZE,
        }
    }

    pub fn with_max_uploads(mut self, max_uploads: u32) -> Self {
        self.max_uploads = max_uploads.clamp(1, MAX_PAGE_SIZE);
        self
    }
}

#[async_trait]
impl PageSource for UploadSource {
    type Item = Upload;
    type Marker = UploadMarker;

    async fn fetch_page(&self, marker: &UploadMarker) -> Result<ListPage<Upload, UploadMarker>> {
        let result = self
            .client
            .list_uploads_page(
                &self.bucket,
                self.prefix.as_deref(),
                marker.key_marker.as_deref(),
                marker.upload_id_marker.as_deref(),
                self.max_uploads,
            )
            .await?;

        let next_marker = non_empty(result.next_key_marker).map(|key| UploadMarker {
            key_marker: Some(key),
            upload_id_marker: non_empty(result.next_upload_id_marker),
        });

        Ok(ListPage {
            items: result.uploads,
            is_truncated: result.is_truncated,
            next_marker,
        })
    }
}

/// ListParts of one upload session
#[derive(Clone)]
pub struct PartSource {
    client: S3Client,
    bucket: String,
    key: String,
    upload_id: String,
    max_parts: u32,
}

impl PartSource {
    pub fn new(client: S3Client, bucket: &str, key: &str, upload_id: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            max_parts: MAX_PAGE_SIZE,
        }
    }

    pub fn with_max_parts(mut self, max_parts: u32) -> Self {
        self.max_parts = max_parts.clamp(1, MAX_PAGE_SIZE);
        self
    }
}

#[async_trait]
impl PageSource for PartSource {
    type Item = Part;
    /// `part-number-marker`: listing starts after this part number, 0 = start
    type Marker = u32;

    async fn fetch_page(&self, marker: &u32) -> Result<ListPage<Part, u32>> {
        let result = self
            .client
            .list_parts_page(
                &self.bucket,
                &self.key,
                &self.upload_id,
                *marker,
                self.max_parts,
            )
            .await?;

        let next_marker = result
            .next_part_number_marker
            .filter(|n| *n > 0)
            .or_else(|| result.parts.last().map(|p| p.part_number));

        Ok(ListPage {
            items: result.parts,
            is_truncated: result.is_truncated,
            next_marker,
        })
    }
}
