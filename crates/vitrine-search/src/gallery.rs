//! Turning ranked matches into displayable gallery items.
//!
//! Each match's id is an `s3://` image location. The gallery presigns it,
//! fetches the bytes, and sniffs the image format, one item at a time in
//! display order. A failure on one item is recorded on that item only.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use crate::catalog::Match;
use crate::error::{Result, SearchError};
use crate::fetch::SharedFetcher;
use crate::presign::{DEFAULT_EXPIRATION, SharedResolver};

/// Human-readable caption for an item id: the last path segment, cut at its
/// first `.`.
///
/// `s3://casa/bottles/blue.bottle.png` becomes `blue`.
pub fn caption_for(id: &str) -> &str {
    let name = id.rsplit('/').next().unwrap_or(id);
    name.split('.').next().unwrap_or(name)
}

/// Decoded image payload ready for embedding in a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GalleryImage {
    /// MIME type detected from the bytes.
    pub mime: &'static str,
    /// Base64-encoded image bytes.
    pub data: String,
}

impl GalleryImage {
    /// `data:` URI for an `<img src>`.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }
}

/// One cell of the result grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GalleryItem {
    /// 1-based display position.
    pub rank: usize,
    /// Row index in the table.
    pub index: usize,
    /// Item id.
    pub id: String,
    /// Caption derived from the id.
    pub caption: String,
    /// Similarity score.
    pub score: f32,
    /// The image, when it could be fetched and recognised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<GalleryImage>,
    /// Why the image is missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fetches result images through presigned URLs.
#[derive(Clone)]
pub struct Gallery {
    resolver: SharedResolver,
    fetcher: SharedFetcher,
    expiration: Duration,
}

impl Gallery {
    /// Create a gallery with the default URL lifetime.
    pub fn new(resolver: SharedResolver, fetcher: SharedFetcher) -> Self {
        Self {
            resolver,
            fetcher,
            expiration: DEFAULT_EXPIRATION,
        }
    }

    /// Set the lifetime of presigned image URLs.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Presign a fresh fetch URL for an item id.
    pub fn link(&self, id: &str) -> Result<String> {
        self.resolver.resolve(id, self.expiration)
    }

    /// Fetch and recognise the image stored at `id`.
    pub async fn image(&self, id: &str) -> Result<GalleryImage> {
        let url = self.link(id)?;
        let bytes = self.fetcher.fetch(&url).await?;
        let format = image::guess_format(&bytes)
            .map_err(|e| SearchError::Parse(format!("unrecognised image data: {e}")))?;

        Ok(GalleryImage {
            mime: format.to_mime_type(),
            data: STANDARD.encode(&bytes),
        })
    }

    /// Build gallery items for `matches`, sequentially in display order.
    pub async fn render(&self, matches: &[Match]) -> Vec<GalleryItem> {
        let mut items = Vec::with_capacity(matches.len());

        for (position, m) in matches.iter().enumerate() {
            let (image, error) = match self.image(&m.id).await {
                Ok(image) => (Some(image), None),
                Err(e) => {
                    tracing::warn!(id = %m.id, error = %e, "Failed to load result image");
                    (None, Some(e.to_string()))
                }
            };

            items.push(GalleryItem {
                rank: position + 1,
                index: m.index,
                id: m.id.clone(),
                caption: caption_for(&m.id).to_string(),
                score: m.score,
                image,
                error,
            });
        }

        items
    }
}
