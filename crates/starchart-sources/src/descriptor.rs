//! The normalized record identifying one fetchable image.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The size tag the upstream service uses for its mid-sized rendition.
///
/// Normalization prefers this variant when it is present.
pub const REGULAR_SIZE_TAG: &str = "regular";

/// One raw size variant of an image as returned by the upstream listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceUrl {
    /// Location of this rendition.
    pub url: String,
    /// The upstream size tag, e.g. `"regular"` or `"original"`.
    pub size_tag: String,
}

/// A normalized record identifying one fetchable image and its metadata.
///
/// Descriptors are produced by normalizing upstream listing records (see
/// [`ListingRecord::into_descriptor`](crate::ListingRecord::into_descriptor))
/// or synthesized from generated placeholders. In either case
/// [`picture_url`](Self::picture_url) is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    /// Canonical URL of the image.
    pub picture_url: String,
    /// Raw size variants as returned upstream, zero or more.
    #[serde(default)]
    pub source_urls: Vec<SourceUrl>,
    /// Upstream creation time. Display only.
    pub created_at: DateTime<Utc>,
}

impl ImageDescriptor {
    /// Creates a descriptor with no size variants.
    pub fn new(picture_url: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            picture_url: picture_url.into(),
            source_urls: Vec::new(),
            created_at,
        }
    }
}
