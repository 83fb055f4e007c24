//! Wire schema for the upstream listing API.
//!
//! The upstream contract is only loosely documented, so every field here
//! is optional or defaulted and normalization tolerates missing data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::{ImageDescriptor, REGULAR_SIZE_TAG, SourceUrl};

/// Request body for the upstream listing endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRequest {
    /// How many records to return. The upstream caps this at its own
    /// maximum, so clients always request that cap.
    pub num: usize,
    /// The upstream's content rating filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r18_type: Option<u8>,
    /// Size tags the response should include renditions for.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub size_list: Vec<String>,
    /// Only return records created after this instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_after: Option<i64>,
    /// Only return records created before this instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_before: Option<i64>,
}

/// Response envelope of the upstream listing endpoint.
///
/// A well-formed response with `success: false` is the upstream's soft
/// failure signal: the listing call itself was proxied and failed. The
/// optional `fallback` flag accompanies it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingResponse {
    /// Whether the upstream considers the call successful.
    #[serde(default)]
    pub success: bool,
    /// Human-readable diagnostic accompanying soft failures.
    #[serde(default)]
    pub message: Option<String>,
    /// Set by the upstream when it wants callers to use local fallbacks.
    #[serde(default)]
    pub fallback: bool,
    /// The listed records, absent on soft failures.
    #[serde(default)]
    pub data: Option<Vec<ListingRecord>>,
}

/// One record of the upstream listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRecord {
    /// Size variants of this image.
    #[serde(default)]
    pub urls_list: Vec<UrlVariant>,
    /// Creation time, as epoch milliseconds or an RFC 3339 string.
    #[serde(default)]
    pub x_create_date: Option<CreateDate>,
}

/// One size variant inside a [`ListingRecord`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlVariant {
    /// Location of this rendition.
    #[serde(default)]
    pub url: Option<String>,
    /// The upstream size tag for this rendition.
    #[serde(default)]
    pub url_size: Option<String>,
}

/// Creation timestamp in either of the shapes the upstream has been
/// observed to produce.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CreateDate {
    /// Epoch milliseconds.
    Millis(i64),
    /// An RFC 3339 / ISO 8601 timestamp.
    Text(String),
}

impl CreateDate {
    /// Resolves the timestamp, if it parses.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            CreateDate::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            CreateDate::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

impl ListingRecord {
    /// Normalizes this record into an [`ImageDescriptor`].
    ///
    /// The `"regular"` variant is preferred, then the first variant that
    /// carries a URL. A record with no usable variant gets the URL
    /// produced by `placeholder` so the descriptor never ends up without
    /// one. An unparseable or missing creation date resolves to `now`.
    pub fn into_descriptor(self, now: DateTime<Utc>, placeholder: impl FnOnce() -> String) -> ImageDescriptor {
        let source_urls: Vec<SourceUrl> = self
            .urls_list
            .into_iter()
            .filter_map(|variant| {
                let url = variant.url.filter(|url| !url.is_empty())?;
                Some(SourceUrl {
                    url,
                    size_tag: variant.url_size.unwrap_or_default(),
                })
            })
            .collect();

        let picture_url = source_urls
            .iter()
            .find(|variant| variant.size_tag == REGULAR_SIZE_TAG)
            .or_else(|| source_urls.first())
            .map(|variant| variant.url.clone())
            .unwrap_or_else(|| {
                tracing::debug!("listing record has no usable variant, substituting placeholder");
                placeholder()
            });

        let created_at = self
            .x_create_date
            .as_ref()
            .and_then(CreateDate::to_utc)
            .unwrap_or(now);

        ImageDescriptor {
            picture_url,
            source_urls,
            created_at,
        }
    }
}
