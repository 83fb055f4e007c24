//! The upstream listing client.
//!
//! One client instance talks to one listing endpoint. Calls are
//! self-throttled against a per-instance marker, and every failure mode
//! degrades to a placeholder batch instead of surfacing an error: the
//! gallery must keep drawing something even when the upstream is down.

use chrono::Utc;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use starchart_sources::{ImageDescriptor, ListingRecord, ListingRequest, ListingResponse};

use crate::caching::FetchImages;
use crate::config::UpstreamConfig;
use crate::utils::http::create_client;

mod fallback;

pub use fallback::{FALLBACK_URL_PREFIX, fallback_data_url, fallback_descriptor};

/// The user agent the service identifies itself with upstream.
pub const USER_AGENT: &str = concat!("starchart/", env!("CARGO_PKG_VERSION"));

/// Why a listing call could not produce fresh upstream content.
///
/// These are diagnostics, not errors surfaced to callers: every variant
/// resolves to a placeholder batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The upstream answered HTTP 429.
    #[error("upstream rate limit hit")]
    RateLimited,
    /// The upstream answered another non-success status.
    #[error("unexpected upstream status {0}")]
    Status(u16),
    /// A well-formed response flagged the listing call itself as failed.
    #[error("upstream soft failure: {0}")]
    SoftFailure(String),
    /// The request never completed, like connection loss or DNS trouble.
    #[error("listing request failed: {0}")]
    Transport(String),
    /// The response body was not the expected JSON.
    #[error("malformed listing response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// The tag value used on degradation metrics.
    pub fn metric_key(&self) -> &'static str {
        match self {
            FetchError::RateLimited => "ratelimited",
            FetchError::Status(_) => "status",
            FetchError::SoftFailure(_) => "softfailure",
            FetchError::Transport(_) => "transport",
            FetchError::Malformed(_) => "malformed",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Malformed(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// The outcome of one listing call.
///
/// Always carries usable descriptors; `degraded` records why they are
/// placeholders rather than upstream content, if they are.
#[derive(Debug, Clone)]
pub struct FetchedBatch {
    /// The fetched or synthesized descriptors.
    pub descriptors: Vec<ImageDescriptor>,
    /// Set when the descriptors are placeholders.
    pub degraded: Option<FetchError>,
}

impl FetchedBatch {
    /// Whether this batch consists of placeholders.
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Client for the upstream listing API.
#[derive(Debug)]
pub struct UpstreamClient {
    client: reqwest::Client,
    config: UpstreamConfig,
    /// When the last listing request was issued. Guards the inter-request
    /// floor; held across the wait so concurrent callers line up behind
    /// each other.
    last_request: Mutex<Option<Instant>>,
}

impl UpstreamClient {
    /// Creates a new client for the configured listing endpoint.
    pub fn new(config: UpstreamConfig) -> Self {
        let client = create_client(&config, USER_AGENT);
        Self {
            client,
            config,
            last_request: Mutex::new(None),
        }
    }

    /// Fetches one batch of image descriptors.
    ///
    /// The upstream is always asked for its maximum batch size;
    /// `batch_size` only controls how many placeholders are synthesized
    /// when the call degrades. This never fails: rate limits, soft
    /// failures, transport errors and malformed bodies all yield a
    /// placeholder batch with the reason logged and attached.
    pub async fn fetch_batch(&self, batch_size: usize) -> FetchedBatch {
        match self.request_listing().await {
            Ok(records) => {
                let now = Utc::now();
                let descriptors = records
                    .into_iter()
                    .map(|record| record.into_descriptor(now, fallback_data_url))
                    .collect();
                metric!(counter("upstream.fetch") += 1, "status" => "ok");
                FetchedBatch {
                    descriptors,
                    degraded: None,
                }
            }
            Err(reason) => {
                tracing::warn!(error = %reason, "listing degraded to placeholders");
                metric!(counter("upstream.fetch") += 1, "status" => reason.metric_key());
                let now = Utc::now();
                let descriptors = (0..batch_size).map(|_| fallback_descriptor(now)).collect();
                FetchedBatch {
                    descriptors,
                    degraded: Some(reason),
                }
            }
        }
    }

    /// Suspends until the inter-request floor is satisfied and stamps the
    /// marker for the next caller.
    async fn throttle(&self) {
        let mut last_request = self.last_request.lock().await;
        if let Some(last) = *last_request {
            let floor = last + self.config.min_request_interval;
            if Instant::now() < floor {
                tokio::time::sleep_until(floor).await;
            }
        }
        *last_request = Some(Instant::now());
    }

    async fn request_listing(&self) -> Result<Vec<ListingRecord>, FetchError> {
        self.throttle().await;

        let body = ListingRequest {
            num: self.config.max_batch_size,
            r18_type: self.config.r18_type,
            size_list: self.config.size_list.clone(),
            date_after: None,
            date_before: None,
        };

        tracing::debug!("Fetching image listing from {}", self.config.listing_url);
        let response = self
            .client
            .post(self.config.listing_url.clone())
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(FetchError::RateLimited),
            status if !status.is_success() => return Err(FetchError::Status(status.as_u16())),
            _ => {}
        }

        let listing: ListingResponse = response
            .json()
            .await
            .map_err(|error| FetchError::Malformed(error.to_string()))?;

        if !listing.success {
            let message = listing.message.unwrap_or_else(|| "unspecified".into());
            return Err(FetchError::SoftFailure(message));
        }

        Ok(listing.data.unwrap_or_default())
    }
}

impl FetchImages for UpstreamClient {
    fn fetch_batch(&self, batch_size: usize) -> futures::future::BoxFuture<'_, FetchedBatch> {
        Box::pin(UpstreamClient::fetch_batch(self, batch_size))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use starchart_test::{ListingMock, MockResponse, listing_records, soft_failure};

    use super::*;
    use crate::test;

    fn client_for(mock: &ListingMock) -> UpstreamClient {
        UpstreamClient::new(UpstreamConfig {
            listing_url: mock.url().parse().unwrap(),
            min_request_interval: Duration::ZERO,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_fetch_batch_normalizes_records() {
        test::setup();

        let mock = ListingMock::new(vec![MockResponse::json(listing_records(&[
            "https://i.pixiv.re/img/1.jpg",
            "https://i.pixiv.re/img/2.jpg",
        ]))]);
        let client = client_for(&mock);

        let batch = client.fetch_batch(5).await;
        assert!(!batch.is_degraded());
        assert_eq!(batch.descriptors.len(), 2);
        assert_eq!(batch.descriptors[0].picture_url, "https://i.pixiv.re/img/1.jpg");
        assert_eq!(mock.hits(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_yields_placeholder_batch() {
        test::setup();

        let mock = ListingMock::new(vec![MockResponse::status(429)]);
        let client = client_for(&mock);

        let batch = client.fetch_batch(5).await;
        assert_eq!(batch.degraded, Some(FetchError::RateLimited));
        assert_eq!(batch.descriptors.len(), 5);
        for descriptor in &batch.descriptors {
            assert!(descriptor.picture_url.starts_with(FALLBACK_URL_PREFIX));
        }
    }

    #[tokio::test]
    async fn test_server_error_yields_placeholder_batch() {
        test::setup();

        let mock = ListingMock::new(vec![MockResponse::status(502)]);
        let client = client_for(&mock);

        let batch = client.fetch_batch(3).await;
        assert_eq!(batch.degraded, Some(FetchError::Status(502)));
        assert_eq!(batch.descriptors.len(), 3);
    }

    #[tokio::test]
    async fn test_soft_failure_yields_placeholder_batch() {
        test::setup();

        let mock = ListingMock::new(vec![MockResponse::json(soft_failure(
            "listing call failed: 502 Bad Gateway",
        ))]);
        let client = client_for(&mock);

        let batch = client.fetch_batch(2).await;
        assert_eq!(
            batch.degraded,
            Some(FetchError::SoftFailure(
                "listing call failed: 502 Bad Gateway".into()
            ))
        );
        assert_eq!(batch.descriptors.len(), 2);
    }

    #[tokio::test]
    async fn test_garbage_body_yields_placeholder_batch() {
        test::setup();

        let mock = ListingMock::new(vec![MockResponse::garbage()]);
        let client = client_for(&mock);

        let batch = client.fetch_batch(4).await;
        assert!(matches!(batch.degraded, Some(FetchError::Malformed(_))));
        assert_eq!(batch.descriptors.len(), 4);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_yields_placeholder_batch() {
        test::setup();

        // bind-then-drop guarantees nothing is listening on the port
        let url = {
            let mock = ListingMock::new(vec![MockResponse::status(200)]);
            mock.url()
        };
        let client = UpstreamClient::new(UpstreamConfig {
            listing_url: url.parse().unwrap(),
            min_request_interval: Duration::ZERO,
            ..Default::default()
        });

        let batch = client.fetch_batch(2).await;
        assert!(matches!(batch.degraded, Some(FetchError::Transport(_))));
        assert_eq!(batch.descriptors.len(), 2);
    }

    #[tokio::test]
    async fn test_requests_respect_the_floor() {
        test::setup();

        let mock = ListingMock::new(vec![MockResponse::json(listing_records(&[
            "https://i.pixiv.re/img/1.jpg",
        ]))]);
        let client = UpstreamClient::new(UpstreamConfig {
            listing_url: mock.url().parse().unwrap(),
            min_request_interval: Duration::from_millis(250),
            ..Default::default()
        });

        let started = std::time::Instant::now();
        client.fetch_batch(1).await;
        client.fetch_batch(1).await;

        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(mock.hits(), 2);
    }
}
