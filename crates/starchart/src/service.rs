use std::sync::Arc;

use anyhow::{Context, Result};

use starchart_service::caching::ImageCache;
use starchart_service::config::Config;
use starchart_service::upstream::UpstreamClient;

/// Shared state behind the HTTP endpoints.
///
/// Created once at startup; the cache instance inside is the single one
/// for the whole process.
#[derive(Clone, Debug)]
pub struct RequestService {
    inner: Arc<RequestServiceInner>,
}

#[derive(Debug)]
struct RequestServiceInner {
    config: Config,
    cache: ImageCache<UpstreamClient>,
    proxy_client: reqwest::Client,
}

impl RequestService {
    /// Creates the service state from the loaded config.
    pub fn create(config: Config) -> Result<Self> {
        let client = UpstreamClient::new(config.upstream.clone());
        let cache = ImageCache::new(
            config.cache.clone(),
            config.upstream.max_batch_size,
            client,
        );
        let proxy_client = reqwest::Client::builder()
            .connect_timeout(config.upstream.connect_timeout)
            .build()
            .context("failed to create proxy HTTP client")?;

        Ok(Self {
            inner: Arc::new(RequestServiceInner {
                config,
                cache,
                proxy_client,
            }),
        })
    }

    /// The loaded configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The process-wide image cache.
    pub fn cache(&self) -> &ImageCache<UpstreamClient> {
        &self.inner.cache
    }

    /// The client used for outbound relay and image proxy requests.
    pub fn proxy_client(&self) -> &reqwest::Client {
        &self.inner.proxy_client
    }
}
