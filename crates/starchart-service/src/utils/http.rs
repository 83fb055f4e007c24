//! HTTP client construction.

use reqwest::header;

use crate::config::UpstreamConfig;

/// Creates the reqwest [`Client`](reqwest::Client) used for upstream
/// listing calls.
pub fn create_client(config: &UpstreamConfig, user_agent: &str) -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .connect_timeout(config.connect_timeout)
        .default_headers({
            let mut headers = header::HeaderMap::new();
            if let Ok(value) = header::HeaderValue::from_str(user_agent) {
                headers.insert(header::USER_AGENT, value);
            }
            headers
        })
        .build()
        .unwrap()
}
