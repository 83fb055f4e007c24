use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use starchart_service::metric;
use starchart_sources::{ImageDescriptor, resolve_proxy_url};

use crate::service::RequestService;

#[derive(Debug, Deserialize)]
pub struct SampleQuery {
    count: Option<usize>,
}

/// Serves a random sample of cached image descriptors.
///
/// Each descriptor's canonical URL is rewritten onto the same-origin
/// proxy endpoints so the page can load it without tripping over
/// cross-origin restrictions. Callers may receive fewer descriptors than
/// requested; upstream trouble shows up as placeholder graphics, never as
/// an error response.
pub async fn sample_images(
    State(service): State<RequestService>,
    Query(query): Query<SampleQuery>,
) -> Json<Vec<ImageDescriptor>> {
    let config = service.config();
    let count = query
        .count
        .unwrap_or(config.default_sample_count)
        .min(config.max_sample_count);

    let mut descriptors = service.cache().get_images(count).await;
    for descriptor in &mut descriptors {
        descriptor.picture_url = resolve_proxy_url(&descriptor.picture_url).into_owned();
    }

    metric!(counter("images.sampled") += descriptors.len() as i64);
    Json(descriptors)
}
