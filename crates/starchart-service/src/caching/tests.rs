use std::collections::{HashSet, VecDeque};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time;

use super::*;
use crate::test;
use crate::upstream::{FetchError, fallback_descriptor};

fn descriptor(name: &str) -> ImageDescriptor {
    ImageDescriptor::new(format!("https://i.pixiv.re/img/{name}.jpg"), Utc::now())
}

fn batch(names: &[&str]) -> FetchedBatch {
    FetchedBatch {
        descriptors: names.iter().map(|name| descriptor(name)).collect(),
        degraded: None,
    }
}

fn config(max_size: usize, ttl: Duration) -> CacheConfig {
    CacheConfig { max_size, ttl }
}

/// Serves scripted batches in order and counts how often it is asked.
/// Once the script runs out it serves empty batches.
struct ScriptedClient {
    calls: AtomicUsize,
    batches: StdMutex<VecDeque<FetchedBatch>>,
    delay: Duration,
}

impl ScriptedClient {
    fn new(batches: Vec<FetchedBatch>) -> Self {
        Self::with_delay(batches, Duration::ZERO)
    }

    /// A client whose fetches take `delay` to complete, to hold the
    /// refill in flight while other callers arrive.
    fn with_delay(batches: Vec<FetchedBatch>, delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            batches: StdMutex::new(batches.into()),
            delay,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl FetchImages for ScriptedClient {
    fn fetch_batch(&self, _batch_size: usize) -> BoxFuture<'_, FetchedBatch> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let batch = self
            .batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FetchedBatch {
                descriptors: Vec::new(),
                degraded: None,
            });
        let delay = self.delay;

        Box::pin(async move {
            if !delay.is_zero() {
                time::sleep(delay).await;
            }
            batch
        })
    }
}

fn urls(descriptors: &[ImageDescriptor]) -> Vec<&str> {
    descriptors
        .iter()
        .map(|descriptor| descriptor.picture_url.as_str())
        .collect()
}

#[tokio::test]
async fn test_sample_is_bounded_and_distinct() {
    test::setup();

    let client = ScriptedClient::new(vec![batch(&[
        "a", "b", "c", "d", "e", "f", "g", "h", "i", "j",
    ])]);
    let cache = ImageCache::new(config(100, Duration::from_secs(300)), 10, client);

    assert!(cache.get_images(0).await.is_empty());

    let sampled = cache.get_images(4).await;
    assert_eq!(sampled.len(), 4);
    let distinct: HashSet<_> = urls(&sampled).into_iter().collect();
    assert_eq!(distinct.len(), 4);

    // asking for more than is cached returns everything available
    let sampled = cache.get_images(64).await;
    assert_eq!(sampled.len(), 10);
}

#[tokio::test]
async fn test_size_bound_and_oldest_first_eviction() {
    test::setup();

    let client = ScriptedClient::new(vec![
        batch(&["a", "b"]),
        batch(&["c", "d"]),
        batch(&["e", "f"]),
    ]);
    let cache = ImageCache::new(config(3, Duration::from_secs(300)), 2, client);

    cache.prefetch().await;
    cache.prefetch().await;
    cache.prefetch().await;

    let state = cache.state.lock().await;
    assert_eq!(
        urls(&state.entries),
        vec![
            "https://i.pixiv.re/img/d.jpg",
            "https://i.pixiv.re/img/e.jpg",
            "https://i.pixiv.re/img/f.jpg",
        ]
    );
}

#[tokio::test]
async fn test_dedup_across_refills() {
    test::setup();

    let client = ScriptedClient::new(vec![batch(&["a", "b"]), batch(&["b", "c"])]);
    let cache = ImageCache::new(config(100, Duration::from_secs(300)), 2, client);

    cache.prefetch().await;
    cache.prefetch().await;

    let state = cache.state.lock().await;
    assert_eq!(
        urls(&state.entries),
        vec![
            "https://i.pixiv.re/img/a.jpg",
            "https://i.pixiv.re/img/b.jpg",
            "https://i.pixiv.re/img/c.jpg",
        ]
    );
}

#[tokio::test]
async fn test_all_duplicate_batch_leaves_refill_time_untouched() {
    test::setup();
    time::pause();

    let client = ScriptedClient::new(vec![batch(&["a"]), batch(&["a"])]);
    let cache = ImageCache::new(config(100, Duration::from_secs(300)), 1, client);

    cache.prefetch().await;
    let first_refill = cache.state.lock().await.last_refill;
    assert!(first_refill.is_some());

    time::advance(Duration::from_secs(10)).await;
    cache.prefetch().await;

    let state = cache.state.lock().await;
    assert_eq!(state.last_refill, first_refill);
    assert_eq!(urls(&state.entries), vec!["https://i.pixiv.re/img/a.jpg"]);
}

#[tokio::test]
async fn test_stale_cache_is_fully_invalidated() {
    test::setup();
    time::pause();

    let client = ScriptedClient::new(vec![batch(&["a", "b"]), batch(&["c", "d"])]);
    let cache = ImageCache::new(config(100, Duration::from_secs(60)), 2, client);

    let first: HashSet<_> = cache
        .get_images(2)
        .await
        .into_iter()
        .map(|descriptor| descriptor.picture_url)
        .collect();
    assert_eq!(cache.client.calls(), 1);
    assert!(first.contains("https://i.pixiv.re/img/a.jpg"));

    time::advance(Duration::from_secs(61)).await;

    let second: HashSet<_> = cache
        .get_images(2)
        .await
        .into_iter()
        .map(|descriptor| descriptor.picture_url)
        .collect();
    assert_eq!(cache.client.calls(), 2);
    assert!(second.contains("https://i.pixiv.re/img/c.jpg"));
    assert!(!second.contains("https://i.pixiv.re/img/a.jpg"));

    let state = cache.state.lock().await;
    assert_eq!(state.entries.len(), 2);
}

#[tokio::test]
async fn test_stale_cache_with_empty_refill_starts_from_zero() {
    test::setup();
    time::pause();

    let client = ScriptedClient::new(vec![batch(&["a"])]);
    let cache = ImageCache::new(config(100, Duration::from_secs(60)), 1, client);

    assert_eq!(cache.get_images(1).await.len(), 1);

    time::advance(Duration::from_secs(61)).await;

    // the script is exhausted, so the refill adds nothing
    assert!(cache.get_images(1).await.is_empty());
    assert!(cache.state.lock().await.entries.is_empty());
}

#[tokio::test]
async fn test_shortfall_issues_a_single_coalesced_refill() {
    test::setup();
    time::pause();

    let client = ScriptedClient::with_delay(vec![batch(&["a", "b"])], Duration::from_millis(50));
    let cache = ImageCache::new(config(100, Duration::from_secs(300)), 2, client);

    // a shortfall of 5 with batch size 2 asks for 3 refills, which all
    // coalesce onto one upstream call
    let sampled = cache.get_images(5).await;
    assert_eq!(cache.client.calls(), 1);
    assert_eq!(sampled.len(), 2);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refill() {
    test::setup();
    time::pause();

    let client = ScriptedClient::with_delay(vec![batch(&["a", "b"])], Duration::from_millis(50));
    let cache = ImageCache::new(config(100, Duration::from_secs(300)), 2, client);

    let (first, second) = futures::join!(cache.get_images(2), cache.get_images(2));

    // the first caller initiated the refill and awaited it, the second
    // proceeded with the (empty) state available at the time
    assert_eq!(cache.client.calls(), 1);
    assert_eq!(first.len(), 2);
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_refill_guard_is_released() {
    test::setup();

    let client = ScriptedClient::new(vec![batch(&["a"]), batch(&["b"])]);
    let cache = ImageCache::new(config(100, Duration::from_secs(300)), 1, client);

    cache.prefetch().await;
    assert!(!cache.refill_in_flight.load(Ordering::SeqCst));

    cache.prefetch().await;
    assert_eq!(cache.client.calls(), 2);
    assert_eq!(cache.state.lock().await.entries.len(), 2);
}

#[tokio::test]
async fn test_degraded_batches_are_cached() {
    test::setup();

    let now = Utc::now();
    let client = ScriptedClient::new(vec![FetchedBatch {
        descriptors: vec![fallback_descriptor(now), fallback_descriptor(now)],
        degraded: Some(FetchError::RateLimited),
    }]);
    let cache = ImageCache::new(config(100, Duration::from_secs(300)), 2, client);

    cache.prefetch().await;

    let state = cache.state.lock().await;
    assert_eq!(state.entries.len(), 2);
    assert!(state.last_refill.is_some());
    for entry in &state.entries {
        assert!(entry.picture_url.starts_with("data:image/svg+xml"));
    }
}
