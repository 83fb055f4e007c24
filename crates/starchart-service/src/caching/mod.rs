//! The bounded deduplicating image cache.
//!
//! One cache instance holds the descriptors the gallery draws from. It is
//! capacity-bounded with oldest-first eviction, deduplicates on the
//! canonical URL, and treats the whole collection as expired once the
//! configured TTL has passed since the last refill. Refills are coalesced
//! behind a single in-flight guard, so concurrent readers never pile up
//! requests against the upstream.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::{BoxFuture, join_all};
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tokio::time::Instant;

use starchart_sources::ImageDescriptor;

use crate::config::CacheConfig;
use crate::upstream::FetchedBatch;
use crate::utils::futures::CallOnDrop;

#[cfg(test)]
mod tests;

/// A source of descriptor batches for the cache to refill from.
///
/// Implementations degrade instead of failing; see
/// [`UpstreamClient`](crate::upstream::UpstreamClient) for the real one.
pub trait FetchImages: Send + Sync + 'static {
    /// Fetches one batch of descriptors.
    fn fetch_batch(&self, batch_size: usize) -> BoxFuture<'_, FetchedBatch>;
}

/// Mutable cache state, everything behind one lock.
#[derive(Debug, Default)]
struct CacheState {
    /// Cached descriptors in insertion order. No two entries share a
    /// `picture_url`.
    entries: Vec<ImageDescriptor>,
    /// When the last refill appended entries. `None` means never, or
    /// invalidated.
    last_refill: Option<Instant>,
}

/// Capacity-bounded, time-expiring collection of image descriptors.
///
/// Constructed once at startup and shared by reference; consumers call
/// [`get_images`](Self::get_images) and tolerate receiving fewer
/// descriptors than they asked for.
pub struct ImageCache<C> {
    config: CacheConfig,
    /// Upstream batch size, used to size the refill for a shortfall.
    batch_size: usize,
    client: C,
    state: Mutex<CacheState>,
    /// Guards against overlapping refills. A prefetch that finds the flag
    /// set is a no-op.
    refill_in_flight: AtomicBool,
}

impl<C> fmt::Debug for ImageCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .state
            .try_lock()
            .map(|state| state.entries.len())
            .unwrap_or_default();
        f.debug_struct("ImageCache")
            .field("config", &self.config)
            .field("entries", &entries)
            .field("refill_in_flight", &self.refill_in_flight)
            .finish()
    }
}

impl<C: FetchImages> ImageCache<C> {
    /// Creates an empty cache refilling from `client`.
    pub fn new(config: CacheConfig, batch_size: usize, client: C) -> Self {
        Self {
            config,
            batch_size: batch_size.max(1),
            client,
            state: Mutex::new(CacheState::default()),
            refill_in_flight: AtomicBool::new(false),
        }
    }

    /// Returns a random sample of up to `count` distinct cached descriptors.
    ///
    /// Expired state is invalidated first. A shortfall triggers enough
    /// concurrent [`prefetch`](Self::prefetch) calls to cover it, unless a
    /// refill is already in flight, in which case whatever is currently
    /// cached is sampled instead. Either way the call attempts a refill at
    /// most once and never blocks waiting for more content after that.
    pub async fn get_images(&self, count: usize) -> Vec<ImageDescriptor> {
        let mut state = self.state.lock().await;
        self.clean_expired(&mut state);

        if state.entries.len() < count && !self.refill_in_flight.load(Ordering::SeqCst) {
            let shortfall = count - state.entries.len();
            let batches_needed = shortfall.div_ceil(self.batch_size);
            drop(state);

            join_all((0..batches_needed).map(|_| self.prefetch())).await;

            state = self.state.lock().await;
        }

        let mut sampled = state.entries.clone();
        drop(state);

        sampled.shuffle(&mut rand::thread_rng());
        sampled.truncate(count);
        sampled
    }

    /// Refills the cache with one upstream batch.
    ///
    /// A call made while another refill is in flight resolves immediately
    /// without fetching. The in-flight flag is released on every exit
    /// path.
    pub async fn prefetch(&self) {
        if self.refill_in_flight.swap(true, Ordering::SeqCst) {
            return;
        }
        let _released = CallOnDrop::new(|| self.refill_in_flight.store(false, Ordering::SeqCst));

        let FetchedBatch {
            descriptors,
            degraded,
        } = self.client.fetch_batch(self.batch_size).await;
        if degraded.is_some() {
            metric!(counter("cache.refill.degraded") += 1);
        }

        let mut state = self.state.lock().await;
        let fresh: Vec<_> = descriptors
            .into_iter()
            .filter(|descriptor| {
                !state
                    .entries
                    .iter()
                    .any(|entry| entry.picture_url == descriptor.picture_url)
            })
            .collect();
        if fresh.is_empty() {
            return;
        }

        state.entries.extend(fresh);
        let excess = state.entries.len().saturating_sub(self.config.max_size);
        if excess > 0 {
            state.entries.drain(..excess);
        }
        state.last_refill = Some(Instant::now());

        metric!(gauge("cache.size") = state.entries.len() as u64);
        tracing::debug!("Cache refilled to {} images", state.entries.len());
    }

    /// Invalidates everything once the TTL since the last refill has
    /// passed. Entries arrive in undifferentiated batches, so expiry is
    /// all-or-nothing rather than per entry.
    fn clean_expired(&self, state: &mut CacheState) {
        if let Some(last_refill) = state.last_refill {
            if last_refill.elapsed() > self.config.ttl {
                tracing::debug!("Clearing {} expired cache entries", state.entries.len());
                state.entries.clear();
                state.last_refill = None;
            }
        }
    }
}
