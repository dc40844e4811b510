use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::errors::{lock_or_recover, AppError};
use crate::models::ViewUrlEntry;
use crate::uploader::backend_client::BackendClient;

/// Result of a resolve call. `error` is set when the batch fetch failed;
/// `urls` then holds whatever was still valid in the cache.
#[derive(Debug, Default)]
pub struct ResolvedUrls {
    pub urls: HashMap<String, String>,
    pub error: Option<AppError>,
}

/// Batches view URL lookups and caches them until they expire.
///
/// Expired entries are replaced lazily, on the next resolve that asks for them.
/// The cache is unbounded.
pub struct ViewUrlResolver {
    backend: BackendClient,
    clock: Arc<dyn Clock>,
    ttl_sec: Option<u32>,
    cache: Mutex<HashMap<String, ViewUrlEntry>>,
}

impl ViewUrlResolver {
    pub fn new(backend: BackendClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            ttl_sec: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Ask the backend for URLs valid for `ttl_sec` instead of its default.
    pub fn with_ttl(mut self, ttl_sec: Option<u32>) -> Self {
        self.ttl_sec = ttl_sec;
        self
    }

    pub async fn resolve<I, S>(&self, ids: I) -> ResolvedUrls
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requested: BTreeSet<String> = ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .collect();

        let missing = self.partition(&requested);
        let mut error = None;

        if !missing.is_empty() {
            log::debug!(
                "Fetching view URLs for {} of {} images",
                missing.len(),
                requested.len()
            );
            match self.backend.fetch_view_urls(&missing, self.ttl_sec).await {
                Ok(entries) => {
                    let mut cache = lock_or_recover(&self.cache, "view url merge");
                    for entry in entries {
                        cache.insert(entry.id.clone(), entry);
                    }
                }
                Err(e) => {
                    log::warn!(
                        "Failed to fetch view URLs for {} images, showing cached previews only: {}",
                        missing.len(),
                        e
                    );
                    error = Some(e);
                }
            }
        }

        // Re-read the clock: the fetch may have taken long enough for entries to lapse.
        let now = self.clock.now();
        let cache = lock_or_recover(&self.cache, "view url read");
        let urls = requested
            .iter()
            .filter_map(|id| {
                cache
                    .get(id)
                    .filter(|entry| entry.is_valid_at(now))
                    .map(|entry| (id.clone(), entry.url.clone()))
            })
            .collect();

        ResolvedUrls { urls, error }
    }

    /// Valid cached URL for `id`, without any network call.
    pub fn cached_url(&self, id: &str) -> Option<String> {
        let now = self.clock.now();
        lock_or_recover(&self.cache, "view url lookup")
            .get(id)
            .filter(|entry| entry.is_valid_at(now))
            .map(|entry| entry.url.clone())
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let mut cache = lock_or_recover(&self.cache, "view url prune");
        let before = cache.len();
        cache.retain(|_, entry| entry.is_valid_at(now));
        before - cache.len()
    }

    pub fn invalidate(&self, id: &str) -> bool {
        lock_or_recover(&self.cache, "view url invalidate")
            .remove(id)
            .is_some()
    }

    pub fn clear(&self) {
        lock_or_recover(&self.cache, "view url clear").clear();
    }

    pub fn cached_len(&self) -> usize {
        lock_or_recover(&self.cache, "view url len").len()
    }

    /// Split `requested` into served-from-cache and to-fetch, evicting expired hits.
    fn partition(&self, requested: &BTreeSet<String>) -> Vec<String> {
        let now = self.clock.now();
        let mut cache = lock_or_recover(&self.cache, "view url partition");
        let mut missing = Vec::new();

        for id in requested {
            match cache.get(id) {
                Some(entry) if entry.is_valid_at(now) => {}
                Some(_) => {
                    cache.remove(id);
                    missing.push(id.clone());
                }
                None => missing.push(id.clone()),
            }
        }

        missing
    }
}
