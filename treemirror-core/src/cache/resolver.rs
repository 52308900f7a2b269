//! Content resolution through memory, disk, then the fetch collaborator

use super::memory::MemoryCache;
use super::persistent::{CacheEntry, PersistentCache};
use crate::error::{FetchError, MirrorError};
use crate::item::{Attributes, Item};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;

/// Source of fresh content for one item (the remote API client).
pub trait ContentFetcher: Send + Sync + 'static {
    fn fetch(&self, id: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Counts from loading persisted entries into memory
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmStats {
    /// Valid persisted entries promoted into memory
    pub loaded: usize,
    /// Persisted entries older than the item
    pub stale: usize,
    /// Items with no persisted entry
    pub missing: usize,
    /// Items already resolved this session
    pub in_memory: usize,
}

/// Content made available by a warm-up
#[derive(Debug, Clone)]
pub struct WarmedContent {
    pub id: String,
    pub content: String,
    pub attributes: Option<Attributes>,
}

/// Resolves item content, writing fetched results back to both cache tiers.
///
/// Concurrent resolves of one id share a single fetch: the first caller takes
/// the id's gate and later callers wait on it, then find the content in memory.
pub struct ContentResolver<F> {
    memory: MemoryCache,
    persistent: PersistentCache,
    fetcher: F,
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl<F: ContentFetcher> ContentResolver<F> {
    pub fn new(persistent: PersistentCache, fetcher: F) -> Self {
        Self {
            memory: MemoryCache::new(),
            persistent,
            fetcher,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn persistent(&self) -> &PersistentCache {
        &self.persistent
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Resolve content for `id` at freshness `last_modified`.
    ///
    /// Cache I/O problems count as misses. A failed fetch is remembered in
    /// memory only, so this session returns empty content for it and the
    /// next session retries.
    pub async fn resolve(
        &self,
        id: &str,
        last_modified: OffsetDateTime,
        attributes: Option<&Attributes>,
    ) -> crate::Result<String> {
        if let Some(content) = self.memory.get(id) {
            tracing::trace!(id = %id, "memory cache hit");
            return Ok(content);
        }

        let gate = self.gate(id);
        let _held = gate.lock().await;
        if let Some(content) = self.memory.get(id) {
            tracing::trace!(id = %id, "resolved by a concurrent caller");
            return Ok(content);
        }

        let result = self.load_or_fetch(id, last_modified, attributes).await;
        self.inflight().remove(id);
        result
    }

    fn inflight(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Per-id gate; the map lock is released before the caller awaits it
    fn gate(&self, id: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.inflight().entry(id.to_string()).or_default())
    }

    async fn load_or_fetch(
        &self,
        id: &str,
        last_modified: OffsetDateTime,
        attributes: Option<&Attributes>,
    ) -> crate::Result<String> {
        match self.persistent.get(id) {
            Ok(Some(entry)) if entry.is_valid_for(last_modified) => {
                tracing::debug!(id = %id, "persistent cache hit");
                self.memory.insert(id, entry.content.clone());
                return Ok(entry.content);
            }
            Ok(Some(_)) => tracing::debug!(id = %id, "persistent cache entry is stale"),
            Ok(None) => {}
            Err(e) => tracing::warn!(id = %id, error = %e, "cache read failed; fetching"),
        }

        match self.fetcher.fetch(id).await {
            Ok(content) => {
                let entry = CacheEntry::new(content.clone(), last_modified, attributes.cloned());
                if let Err(e) = self.persistent.put(id, &entry) {
                    tracing::warn!(id = %id, error = %e, "cache write failed");
                }
                self.memory.insert(id, content.clone());
                tracing::debug!(id = %id, bytes = content.len(), "fetched content");
                Ok(content)
            }
            Err(e) => {
                self.memory.insert_failure(id);
                tracing::warn!(id = %id, error = %e, "content fetch failed");
                Err(MirrorError::Fetch {
                    id: id.to_string(),
                    message: e.message,
                })
            }
        }
    }

    /// Resolve using an item's own freshness and attributes
    pub async fn resolve_item(&self, item: &Item) -> crate::Result<String> {
        let attributes = (!item.attributes.is_empty()).then_some(&item.attributes);
        self.resolve(&item.id, item.last_modified, attributes).await
    }

    /// Load valid persisted entries for `items` into memory in a single scan.
    pub fn warm(&self, items: &[Item]) -> (WarmStats, Vec<WarmedContent>) {
        let mut stats = WarmStats::default();
        let mut warmed = Vec::new();

        let mut persisted = match self.persistent.load_all() {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, "cache warm-up skipped: read failed");
                Default::default()
            }
        };

        for item in items {
            if let Some(content) = self.memory.get(&item.id) {
                stats.in_memory += 1;
                warmed.push(WarmedContent {
                    id: item.id.clone(),
                    content,
                    attributes: None,
                });
                continue;
            }
            match persisted.remove(&item.id) {
                Some(entry) if entry.is_valid_for(item.last_modified) => {
                    self.memory.insert(&item.id, entry.content.clone());
                    stats.loaded += 1;
                    warmed.push(WarmedContent {
                        id: item.id.clone(),
                        content: entry.content,
                        attributes: entry.attributes,
                    });
                }
                Some(_) => stats.stale += 1,
                None => stats.missing += 1,
            }
        }

        tracing::info!(
            loaded = stats.loaded,
            stale = stats.stale,
            missing = stats.missing,
            "cache warmed"
        );
        (stats, warmed)
    }

    /// Drop one entry from both tiers. Returns whether anything was cached.
    pub fn invalidate(&self, id: &str) -> crate::Result<bool> {
        let in_memory = self.memory.remove(id);
        let on_disk = self.persistent.remove(id)?;
        Ok(in_memory || on_disk)
    }

    /// Delete every persisted entry and empty memory. Returns the number of
    /// persisted entries removed.
    pub fn clear_cache(&self) -> crate::Result<usize> {
        self.memory.clear();
        let removed = self.persistent.clear()?;
        tracing::info!(removed, "content cache cleared");
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use time::macros::datetime;
    use time::Duration;

    /// In-memory fetcher that counts calls per id
    #[derive(Default)]
    pub(crate) struct CountingFetcher {
        pub contents: Mutex<HashMap<String, String>>,
        pub failing: Mutex<HashSet<String>>,
        pub calls: AtomicUsize,
        pub per_id: Mutex<HashMap<String, usize>>,
        pub delay: Mutex<Option<std::time::Duration>>,
    }

    impl CountingFetcher {
        pub fn with(entries: &[(&str, &str)]) -> Self {
            let fetcher = Self::default();
            {
                let mut contents = fetcher.contents.lock().unwrap();
                for (id, body) in entries {
                    contents.insert(id.to_string(), body.to_string());
                }
            }
            fetcher
        }

        pub fn fail(&self, id: &str) {
            self.failing.lock().unwrap().insert(id.to_string());
        }

        pub fn set(&self, id: &str, body: &str) {
            self.contents
                .lock()
                .unwrap()
                .insert(id.to_string(), body.to_string());
        }

        pub fn slow(&self, delay: std::time::Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        pub fn calls_for(&self, id: &str) -> usize {
            self.per_id.lock().unwrap().get(id).copied().unwrap_or(0)
        }
    }

    impl ContentFetcher for CountingFetcher {
        async fn fetch(&self, id: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.per_id.lock().unwrap().entry(id.to_string()).or_default() += 1;
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.lock().unwrap().contains(id) {
                return Err(FetchError::new("remote unavailable"));
            }
            Ok(self
                .contents
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn resolver(fetcher: CountingFetcher) -> ContentResolver<CountingFetcher> {
        ContentResolver::new(PersistentCache::open_in_memory().unwrap(), fetcher)
    }

    const T0: OffsetDateTime = datetime!(2024-05-01 0:00 UTC);

    #[tokio::test]
    async fn second_resolve_does_not_fetch() {
        let r = resolver(CountingFetcher::with(&[("a", "alpha")]));
        assert_eq!(r.resolve("a", T0, None).await.unwrap(), "alpha");
        assert_eq!(r.resolve("a", T0, None).await.unwrap(), "alpha");
        assert_eq!(r.fetcher().calls_for("a"), 1);
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_fetch() {
        let r = resolver(CountingFetcher::with(&[("a", "alpha")]));
        r.fetcher().slow(std::time::Duration::from_millis(20));

        let (first, second) = tokio::join!(r.resolve("a", T0, None), r.resolve("a", T0, None));
        assert_eq!(first.unwrap(), "alpha");
        assert_eq!(second.unwrap(), "alpha");
        assert_eq!(r.fetcher().calls_for("a"), 1);
        assert!(r.inflight().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolves_across_threads_share_one_fetch() {
        let r = Arc::new(resolver(CountingFetcher::with(&[("a", "alpha")])));
        r.fetcher().slow(std::time::Duration::from_millis(20));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let r = Arc::clone(&r);
            tasks.spawn(async move { r.resolve("a", T0, None).await });
        }
        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap().unwrap(), "alpha");
        }
        assert_eq!(r.fetcher().calls_for("a"), 1);
    }

    #[tokio::test]
    async fn concurrent_failures_share_one_fetch() {
        let r = resolver(CountingFetcher::default());
        r.fetcher().fail("a");
        r.fetcher().slow(std::time::Duration::from_millis(20));

        let (first, second) = tokio::join!(r.resolve("a", T0, None), r.resolve("a", T0, None));
        assert!(first.is_err());
        assert_eq!(second.unwrap(), "");
        assert_eq!(r.fetcher().calls_for("a"), 1);
    }

    #[tokio::test]
    async fn persisted_entry_serves_a_new_session() {
        let r = resolver(CountingFetcher::with(&[("a", "alpha")]));
        r.resolve("a", T0, None).await.unwrap();

        // New session: memory gone, disk still valid
        r.memory().clear();
        assert_eq!(r.resolve("a", T0, None).await.unwrap(), "alpha");
        assert_eq!(r.fetcher().calls_for("a"), 1);
        assert!(r.memory().contains("a"));
    }

    #[tokio::test]
    async fn newer_source_timestamp_refetches() {
        let r = resolver(CountingFetcher::with(&[("a", "v1")]));
        r.resolve("a", T0, None).await.unwrap();

        r.fetcher().set("a", "v2");
        r.memory().clear();
        let later = T0 + Duration::hours(1);
        assert_eq!(r.resolve("a", later, None).await.unwrap(), "v2");
        assert_eq!(r.fetcher().calls_for("a"), 2);

        let stored = r.persistent().get("a").unwrap().unwrap();
        assert_eq!(stored.source_last_modified, later);
    }

    #[tokio::test]
    async fn failed_fetch_is_cached_in_memory_only() {
        let r = resolver(CountingFetcher::default());
        r.fetcher().fail("a");

        let err = r.resolve("a", T0, None).await.unwrap_err();
        assert!(matches!(err, MirrorError::Fetch { ref id, .. } if id == "a"));
        // Same session: empty sentinel, no second fetch
        assert_eq!(r.resolve("a", T0, None).await.unwrap(), "");
        assert_eq!(r.fetcher().calls_for("a"), 1);
        assert!(r.persistent().get("a").unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_cache_forces_fetch() {
        let r = resolver(CountingFetcher::with(&[("a", "alpha"), ("b", "beta")]));
        r.resolve("a", T0, None).await.unwrap();
        r.resolve("b", T0, None).await.unwrap();

        assert_eq!(r.clear_cache().unwrap(), 2);
        r.resolve("a", T0, None).await.unwrap();
        assert_eq!(r.fetcher().calls_for("a"), 2);
    }

    #[tokio::test]
    async fn invalidate_drops_one_entry() {
        let r = resolver(CountingFetcher::with(&[("a", "alpha")]));
        r.resolve("a", T0, None).await.unwrap();
        assert!(r.invalidate("a").unwrap());
        assert!(!r.invalidate("a").unwrap());
        r.resolve("a", T0, None).await.unwrap();
        assert_eq!(r.fetcher().calls_for("a"), 2);
    }

    #[tokio::test]
    async fn warm_loads_only_valid_entries() {
        let r = resolver(CountingFetcher::with(&[("a", "alpha"), ("b", "beta")]));
        let mut attrs = Attributes::new();
        attrs.insert("status".to_string(), crate::AttributeValue::text("Draft"));
        r.resolve("a", T0, Some(&attrs)).await.unwrap();
        r.resolve("b", T0, None).await.unwrap();
        r.memory().clear();

        let items = vec![
            Item::new("a", "A", T0),
            Item::new("b", "B", T0 + Duration::days(1)),
            Item::new("c", "C", T0),
        ];
        let (stats, warmed) = r.warm(&items);

        assert_eq!(stats.loaded, 1);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.missing, 1);
        assert_eq!(warmed.len(), 1);
        assert_eq!(warmed[0].id, "a");
        assert_eq!(warmed[0].attributes, Some(attrs));
        assert!(r.memory().contains("a"));
        assert!(!r.memory().contains("b"));
    }
}
