//! The mirror: one item store, one resolver, and the views built over them

use crate::cache::{CacheStats, ContentFetcher, ContentResolver, PersistentCache, WarmStats};
use crate::config::Config;
use crate::error::MirrorError;
use crate::hierarchy::{flat_view, Adjacency, HierarchyBuilder, Tree};
use crate::item::Item;
use crate::refresher::{BatchRefresher, BatchReport, ProgressReporter};
use crate::search::SearchIndex;
use crate::store::{ItemStore, RefreshGuard, RefreshStats};
use std::collections::HashSet;
use std::sync::Arc;

/// Session-scoped entry point used by presentation layers.
///
/// Each instance owns its own store and caches; nothing is process-global.
pub struct Mirror<F> {
    config: Config,
    store: ItemStore,
    resolver: Arc<ContentResolver<F>>,
    hierarchy: HierarchyBuilder,
    search: SearchIndex,
    refresher: BatchRefresher,
}

impl<F: ContentFetcher> Mirror<F> {
    pub fn new(config: Config, cache: PersistentCache, fetcher: F) -> Self {
        let hierarchy = HierarchyBuilder::new(config.root_sentinel().map(str::to_string));
        let search = SearchIndex::new(&config.search);
        let refresher = BatchRefresher::from_config(&config);
        Self {
            config,
            store: ItemStore::new(),
            resolver: Arc::new(ContentResolver::new(cache, fetcher)),
            hierarchy,
            search,
            refresher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<ContentResolver<F>> {
        &self.resolver
    }

    /// Replace the item store. Performs no network I/O.
    ///
    /// Items whose source timestamp moved lose their session content so the
    /// next read goes back through the persistent tier.
    pub fn refresh(&self, items: Vec<Item>) -> crate::Result<RefreshStats> {
        let stats = self.store.refresh(items)?;
        self.forget_changed(&stats);
        Ok(stats)
    }

    /// Hold the refresh flag while pages are fetched, then commit with
    /// [`Mirror::commit_refresh`]
    pub fn begin_refresh(&self) -> crate::Result<RefreshGuard<'_>> {
        self.store.begin_refresh()
    }

    pub fn commit_refresh(
        &self,
        guard: RefreshGuard<'_>,
        items: Vec<Item>,
    ) -> crate::Result<RefreshStats> {
        let stats = guard.commit(items)?;
        self.forget_changed(&stats);
        Ok(stats)
    }

    fn forget_changed(&self, stats: &RefreshStats) {
        for id in &stats.changed {
            self.resolver.memory().remove(id);
        }
    }

    pub fn items(&self) -> Vec<Item> {
        self.store.items()
    }

    /// Adjacency over an already filtered set of items
    pub fn adjacency<'a>(&self, filtered: &'a [Item]) -> Adjacency<'a> {
        self.hierarchy.build(filtered)
    }

    /// Children of `id`, starting a fresh traversal path
    pub fn children(&self, adjacency: &Adjacency<'_>, id: &str) -> Vec<Item> {
        self.children_on_path(adjacency, id, &[])
    }

    /// Children of `id` when the caller has expanded `path` (root first) to reach it
    pub fn children_on_path(
        &self,
        adjacency: &Adjacency<'_>,
        id: &str,
        path: &[&str],
    ) -> Vec<Item> {
        let ancestors: HashSet<&str> = path.iter().copied().collect();
        adjacency
            .children(id, &ancestors)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Ranked items for `text`; every item in store order for an empty query
    pub fn search(&self, text: &str) -> Vec<Item> {
        let contents = self.resolver.memory().contents();
        self.store.read(|items| {
            self.search
                .query(items, &contents, text)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    /// Hierarchy of the items matching `query` (all items when `None`)
    pub fn tree(&self, query: Option<&str>) -> Tree {
        let filtered = self.search(query.unwrap_or(""));
        self.adjacency(&filtered).tree()
    }

    /// Non-hierarchical view, newest first
    pub fn flat(&self, query: Option<&str>) -> Vec<Item> {
        let filtered = self.search(query.unwrap_or(""));
        flat_view(&filtered).into_iter().cloned().collect()
    }

    /// Content for one item through the cache tiers
    pub async fn resolve_content(&self, id: &str) -> crate::Result<String> {
        let item = self
            .store
            .get(id)
            .ok_or_else(|| MirrorError::ItemNotFound(id.to_string()))?;
        match self.resolver.resolve_item(&item).await {
            Ok(content) => {
                self.store.set_content(id, content.clone());
                Ok(content)
            }
            Err(e) => {
                self.store.set_content(id, String::new());
                Err(e)
            }
        }
    }

    /// Load valid persisted entries into memory and onto the items
    pub fn warm_cache(&self) -> WarmStats {
        let items = self.store.items();
        let (stats, warmed) = self.resolver.warm(&items);
        for entry in warmed {
            self.store.set_content(&entry.id, entry.content);
            if let Some(attributes) = entry.attributes {
                self.store.fill_attributes(&entry.id, attributes);
            }
        }
        stats
    }

    /// Resolve content for every item in the store
    pub async fn refresh_all_content(
        &self,
        progress: &mut impl ProgressReporter,
    ) -> BatchReport {
        let items = self.store.items();
        let report = self
            .refresher
            .refresh_all(&self.resolver, &items, progress)
            .await;
        for (id, content) in &report.contents {
            self.store.set_content(id, content.clone());
        }
        report
    }

    /// Delete all cached content; the item store is untouched
    pub fn clear_cache(&self) -> crate::Result<usize> {
        self.resolver.clear_cache()
    }

    pub fn invalidate(&self, id: &str) -> crate::Result<bool> {
        self.resolver.invalidate(id)
    }

    pub fn cache_stats(&self) -> crate::Result<CacheStats> {
        self.resolver.persistent().stats()
    }
}
