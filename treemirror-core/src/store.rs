//! Session item store: the flat, deduplicated collection behind every view

use crate::error::{DuplicateId, MirrorError};
use crate::item::{Attributes, Item};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Outcome of a successful refresh
#[derive(Debug, Clone, Serialize)]
pub struct RefreshStats {
    pub items: usize,
    /// Ids present before the refresh that the new population no longer has
    pub removed: usize,
    /// Ids kept across the refresh whose source timestamp moved
    pub changed: Vec<String>,
    pub generation: u64,
}

#[derive(Default)]
struct Snapshot {
    items: Vec<Item>,
    by_id: HashMap<String, usize>,
    generation: u64,
}

/// Owns the items of the current session.
///
/// Refreshes are full replacements. A refresh-in-progress flag rejects
/// overlapping refreshes instead of interleaving them.
#[derive(Default)]
pub struct ItemStore {
    snapshot: RwLock<Snapshot>,
    refreshing: AtomicBool,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a refresh. Fails if another refresh has not finished yet.
    pub fn begin_refresh(&self) -> crate::Result<RefreshGuard<'_>> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MirrorError::RefreshInProgress);
        }
        Ok(RefreshGuard { store: self })
    }

    /// Replace the store contents in one step
    pub fn refresh(&self, items: Vec<Item>) -> crate::Result<RefreshStats> {
        self.begin_refresh()?.commit(items)
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.read_snapshot().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.read_snapshot().generation
    }

    /// Clone of the current items, in population order
    pub fn items(&self) -> Vec<Item> {
        self.read_snapshot().items.clone()
    }

    pub fn get(&self, id: &str) -> Option<Item> {
        let snapshot = self.read_snapshot();
        snapshot.by_id.get(id).map(|&idx| snapshot.items[idx].clone())
    }

    /// Run `f` over the current items without cloning them
    pub fn read<R>(&self, f: impl FnOnce(&[Item]) -> R) -> R {
        f(&self.read_snapshot().items)
    }

    /// Store resolved content on an item. Returns false for unknown ids.
    pub fn set_content(&self, id: &str, content: String) -> bool {
        let mut snapshot = self.write_snapshot();
        match snapshot.by_id.get(id).copied() {
            Some(idx) => {
                snapshot.items[idx].content = Some(content);
                true
            }
            None => false,
        }
    }

    /// Fill attributes from the cache when the live item carries none
    pub fn fill_attributes(&self, id: &str, attributes: Attributes) -> bool {
        let mut snapshot = self.write_snapshot();
        let Some(idx) = snapshot.by_id.get(id).copied() else {
            return false;
        };
        let item = &mut snapshot.items[idx];
        if item.attributes.is_empty() && !attributes.is_empty() {
            item.attributes = attributes;
            return true;
        }
        false
    }

    fn read_snapshot(&self) -> RwLockReadGuard<'_, Snapshot> {
        // The snapshot is only ever swapped whole, so a poisoned lock still holds consistent data.
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_snapshot(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive right to replace the store contents. Dropping it ends the refresh.
pub struct RefreshGuard<'a> {
    store: &'a ItemStore,
}

impl RefreshGuard<'_> {
    /// Validate `items` and swap them in. On an integrity error the previous
    /// snapshot stays in place.
    pub fn commit(self, items: Vec<Item>) -> crate::Result<RefreshStats> {
        let by_id = index_unique(&items)?;

        let mut snapshot = self.store.write_snapshot();
        let removed = snapshot
            .by_id
            .keys()
            .filter(|id| !by_id.contains_key(id.as_str()))
            .count();
        let changed: Vec<String> = items
            .iter()
            .filter(|item| {
                snapshot
                    .by_id
                    .get(&item.id)
                    .is_some_and(|&old| snapshot.items[old].last_modified != item.last_modified)
            })
            .map(|item| item.id.clone())
            .collect();
        let generation = snapshot.generation + 1;
        let count = items.len();

        *snapshot = Snapshot {
            items,
            by_id,
            generation,
        };

        tracing::info!(
            items = count,
            removed,
            changed = changed.len(),
            generation,
            "item store refreshed"
        );
        Ok(RefreshStats {
            items: count,
            removed,
            changed,
            generation,
        })
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.store.refreshing.store(false, Ordering::Release);
    }
}

/// Build the id index, collecting every duplicated id with all its titles
pub fn index_unique(items: &[Item]) -> crate::Result<HashMap<String, usize>> {
    let mut by_id: HashMap<String, usize> = HashMap::with_capacity(items.len());
    let mut duplicated: Vec<&str> = Vec::new();
    let mut seen_dup: HashSet<&str> = HashSet::new();

    for (idx, item) in items.iter().enumerate() {
        if by_id.contains_key(&item.id) {
            if seen_dup.insert(item.id.as_str()) {
                duplicated.push(item.id.as_str());
            }
        } else {
            by_id.insert(item.id.clone(), idx);
        }
    }

    if duplicated.is_empty() {
        return Ok(by_id);
    }

    let duplicates: Vec<DuplicateId> = duplicated
        .into_iter()
        .map(|id| DuplicateId {
            id: id.to_string(),
            titles: items
                .iter()
                .filter(|item| item.id == id)
                .map(|item| item.title.clone())
                .collect(),
        })
        .collect();

    tracing::warn!(count = duplicates.len(), "refresh rejected: duplicate item ids");
    Err(MirrorError::DuplicateIds(duplicates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn item(id: &str, title: &str) -> Item {
        Item::new(id, title, datetime!(2024-01-01 0:00 UTC))
    }

    #[test]
    fn refresh_replaces_contents() {
        let store = ItemStore::new();
        store.refresh(vec![item("a", "A"), item("b", "B")]).unwrap();
        let stats = store.refresh(vec![item("c", "C")]).unwrap();

        assert_eq!(stats.items, 1);
        assert_eq!(stats.removed, 2);
        assert!(stats.changed.is_empty());
        assert_eq!(stats.generation, 2);
        assert!(store.get("a").is_none());
        assert_eq!(store.get("c").unwrap().title, "C");
    }

    #[test]
    fn refresh_reports_items_with_new_timestamps() {
        let store = ItemStore::new();
        store.refresh(vec![item("a", "A"), item("b", "B")]).unwrap();

        let mut edited = item("a", "A");
        edited.last_modified += time::Duration::hours(2);
        let stats = store.refresh(vec![edited, item("b", "B")]).unwrap();
        assert_eq!(stats.changed, vec!["a".to_string()]);
    }

    #[test]
    fn duplicate_ids_keep_previous_state() {
        let store = ItemStore::new();
        store.refresh(vec![item("keep", "Kept")]).unwrap();

        let err = store
            .refresh(vec![item("x", "A"), item("y", "Y"), item("x", "B")])
            .unwrap_err();
        match err {
            MirrorError::DuplicateIds(dups) => {
                assert_eq!(dups.len(), 1);
                assert_eq!(dups[0].id, "x");
                assert_eq!(dups[0].titles, vec!["A".to_string(), "B".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.generation(), 1);
        assert!(store.get("keep").is_some());
        assert!(!store.is_refreshing());
    }

    #[test]
    fn overlapping_refresh_is_rejected() {
        let store = ItemStore::new();
        let guard = store.begin_refresh().unwrap();
        assert!(matches!(
            store.refresh(vec![item("a", "A")]),
            Err(MirrorError::RefreshInProgress)
        ));
        guard.commit(vec![item("b", "B")]).unwrap();

        // Flag cleared once the guard is consumed
        store.refresh(vec![item("a", "A")]).unwrap();
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn dropped_guard_releases_flag() {
        let store = ItemStore::new();
        {
            let _guard = store.begin_refresh().unwrap();
            assert!(store.is_refreshing());
        }
        assert!(!store.is_refreshing());
    }

    #[test]
    fn set_content_and_fill_attributes() {
        let store = ItemStore::new();
        store.refresh(vec![item("a", "A")]).unwrap();

        assert!(store.set_content("a", "body".to_string()));
        assert!(!store.set_content("missing", "body".to_string()));
        assert_eq!(store.get("a").unwrap().content.as_deref(), Some("body"));

        let mut attrs = Attributes::new();
        attrs.insert("status".to_string(), crate::AttributeValue::text("Done"));
        assert!(store.fill_attributes("a", attrs.clone()));
        // Live attributes win over cached ones
        assert!(!store.fill_attributes("a", attrs));
    }
}
