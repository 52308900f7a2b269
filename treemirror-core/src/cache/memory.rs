//! Session-lifetime content overlay over the persistent cache

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct MemoryEntry {
    content: String,
    /// Fetch failed this session; content is the empty sentinel
    failed: bool,
}

/// In-process content cache. No timestamp checks: the item store is one
/// consistent snapshot per session.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.entries().get(id).map(|e| e.content.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    pub fn insert(&self, id: &str, content: String) {
        self.entries().insert(
            id.to_string(),
            MemoryEntry {
                content,
                failed: false,
            },
        );
    }

    /// Remember a failed fetch so the session does not retry it
    pub fn insert_failure(&self, id: &str) {
        self.entries().insert(
            id.to_string(),
            MemoryEntry {
                content: String::new(),
                failed: true,
            },
        );
    }

    pub fn remove(&self, id: &str) -> bool {
        self.entries().remove(id).is_some()
    }

    /// Drop everything, returning how many entries were held
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of resolved (non-failed) content for searching
    pub fn contents(&self) -> HashMap<String, String> {
        self.entries()
            .iter()
            .filter(|(_, e)| !e.failed)
            .map(|(id, e)| (id.clone(), e.content.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_sentinel_is_empty_and_excluded_from_contents() {
        let cache = MemoryCache::new();
        cache.insert("a", "alpha".to_string());
        cache.insert_failure("b");

        assert_eq!(cache.get("b").as_deref(), Some(""));
        assert!(cache.contains("b"));

        let contents = cache.contents();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents["a"], "alpha");
    }

    #[test]
    fn clear_and_remove() {
        let cache = MemoryCache::new();
        cache.insert("a", "alpha".to_string());
        cache.insert("b", "beta".to_string());
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}
