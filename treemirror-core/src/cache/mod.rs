//! Two-tier content cache: session memory over persistent SQLite rows

mod memory;
mod persistent;
pub(crate) mod resolver;

pub use memory::MemoryCache;
pub use persistent::{CacheEntry, CacheStats, PersistentCache};
pub use resolver::{ContentFetcher, ContentResolver, WarmStats, WarmedContent};
