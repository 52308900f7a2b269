//! Treemirror Core - cached, searchable mirrors of hierarchical collections
//!
//! Items come from a remote collection whose parent pointers are untrusted.
//! This library keeps them in a session store, resolves their content
//! through a timestamp-validated two-tier cache, searches them fuzzily, and
//! materializes a cycle-safe hierarchy for presentation.

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod hierarchy;
pub mod item;
pub mod mirror;
pub mod refresher;
pub mod search;
pub mod store;

pub use cache::{
    CacheEntry, CacheStats, ContentFetcher, ContentResolver, MemoryCache, PersistentCache,
    WarmStats,
};
pub use config::Config;
pub use diagnostics::{Diagnostic, Diagnostics};
pub use error::{DuplicateId, ErrorEnvelope, FetchError, MirrorError};
pub use hierarchy::{flat_view, Adjacency, DepthFirst, HierarchyBuilder, Tree, TreeNode};
pub use item::{AttributeValue, Attributes, Item, Scalar};
pub use mirror::Mirror;
pub use refresher::{BatchRefresher, BatchReport, NoProgress, ProgressReporter};
pub use search::{flatten_attributes, SearchIndex};
pub use store::{ItemStore, RefreshGuard, RefreshStats};

/// Result type alias for treemirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;
