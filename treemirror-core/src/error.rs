//! Error types for treemirror operations

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Structured error payload for machine-readable output.
///
/// Printed by the CLI in `--json` mode.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub hint: String,
}

impl ErrorEnvelope {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }
}

/// One id that occurred more than once in a refresh, with every title seen for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateId {
    pub id: String,
    pub titles: Vec<String>,
}

impl fmt::Display for DuplicateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.titles.join(" | "))
    }
}

fn format_duplicates(duplicates: &[DuplicateId]) -> String {
    duplicates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error returned by a content-fetch collaborator.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("Duplicate item ids in refresh: {}", format_duplicates(.0))]
    DuplicateIds(Vec<DuplicateId>),

    #[error("A refresh is already in progress for this item store")]
    RefreshInProgress,

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Content fetch failed for {id}: {message}")]
    Fetch { id: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp '{value}': {message}")]
    Timestamp { value: String, message: String },

    #[error("Not a treemirror workspace (no .treemirror directory). Run 'treemirror init' first.")]
    NotInitialized,

    #[error("No item snapshot at {}", .0.display())]
    SnapshotNotFound(PathBuf),

    #[error("Config already exists at {}", .0.display())]
    ConfigExists(PathBuf),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Schema version mismatch: cache is v{found}, expected v{expected}. Run 'treemirror cache clear' or delete the cache file.")]
    SchemaVersionMismatch { found: i32, expected: i32 },
}

impl MirrorError {
    /// Integrity errors block further processing; everything else is reportable.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            MirrorError::DuplicateIds(_) | MirrorError::RefreshInProgress
        )
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            MirrorError::DuplicateIds(_) => ErrorEnvelope::new(
                "duplicate_ids",
                self.to_string(),
                "Fix the conflicting ids upstream and refresh again",
            ),
            MirrorError::RefreshInProgress => ErrorEnvelope::new(
                "refresh_in_progress",
                self.to_string(),
                "Wait for the running refresh to finish",
            ),
            MirrorError::ItemNotFound(_) => {
                ErrorEnvelope::new("not_found", self.to_string(), "Check the item id")
            }
            MirrorError::Fetch { .. } => ErrorEnvelope::new(
                "fetch_failed",
                self.to_string(),
                "The item will be retried in the next session",
            ),
            MirrorError::SnapshotNotFound(_) => ErrorEnvelope::new(
                "snapshot_not_found",
                self.to_string(),
                "Pass --snapshot or write .treemirror/items.json",
            ),
            MirrorError::NotInitialized => {
                ErrorEnvelope::new("not_initialized", self.to_string(), "Run 'treemirror init'")
            }
            _ => ErrorEnvelope::new("error", self.to_string(), ""),
        }
    }
}
