//! Structural anomaly reporting for untrusted parent pointers

use serde::Serialize;
use std::fmt;

/// A parent relationship that was dropped from the hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Item names itself as parent
    SelfParent { id: String },
    /// Two items name each other as parent
    MutualCycle { id: String, parent_id: String },
    /// Traversal reached an item that is already an ancestor on the current path
    DeepCycle { id: String, ancestor_of: String },
    /// Member of a parent cycle with no path to a root, shown at the top level
    PromotedToRoot { id: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::SelfParent { id } => write!(f, "{} is its own parent", id),
            Diagnostic::MutualCycle { id, parent_id } => {
                write!(f, "{} and {} are each other's parent", id, parent_id)
            }
            Diagnostic::DeepCycle { id, ancestor_of } => {
                write!(f, "cycle: {} is already an ancestor of {}", id, ancestor_of)
            }
            Diagnostic::PromotedToRoot { id } => {
                write!(f, "{} sits on a parent cycle and was shown as a root", id)
            }
        }
    }
}

/// Collector for non-fatal anomalies, reported after an operation completes
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(%diagnostic, "hierarchy anomaly");
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }
}
