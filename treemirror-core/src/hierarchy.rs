//! Cycle-safe hierarchy materialization over untrusted parent pointers.
//!
//! The adjacency is an index view over a borrowed item slice: parent id to
//! child indices. Self edges and mutual 2-cycles are rejected while building;
//! longer cycles are left in place and neutralized during traversal by a
//! per-path ancestor set that each branch receives by value.

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::item::Item;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};

/// Builds a parent → children adjacency for one view of the collection
#[derive(Debug, Clone, Default)]
pub struct HierarchyBuilder {
    root_sentinel: Option<String>,
}

impl HierarchyBuilder {
    pub fn new(root_sentinel: Option<String>) -> Self {
        Self {
            root_sentinel: root_sentinel.filter(|r| !r.is_empty()),
        }
    }

    fn is_sentinel(&self, parent_id: &str) -> bool {
        self.root_sentinel.as_deref() == Some(parent_id)
    }

    /// Build the adjacency for `items`. Never fails; rejected edges are
    /// recorded in the adjacency's diagnostics.
    pub fn build<'a>(&self, items: &'a [Item]) -> Adjacency<'a> {
        let mut by_id: HashMap<&'a str, usize> = HashMap::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            by_id.entry(item.id.as_str()).or_insert(idx);
        }

        let mut diagnostics = Diagnostics::new();
        let mut children: HashMap<&'a str, Vec<usize>> = HashMap::new();
        let mut parent_of: Vec<Option<usize>> = vec![None; items.len()];

        for (idx, item) in items.iter().enumerate() {
            let Some(parent_id) = item.parent_id() else {
                continue;
            };
            if self.is_sentinel(parent_id) {
                continue;
            }
            if parent_id == item.id {
                diagnostics.push(Diagnostic::SelfParent {
                    id: item.id.clone(),
                });
                continue;
            }
            let Some(&parent_idx) = by_id.get(parent_id) else {
                // Parent outside this view: item becomes a root
                continue;
            };
            if items[parent_idx].parent_id() == Some(item.id.as_str()) {
                // Report each mutual pair once
                if item.id.as_str() < parent_id {
                    diagnostics.push(Diagnostic::MutualCycle {
                        id: item.id.clone(),
                        parent_id: parent_id.to_string(),
                    });
                }
                continue;
            }
            children
                .entry(items[parent_idx].id.as_str())
                .or_default()
                .push(idx);
            parent_of[idx] = Some(parent_idx);
        }

        for list in children.values_mut() {
            list.sort_by(|&a, &b| by_title(&items[a], &items[b]));
        }

        let mut adjacency = Adjacency {
            items,
            by_id,
            children,
            roots: Vec::new(),
            diagnostics,
        };
        adjacency.roots = adjacency.select_roots(&parent_of);
        adjacency
    }
}

/// Parent → ordered children mapping over a borrowed item slice
#[derive(Debug)]
pub struct Adjacency<'a> {
    items: &'a [Item],
    by_id: HashMap<&'a str, usize>,
    children: HashMap<&'a str, Vec<usize>>,
    roots: Vec<usize>,
    diagnostics: Diagnostics,
}

impl<'a> Adjacency<'a> {
    /// Roots are items without an accepted parent edge, plus one promoted
    /// member per parent cycle that no root can reach.
    fn select_roots(&mut self, parent_of: &[Option<usize>]) -> Vec<usize> {
        let mut roots: Vec<usize> = (0..self.items.len())
            .filter(|&idx| parent_of[idx].is_none())
            .collect();

        let mut reached = vec![false; self.items.len()];
        for &root in &roots {
            self.mark_reachable(root, &mut reached);
        }

        if reached.iter().any(|r| !r) {
            let mut stranded: Vec<usize> =
                (0..self.items.len()).filter(|&i| !reached[i]).collect();
            stranded.sort_by(|&a, &b| by_title(&self.items[a], &self.items[b]));

            for idx in stranded {
                if reached[idx] {
                    continue;
                }
                let promoted = self.cycle_representative(idx, parent_of);
                self.diagnostics.push(Diagnostic::PromotedToRoot {
                    id: self.items[promoted].id.clone(),
                });
                self.mark_reachable(promoted, &mut reached);
                roots.push(promoted);
            }
        }

        roots.sort_by(|&a, &b| by_title(&self.items[a], &self.items[b]));
        roots
    }

    /// Follow accepted parent edges from `start` until the chain repeats and
    /// return the first-sorting member of the cycle it ends in.
    fn cycle_representative(&self, start: usize, parent_of: &[Option<usize>]) -> usize {
        let mut seen = HashSet::new();
        let mut current = start;
        while seen.insert(current) {
            match parent_of[current] {
                Some(parent) => current = parent,
                None => return current,
            }
        }

        let mut best = current;
        let mut member = current;
        while let Some(parent) = parent_of[member] {
            if parent == current {
                break;
            }
            if by_title(&self.items[parent], &self.items[best]) == Ordering::Less {
                best = parent;
            }
            member = parent;
        }
        best
    }

    fn mark_reachable(&self, start: usize, reached: &mut [bool]) {
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            if std::mem::replace(&mut reached[idx], true) {
                continue;
            }
            if let Some(kids) = self.children.get(self.items[idx].id.as_str()) {
                queue.extend(kids.iter().copied().filter(|&k| !reached[k]));
            }
        }
    }

    /// Top-level items, sorted by title
    pub fn roots(&self) -> Vec<&'a Item> {
        self.roots.iter().map(|&idx| &self.items[idx]).collect()
    }

    pub fn is_root(&self, id: &str) -> bool {
        self.by_id
            .get(id)
            .is_some_and(|idx| self.roots.contains(idx))
    }

    /// Children of `id` given the ancestors on the current traversal path.
    ///
    /// Returns an empty list when `id` is already one of its own ancestors.
    pub fn children(&self, id: &str, ancestors: &HashSet<&str>) -> Vec<&'a Item> {
        if ancestors.contains(id) {
            tracing::warn!(id = %id, "cycle detected during traversal; not expanding");
            return Vec::new();
        }
        self.children_unguarded(id)
    }

    /// Direct children of `id` without any cycle guard
    pub fn children_unguarded(&self, id: &str) -> Vec<&'a Item> {
        self.child_indices(id)
            .iter()
            .map(|&idx| &self.items[idx])
            .collect()
    }

    fn child_indices(&self, id: &str) -> &[usize] {
        self.children.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of accepted parent → child edges
    pub fn edge_count(&self) -> usize {
        self.children.values().map(Vec::len).sum()
    }

    /// Anomalies found while building
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Materialize the full tree from the roots.
    ///
    /// Iterative at any depth; each expanded node links to its parent slot for
    /// the ancestor check. Diagnostics hold the build-time anomalies followed
    /// by the cycles met while walking.
    pub fn tree(&self) -> Tree {
        let mut walked = Diagnostics::new();
        let mut slots: Vec<Slot> = Vec::with_capacity(self.items.len());
        let mut pending: Vec<usize> = Vec::new();

        for &root in &self.roots {
            pending.push(slots.len());
            slots.push(Slot::new(root, None));
        }
        let top = slots.len();

        while let Some(slot) = pending.pop() {
            let parent_item = &self.items[slots[slot].item];
            for &child in self.child_indices(&parent_item.id) {
                if on_path(&slots, slot, child) {
                    walked.push(Diagnostic::DeepCycle {
                        id: self.items[child].id.clone(),
                        ancestor_of: parent_item.id.clone(),
                    });
                    continue;
                }
                let child_slot = slots.len();
                slots.push(Slot::new(child, Some(slot)));
                slots[slot].children.push(child_slot);
                pending.push(child_slot);
            }
        }

        // Child slots always come after their parent, so build back to front
        let mut built: Vec<Option<TreeNode>> = (0..slots.len()).map(|_| None).collect();
        for idx in (0..slots.len()).rev() {
            let children = slots[idx]
                .children
                .iter()
                .filter_map(|&c| built[c].take())
                .collect();
            let item = &self.items[slots[idx].item];
            built[idx] = Some(TreeNode {
                id: item.id.clone(),
                title: item.title.clone(),
                children,
            });
        }
        let nodes = built.drain(..top).flatten().collect();

        let mut diagnostics = self.diagnostics.clone();
        diagnostics.extend(walked);
        Tree { nodes, diagnostics }
    }
}

/// One expanded position in the tree walk
struct Slot {
    item: usize,
    parent: Option<usize>,
    children: Vec<usize>,
}

impl Slot {
    fn new(item: usize, parent: Option<usize>) -> Self {
        Self {
            item,
            parent,
            children: Vec::new(),
        }
    }
}

/// Whether `item` already appears on the path ending at `slot`
fn on_path(slots: &[Slot], slot: usize, item: usize) -> bool {
    let mut cursor = Some(slot);
    while let Some(idx) = cursor {
        if slots[idx].item == item {
            return true;
        }
        cursor = slots[idx].parent;
    }
    false
}

/// Materialized hierarchy ready for presentation
#[derive(Debug, Clone, Serialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
    pub diagnostics: Diagnostics,
}

impl Tree {
    /// Ids in depth-first presentation order
    pub fn ids(&self) -> Vec<&str> {
        self.depth_first().map(|(_, node)| node.id.as_str()).collect()
    }

    /// `(depth, node)` pairs in depth-first presentation order
    pub fn depth_first(&self) -> DepthFirst<'_> {
        DepthFirst {
            stack: self.nodes.iter().rev().map(|node| (0, node)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// Depth-first iterator over a [`Tree`], using an explicit stack
pub struct DepthFirst<'t> {
    stack: Vec<(usize, &'t TreeNode)>,
}

impl<'t> Iterator for DepthFirst<'t> {
    type Item = (usize, &'t TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, node) = self.stack.pop()?;
        self.stack
            .extend(node.children.iter().rev().map(|child| (depth + 1, child)));
        Some((depth, node))
    }
}

/// Non-hierarchical view: most recently modified first
pub fn flat_view(items: &[Item]) -> Vec<&Item> {
    let mut out: Vec<&Item> = items.iter().collect();
    out.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| a.title.cmp(&b.title))
    });
    out
}

fn by_title(a: &Item, b: &Item) -> Ordering {
    a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id))
}
