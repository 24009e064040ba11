// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors

//! # Hierarchy Index — Transactional Parent/Child Tree
//!
//! Catalog entities form a hierarchy (categories, groups, org units). The
//! index accepts nodes in any order: a node whose declared parent has not
//! arrived yet is held as an **orphan** and attaches automatically — with
//! any still-orphaned descendants of its own — the moment the awaited parent
//! key appears.
//!
//! ## Node State Machine
//!
//! ```text
//! absent ──add_node──► orphan ──parent appears──► attached
//!    ▲                    ▲                           │
//!    └────remove_node─────┴── parent removed / cycle ─┘
//! ```
//!
//! Relocation is `add_node` with a new parent. If the requested parent is a
//! descendant of the node being moved, linking would close a cycle; the
//! engine refuses by an explicit ancestor walk *before* touching any link
//! and leaves the conflicting branch orphaned instead. The tree is never in
//! a half-moved state and the walk cannot loop.
//!
//! Orphans are excluded from every traversal result but remain retrievable
//! via [`HierarchyTree::orphans`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use taxondb_core::{Bitmap, PrimaryKey, Result, StructureId, StructureVersion, TaxonError};
use taxondb_storage::{
    ConsistencyReport, DiffLayer, Transaction, Transactional, TransactionalStore,
};

/// Exclusion filter applied *during* traversal: an excluded node's subtree
/// is never walked, not filtered out afterwards.
#[derive(Default)]
pub enum NodeExclusion {
    #[default]
    None,
    /// Skip these keys and everything below them.
    Bitmap(Bitmap),
    /// Skip keys matching the predicate, and everything below them.
    Predicate(Box<dyn Fn(PrimaryKey) -> bool + Send + Sync>),
}

impl NodeExclusion {
    #[inline]
    pub fn excludes(&self, pk: PrimaryKey) -> bool {
        match self {
            NodeExclusion::None => false,
            NodeExclusion::Bitmap(bitmap) => bitmap.contains(pk),
            NodeExclusion::Predicate(predicate) => predicate(pk),
        }
    }
}

impl std::fmt::Debug for NodeExclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeExclusion::None => write!(f, "NodeExclusion::None"),
            NodeExclusion::Bitmap(b) => write!(f, "NodeExclusion::Bitmap({b})"),
            NodeExclusion::Predicate(_) => write!(f, "NodeExclusion::Predicate"),
        }
    }
}

/// Order in which siblings are visited during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingOrder {
    /// Ascending primary key.
    Natural,
    /// Descending primary key.
    Reversed,
}

/// Traversal strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalOrder {
    BreadthFirst,
    DepthFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct NodeSlot {
    /// Declared parent key; `None` for roots.
    parent: Option<PrimaryKey>,
    /// Linked children, ascending. Orphan branch roots are *not* listed here.
    children: Vec<PrimaryKey>,
    /// Reachable from a root through linked edges.
    attached: bool,
}

/// Immutable snapshot of the hierarchy. Lives inside a
/// [`Transactional`] container; mutations arrive as replayed
/// [`HierarchyOp`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchyTree {
    nodes: HashMap<PrimaryKey, NodeSlot>,
    /// Attached top-level nodes, ascending.
    roots: Vec<PrimaryKey>,
    /// Awaited parent key → branch roots waiting for it, ascending.
    orphans: HashMap<PrimaryKey, Vec<PrimaryKey>>,
    attached_count: usize,
}

fn insert_sorted(list: &mut Vec<PrimaryKey>, pk: PrimaryKey) {
    if let Err(pos) = list.binary_search(&pk) {
        list.insert(pos, pk);
    }
}

fn remove_sorted(list: &mut Vec<PrimaryKey>, pk: PrimaryKey) -> bool {
    match list.binary_search(&pk) {
        Ok(pos) => {
            list.remove(pos);
            true
        }
        Err(_) => false,
    }
}

impl HierarchyTree {
    // =========================================================================
    // Mutation (crate-internal: callers go through HierarchyIndex + txn)
    // =========================================================================

    /// Insert or relocate `pk` under `parent`. Idempotent when the declared
    /// parent is unchanged.
    pub(crate) fn add_node(&mut self, pk: PrimaryKey, parent: Option<PrimaryKey>) {
        match self.nodes.get(&pk).map(|slot| slot.parent) {
            Some(current) if current == parent => return,
            Some(_) => {
                self.unlink(pk);
                if let Some(slot) = self.nodes.get_mut(&pk) {
                    slot.parent = parent;
                }
            }
            None => {
                self.nodes.insert(
                    pk,
                    NodeSlot {
                        parent,
                        children: Vec::new(),
                        attached: false,
                    },
                );
            }
        }
        self.link_or_orphan(pk);
        self.adopt_awaiting(pk);
    }

    /// Remove `pk`, promoting its direct children to orphans awaiting `pk`.
    /// Descendants are never cascade-deleted. Returns whether `pk` existed.
    pub(crate) fn remove_node(&mut self, pk: PrimaryKey) -> bool {
        if !self.nodes.contains_key(&pk) {
            return false;
        }
        self.unlink(pk);
        let Some(slot) = self.nodes.remove(&pk) else {
            return false;
        };
        if slot.attached {
            self.attached_count -= 1;
        }
        for child in slot.children {
            insert_sorted(self.orphans.entry(pk).or_default(), child);
            self.set_subtree_attached(child, false);
        }
        true
    }

    /// Remove `pk` from whichever of the three locations holds it: the root
    /// list, its parent's child list, or the orphan registry.
    fn unlink(&mut self, pk: PrimaryKey) {
        let Some(slot) = self.nodes.get(&pk) else {
            return;
        };
        match slot.parent {
            None => {
                remove_sorted(&mut self.roots, pk);
            }
            Some(parent) => {
                let unlinked = match self.nodes.get_mut(&parent) {
                    Some(ps) => remove_sorted(&mut ps.children, pk),
                    None => false,
                };
                if !unlinked {
                    if let Some(waiting) = self.orphans.get_mut(&parent) {
                        remove_sorted(waiting, pk);
                        if waiting.is_empty() {
                            self.orphans.remove(&parent);
                        }
                    }
                }
            }
        }
    }

    /// Link `pk` under its declared parent, or register it as an orphan when
    /// the parent is absent or linking would close a cycle.
    fn link_or_orphan(&mut self, pk: PrimaryKey) {
        let Some(parent) = self.nodes.get(&pk).map(|s| s.parent) else {
            return;
        };
        match parent {
            None => {
                insert_sorted(&mut self.roots, pk);
                self.set_subtree_attached(pk, true);
            }
            Some(p) => {
                if self.nodes.contains_key(&p) && !self.would_cycle(pk, p) {
                    let parent_attached = self.nodes[&p].attached;
                    if let Some(ps) = self.nodes.get_mut(&p) {
                        insert_sorted(&mut ps.children, pk);
                    }
                    self.set_subtree_attached(pk, parent_attached);
                } else {
                    insert_sorted(self.orphans.entry(p).or_default(), pk);
                    self.set_subtree_attached(pk, false);
                }
            }
        }
    }

    /// Re-link every orphan awaiting `pk`. Called whenever `pk` is added or
    /// relocated — a relocation can break the cycle that kept a branch
    /// orphaned.
    fn adopt_awaiting(&mut self, pk: PrimaryKey) {
        if !self.nodes.contains_key(&pk) {
            return;
        }
        let Some(waiting) = self.orphans.remove(&pk) else {
            return;
        };
        let mut still_waiting = Vec::new();
        for orphan in waiting {
            if self.would_cycle(orphan, pk) {
                still_waiting.push(orphan);
                continue;
            }
            let parent_attached = self.nodes[&pk].attached;
            if let Some(slot) = self.nodes.get_mut(&pk) {
                insert_sorted(&mut slot.children, orphan);
            }
            self.set_subtree_attached(orphan, parent_attached);
        }
        if !still_waiting.is_empty() {
            self.orphans.insert(pk, still_waiting);
        }
    }

    /// Would linking `moving` under `candidate` make `moving` its own
    /// ancestor? Walks linked edges from `candidate` towards the root; the
    /// visited guard keeps the walk finite even on a damaged structure.
    fn would_cycle(&self, moving: PrimaryKey, candidate: PrimaryKey) -> bool {
        let mut visited = HashSet::new();
        let mut cur = candidate;
        loop {
            if cur == moving || !visited.insert(cur) {
                return true;
            }
            match self.linked_parent(cur) {
                Some(parent) => cur = parent,
                None => return false,
            }
        }
    }

    /// The parent `pk` is actually linked under, if any. Differs from the
    /// declared parent for orphan branch roots.
    fn linked_parent(&self, pk: PrimaryKey) -> Option<PrimaryKey> {
        let parent = self.nodes.get(&pk)?.parent?;
        let ps = self.nodes.get(&parent)?;
        ps.children.binary_search(&pk).ok().map(|_| parent)
    }

    /// Flip the attachment flag of `pk` and every linked descendant.
    fn set_subtree_attached(&mut self, pk: PrimaryKey, flag: bool) {
        let mut queue = VecDeque::from([pk]);
        let mut seen = HashSet::new();
        while let Some(cur) = queue.pop_front() {
            if !seen.insert(cur) {
                continue;
            }
            let Some(slot) = self.nodes.get_mut(&cur) else {
                continue;
            };
            if slot.attached != flag {
                slot.attached = flag;
                if flag {
                    self.attached_count += 1;
                } else {
                    self.attached_count -= 1;
                }
            }
            queue.extend(slot.children.iter().copied());
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn contains(&self, pk: PrimaryKey) -> bool {
        self.nodes.contains_key(&pk)
    }

    pub fn is_attached(&self, pk: PrimaryKey) -> bool {
        self.nodes.get(&pk).map_or(false, |s| s.attached)
    }

    /// Declared parent of `pk`: `None` if absent, `Some(None)` for a root.
    pub fn parent_of(&self, pk: PrimaryKey) -> Option<Option<PrimaryKey>> {
        self.nodes.get(&pk).map(|s| s.parent)
    }

    /// Linked children of `pk`, ascending. Independently re-derivable from
    /// parent declarations; the consistency check compares both.
    pub fn children_of(&self, pk: PrimaryKey) -> &[PrimaryKey] {
        self.nodes.get(&pk).map_or(&[], |s| s.children.as_slice())
    }

    /// Orphan branch roots awaiting `pk`, ascending.
    pub fn orphans_awaiting(&self, pk: PrimaryKey) -> &[PrimaryKey] {
        self.orphans.get(&pk).map_or(&[], |l| l.as_slice())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn attached_count(&self) -> usize {
        self.attached_count
    }

    pub fn orphan_count(&self) -> usize {
        self.nodes.len() - self.attached_count
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Every attached node, honoring the exclusion during traversal.
    pub fn all_nodes(&self, exclusion: &NodeExclusion) -> Bitmap {
        let mut result = Bitmap::new();
        self.traverse(
            TraversalOrder::BreadthFirst,
            SiblingOrder::Natural,
            exclusion,
            &mut |pk| {
                result.insert(pk);
            },
        );
        result
    }

    /// Attached top-level nodes.
    pub fn root_nodes(&self, exclusion: &NodeExclusion) -> Bitmap {
        self.roots
            .iter()
            .copied()
            .filter(|&pk| !exclusion.excludes(pk))
            .collect()
    }

    /// The subtree below `pk`, excluding `pk` itself. Empty for orphans —
    /// orphaned branches are invisible to traversal queries.
    pub fn nodes_from_parent(&self, pk: PrimaryKey, exclusion: &NodeExclusion) -> Result<Bitmap> {
        self.nodes_from_parent_down_to_level(pk, usize::MAX, exclusion)
    }

    /// The subtree rooted at `pk`, including `pk`.
    pub fn nodes_from_parent_including_self(
        &self,
        pk: PrimaryKey,
        exclusion: &NodeExclusion,
    ) -> Result<Bitmap> {
        let slot = self.nodes.get(&pk).ok_or(TaxonError::NodeNotFound(pk))?;
        if !slot.attached || exclusion.excludes(pk) {
            return Ok(Bitmap::new());
        }
        let mut result = self.nodes_from_parent(pk, exclusion)?;
        result.insert(pk);
        Ok(result)
    }

    /// The subtree below `pk` limited to `depth` levels (`1` = direct
    /// children only).
    pub fn nodes_from_parent_down_to_level(
        &self,
        pk: PrimaryKey,
        depth: usize,
        exclusion: &NodeExclusion,
    ) -> Result<Bitmap> {
        let slot = self.nodes.get(&pk).ok_or(TaxonError::NodeNotFound(pk))?;
        let mut result = Bitmap::new();
        if !slot.attached || exclusion.excludes(pk) {
            return Ok(result);
        }
        let mut queue: VecDeque<(PrimaryKey, usize)> =
            slot.children.iter().map(|&c| (c, 1)).collect();
        while let Some((cur, level)) = queue.pop_front() {
            if level > depth || exclusion.excludes(cur) {
                continue;
            }
            result.insert(cur);
            if let Some(cs) = self.nodes.get(&cur) {
                queue.extend(cs.children.iter().map(|&c| (c, level + 1)));
            }
        }
        Ok(result)
    }

    /// The path from the root down to `pk`, inclusive. Usage errors: `pk`
    /// absent, or an orphan with no root path.
    pub fn ancestors_of(&self, pk: PrimaryKey) -> Result<Vec<PrimaryKey>> {
        let slot = self.nodes.get(&pk).ok_or(TaxonError::NodeNotFound(pk))?;
        if !slot.attached {
            return Err(TaxonError::NodeNotAttached(pk));
        }
        let mut path = vec![pk];
        let mut cur = pk;
        while let Some(parent) = self.linked_parent(cur) {
            path.push(parent);
            cur = parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Every node not reachable from a root: orphan branch roots and their
    /// descendants.
    pub fn orphans(&self, exclusion: &NodeExclusion) -> Bitmap {
        self.nodes
            .iter()
            .filter(|(_, slot)| !slot.attached)
            .map(|(&pk, _)| pk)
            .filter(|&pk| !exclusion.excludes(pk))
            .collect()
    }

    /// Walk every attached node exactly once, in the requested order,
    /// skipping excluded subtrees without descending into them.
    pub fn traverse(
        &self,
        order: TraversalOrder,
        sibling: SiblingOrder,
        exclusion: &NodeExclusion,
        visit: &mut dyn FnMut(PrimaryKey),
    ) {
        match order {
            TraversalOrder::BreadthFirst => {
                let mut queue = VecDeque::new();
                self.enqueue_siblings(&self.roots, sibling, exclusion, |pk| queue.push_back(pk));
                let mut seen = HashSet::new();
                while let Some(cur) = queue.pop_front() {
                    if !seen.insert(cur) {
                        continue;
                    }
                    visit(cur);
                    if let Some(slot) = self.nodes.get(&cur) {
                        self.enqueue_siblings(&slot.children, sibling, exclusion, |pk| {
                            queue.push_back(pk)
                        });
                    }
                }
            }
            TraversalOrder::DepthFirst => {
                let mut stack = Vec::new();
                // Push reversed so pops come out in sibling order.
                self.enqueue_siblings(&self.roots, sibling.flip(), exclusion, |pk| stack.push(pk));
                let mut seen = HashSet::new();
                while let Some(cur) = stack.pop() {
                    if !seen.insert(cur) {
                        continue;
                    }
                    visit(cur);
                    if let Some(slot) = self.nodes.get(&cur) {
                        self.enqueue_siblings(&slot.children, sibling.flip(), exclusion, |pk| {
                            stack.push(pk)
                        });
                    }
                }
            }
        }
    }

    fn enqueue_siblings(
        &self,
        siblings: &[PrimaryKey],
        order: SiblingOrder,
        exclusion: &NodeExclusion,
        mut push: impl FnMut(PrimaryKey),
    ) {
        match order {
            SiblingOrder::Natural => {
                for &pk in siblings {
                    if !exclusion.excludes(pk) {
                        push(pk);
                    }
                }
            }
            SiblingOrder::Reversed => {
                for &pk in siblings.iter().rev() {
                    if !exclusion.excludes(pk) {
                        push(pk);
                    }
                }
            }
        }
    }
}

impl SiblingOrder {
    fn flip(self) -> Self {
        match self {
            SiblingOrder::Natural => SiblingOrder::Reversed,
            SiblingOrder::Reversed => SiblingOrder::Natural,
        }
    }
}

/// A single hierarchy mutation. The diff is an ordered op log: hierarchy
/// semantics (relocation, orphan adoption, cycle refusal) depend on the
/// order mutations arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierarchyOp {
    Add {
        pk: PrimaryKey,
        parent: Option<PrimaryKey>,
    },
    Remove {
        pk: PrimaryKey,
    },
}

/// Ordered log of a transaction's hierarchy mutations.
#[derive(Debug, Clone, Default)]
pub struct HierarchyDiff {
    ops: Vec<HierarchyOp>,
}

impl DiffLayer for HierarchyDiff {
    fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl TransactionalStore for HierarchyTree {
    type Op = HierarchyOp;
    type Diff = HierarchyDiff;

    fn record(diff: &mut HierarchyDiff, op: HierarchyOp) {
        diff.ops.push(op);
    }

    fn apply(&self, diff: &HierarchyDiff) -> HierarchyTree {
        let mut next = self.clone();
        for op in &diff.ops {
            match *op {
                HierarchyOp::Add { pk, parent } => next.add_node(pk, parent),
                HierarchyOp::Remove { pk } => {
                    // Validated against the transaction's view when recorded.
                    next.remove_node(pk);
                }
            }
        }
        next
    }

    fn verify(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for &root in &self.roots {
            match self.nodes.get(&root) {
                None => issues.push(format!("root {root} has no node slot")),
                Some(slot) if slot.parent.is_some() => {
                    issues.push(format!("root {root} declares a parent"))
                }
                _ => {}
            }
        }

        for (&pk, slot) in &self.nodes {
            for &child in &slot.children {
                match self.nodes.get(&child) {
                    None => issues.push(format!("child {child} of {pk} has no node slot")),
                    Some(cs) if cs.parent != Some(pk) => issues.push(format!(
                        "child {child} is linked under {pk} but declares {:?}",
                        cs.parent
                    )),
                    _ => {}
                }
            }
        }

        for (&awaited, waiting) in &self.orphans {
            for &orphan in waiting {
                match self.nodes.get(&orphan) {
                    None => issues.push(format!("orphan {orphan} has no node slot")),
                    Some(os) if os.parent != Some(awaited) => issues.push(format!(
                        "orphan {orphan} awaits {awaited} but declares {:?}",
                        os.parent
                    )),
                    Some(_) if self.linked_parent(orphan).is_some() => {
                        issues.push(format!("orphan {orphan} is also linked"))
                    }
                    _ => {}
                }
            }
        }

        // Reachability walk doubles as the cycle check: a linked cycle would
        // surface as a node enqueued through two different parents.
        let mut reached = HashSet::new();
        let mut queue: VecDeque<PrimaryKey> = self.roots.iter().copied().collect();
        while let Some(cur) = queue.pop_front() {
            if !reached.insert(cur) {
                issues.push(format!("node {cur} reachable twice (cycle or double link)"));
                continue;
            }
            if let Some(slot) = self.nodes.get(&cur) {
                queue.extend(slot.children.iter().copied());
            }
        }

        for (&pk, slot) in &self.nodes {
            if slot.attached != reached.contains(&pk) {
                issues.push(format!(
                    "node {pk} attached flag {} disagrees with reachability",
                    slot.attached
                ));
            }
            let as_root = slot.parent.is_none() && self.roots.binary_search(&pk).is_ok();
            let as_child = self.linked_parent(pk).is_some();
            let as_orphan = slot.parent.map_or(false, |p| {
                self.orphans
                    .get(&p)
                    .map_or(false, |l| l.binary_search(&pk).is_ok())
            });
            let locations = as_root as u8 + as_child as u8 + as_orphan as u8;
            if locations != 1 {
                issues.push(format!("node {pk} held in {locations} locations"));
            }
        }

        if self.attached_count != reached.len() {
            issues.push(format!(
                "attached count {} disagrees with reachability {}",
                self.attached_count,
                reached.len()
            ));
        }

        issues
    }
}

/// The public, transactional face of the hierarchy.
///
/// Mutations go through a [`Transaction`] and stay invisible to other
/// readers until committed; queries run against either the committed
/// snapshot or the transaction's own merged view.
pub struct HierarchyIndex {
    container: Arc<Transactional<HierarchyTree>>,
}

impl HierarchyIndex {
    pub fn new() -> Self {
        Self {
            container: Transactional::new(HierarchyTree::default()),
        }
    }

    pub fn id(&self) -> StructureId {
        self.container.id()
    }

    pub fn version(&self) -> StructureVersion {
        self.container.version()
    }

    /// Latest committed tree.
    pub fn snapshot(&self) -> Arc<HierarchyTree> {
        self.container.snapshot()
    }

    /// The tree as visible to `txn`, including its own pending writes.
    pub fn read(&self, txn: &Transaction) -> Arc<HierarchyTree> {
        self.container.read(txn)
    }

    /// Insert or relocate a node.
    pub fn add_node(
        &self,
        txn: &Transaction,
        pk: PrimaryKey,
        parent: Option<PrimaryKey>,
    ) -> Result<()> {
        self.container.mutate(txn, HierarchyOp::Add { pk, parent })
    }

    /// Remove a node, orphaning its children. Removing a node that is not
    /// present (in this transaction's view) is a usage error.
    pub fn remove_node(&self, txn: &Transaction, pk: PrimaryKey) -> Result<()> {
        if !self.container.read(txn).contains(pk) {
            return Err(TaxonError::NodeNotFound(pk));
        }
        self.container.mutate(txn, HierarchyOp::Remove { pk })
    }

    pub fn check_consistency(&self) -> ConsistencyReport {
        self.container.check_consistency()
    }
}

impl Default for HierarchyIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The reference tree used across the test suite:
    /// `6←{3←{1,2}, 8←{9←{10,11,12}}}, 7←{4,5←{0}}` (parent←children).
    fn reference_tree() -> HierarchyTree {
        let mut tree = HierarchyTree::default();
        // Deliberately out of order: children before parents.
        tree.add_node(9, Some(8));
        tree.add_node(10, Some(9));
        tree.add_node(11, Some(9));
        tree.add_node(12, Some(9));
        tree.add_node(6, None);
        tree.add_node(3, Some(6));
        tree.add_node(1, Some(3));
        tree.add_node(2, Some(3));
        tree.add_node(8, Some(6));
        tree.add_node(7, None);
        tree.add_node(4, Some(7));
        tree.add_node(5, Some(7));
        tree.add_node(0, Some(5));
        tree
    }

    fn keys(bitmap: &Bitmap) -> Vec<PrimaryKey> {
        bitmap.iter().collect()
    }

    #[test]
    fn test_reference_tree_shape() {
        let tree = reference_tree();
        assert!(tree.verify().is_empty());

        assert_eq!(keys(&tree.root_nodes(&NodeExclusion::None)), vec![6, 7]);
        assert_eq!(
            keys(&tree.nodes_from_parent(8, &NodeExclusion::None).unwrap()),
            vec![9, 10, 11, 12]
        );
        assert_eq!(
            keys(
                &tree
                    .nodes_from_parent_including_self(8, &NodeExclusion::None)
                    .unwrap()
            ),
            vec![8, 9, 10, 11, 12]
        );
        assert_eq!(tree.ancestors_of(12).unwrap(), vec![6, 8, 9, 12]);
        assert_eq!(tree.attached_count(), 13);
        assert_eq!(tree.orphan_count(), 0);
    }

    #[test]
    fn test_down_to_level() {
        let tree = reference_tree();
        assert_eq!(
            keys(
                &tree
                    .nodes_from_parent_down_to_level(6, 1, &NodeExclusion::None)
                    .unwrap()
            ),
            vec![3, 8]
        );
        assert_eq!(
            keys(
                &tree
                    .nodes_from_parent_down_to_level(6, 2, &NodeExclusion::None)
                    .unwrap()
            ),
            vec![1, 2, 3, 8, 9]
        );
    }

    #[test]
    fn test_usage_errors() {
        let tree = reference_tree();
        assert_eq!(
            tree.nodes_from_parent(99, &NodeExclusion::None).unwrap_err(),
            TaxonError::NodeNotFound(99)
        );
        assert_eq!(tree.ancestors_of(99).unwrap_err(), TaxonError::NodeNotFound(99));
    }

    #[test]
    fn test_remove_orphans_children() {
        let mut tree = reference_tree();
        assert!(tree.remove_node(9));

        assert_eq!(keys(&tree.orphans(&NodeExclusion::None)), vec![10, 11, 12]);
        assert_eq!(tree.orphans_awaiting(9), &[10, 11, 12]);
        assert_eq!(
            keys(
                &tree
                    .nodes_from_parent_including_self(8, &NodeExclusion::None)
                    .unwrap()
            ),
            vec![8]
        );
        // Orphans have no root path.
        assert_eq!(tree.ancestors_of(10).unwrap_err(), TaxonError::NodeNotAttached(10));
        assert!(tree.verify().is_empty());

        // Double remove reports "was not present".
        assert!(!tree.remove_node(9));
    }

    #[test]
    fn test_orphans_reattach_with_descendants() {
        let mut tree = reference_tree();
        tree.remove_node(9);

        // Re-adding 9 under a different parent relocates the whole branch.
        tree.add_node(9, Some(7));
        assert!(tree.verify().is_empty());
        assert_eq!(tree.orphan_count(), 0);
        assert_eq!(tree.ancestors_of(12).unwrap(), vec![7, 9, 12]);
        assert_eq!(
            keys(&tree.nodes_from_parent(7, &NodeExclusion::None).unwrap()),
            vec![0, 4, 5, 9, 10, 11, 12]
        );
    }

    #[test]
    fn test_relocation_is_idempotent() {
        let mut once = reference_tree();
        once.add_node(3, Some(7));

        let mut twice = reference_tree();
        twice.add_node(3, Some(7));
        twice.add_node(3, Some(7));

        assert_eq!(once, twice);
        assert!(twice.verify().is_empty());
    }

    #[test]
    fn test_cycle_refused_and_branch_orphaned() {
        let mut tree = reference_tree();
        // 9 is a descendant of 6: attaching 6 under 9 would close a cycle.
        tree.add_node(6, Some(9));

        assert!(tree.verify().is_empty());
        assert_eq!(keys(&tree.root_nodes(&NodeExclusion::None)), vec![7]);
        // Exactly the conflicting branch (6 and everything under it,
        // including 9's subtree) is orphaned.
        assert_eq!(
            keys(&tree.orphans(&NodeExclusion::None)),
            vec![1, 2, 3, 6, 8, 9, 10, 11, 12]
        );
        assert_eq!(tree.orphans_awaiting(9), &[6]);
    }

    #[test]
    fn test_cycle_resolves_after_relocation() {
        let mut tree = reference_tree();
        tree.add_node(6, Some(9)); // refused, branch orphaned

        // Moving 9 out of 6's branch makes the original request legal; the
        // orphaned branch is adopted automatically.
        tree.add_node(9, Some(7));
        assert!(tree.verify().is_empty());
        assert_eq!(tree.orphan_count(), 0);
        assert_eq!(tree.ancestors_of(6).unwrap(), vec![7, 9, 6]);
        assert_eq!(tree.ancestors_of(1).unwrap(), vec![7, 9, 6, 3, 1]);
    }

    #[test]
    fn test_self_parent_refused() {
        let mut tree = HierarchyTree::default();
        tree.add_node(1, Some(1));

        assert!(tree.verify().is_empty());
        assert_eq!(tree.orphan_count(), 1);
        assert_eq!(tree.orphans_awaiting(1), &[1]);
        assert!(tree.all_nodes(&NodeExclusion::None).is_empty());
    }

    #[test]
    fn test_exclusion_skips_whole_subtree() {
        let tree = reference_tree();
        let exclusion = NodeExclusion::Bitmap([8].into_iter().collect());

        assert_eq!(
            keys(&tree.all_nodes(&exclusion)),
            vec![0, 1, 2, 3, 4, 5, 6, 7]
        );

        // Predicate form, evaluated during traversal.
        let exclusion = NodeExclusion::Predicate(Box::new(|pk| pk == 3 || pk == 5));
        assert_eq!(keys(&tree.all_nodes(&exclusion)), vec![4, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_breadth_first_orders() {
        let tree = reference_tree();

        let mut visited = Vec::new();
        tree.traverse(
            TraversalOrder::BreadthFirst,
            SiblingOrder::Natural,
            &NodeExclusion::None,
            &mut |pk| visited.push(pk),
        );
        assert_eq!(visited, vec![6, 7, 3, 8, 4, 5, 1, 2, 9, 0, 10, 11, 12]);

        let mut visited = Vec::new();
        tree.traverse(
            TraversalOrder::BreadthFirst,
            SiblingOrder::Reversed,
            &NodeExclusion::None,
            &mut |pk| visited.push(pk),
        );
        assert_eq!(visited, vec![7, 6, 5, 4, 8, 3, 0, 9, 2, 1, 12, 11, 10]);
    }

    #[test]
    fn test_depth_first_orders() {
        let tree = reference_tree();

        let mut visited = Vec::new();
        tree.traverse(
            TraversalOrder::DepthFirst,
            SiblingOrder::Natural,
            &NodeExclusion::None,
            &mut |pk| visited.push(pk),
        );
        assert_eq!(visited, vec![6, 3, 1, 2, 8, 9, 10, 11, 12, 7, 4, 5, 0]);

        let mut visited = Vec::new();
        tree.traverse(
            TraversalOrder::DepthFirst,
            SiblingOrder::Reversed,
            &NodeExclusion::None,
            &mut |pk| visited.push(pk),
        );
        assert_eq!(visited, vec![7, 5, 0, 4, 6, 8, 9, 12, 11, 10, 3, 2, 1]);
    }

    #[test]
    fn test_transactional_isolation() {
        let index = HierarchyIndex::new();

        let txn = Transaction::begin();
        index.add_node(&txn, 1, None).unwrap();
        index.add_node(&txn, 2, Some(1)).unwrap();

        // Uncommitted writes are invisible to plain readers.
        assert_eq!(index.snapshot().node_count(), 0);
        // The writer sees its own view.
        assert_eq!(index.read(&txn).node_count(), 2);
        txn.commit().unwrap();
        assert_eq!(index.snapshot().node_count(), 2);

        // Rollback leaves the committed tree untouched.
        let before = index.snapshot();
        let txn = Transaction::begin();
        index.add_node(&txn, 3, Some(2)).unwrap();
        txn.rollback();
        assert_eq!(*index.snapshot(), *before);
        assert!(index.check_consistency().is_consistent());
    }

    #[test]
    fn test_remove_absent_node_is_usage_error() {
        let index = HierarchyIndex::new();
        let txn = Transaction::begin();
        assert_eq!(
            index.remove_node(&txn, 42).unwrap_err(),
            TaxonError::NodeNotFound(42)
        );
        // A node added in this same transaction is removable before commit.
        index.add_node(&txn, 42, None).unwrap();
        index.remove_node(&txn, 42).unwrap();
        txn.commit().unwrap();
        assert_eq!(index.snapshot().node_count(), 0);
    }

    #[test]
    fn test_generational_against_reference() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use std::collections::HashMap;

        let mut rng = StdRng::seed_from_u64(0xCA7A);
        let mut tree = HierarchyTree::default();
        // Externally maintained reference: declared parent per present key.
        let mut reference: HashMap<PrimaryKey, Option<PrimaryKey>> = HashMap::new();

        for round in 0..500 {
            let pk = rng.gen_range(0..40u32);
            if rng.gen_bool(0.75) {
                let parent = if rng.gen_bool(0.2) {
                    None
                } else {
                    Some(rng.gen_range(0..40u32))
                };
                tree.add_node(pk, parent);
                reference.insert(pk, parent);
            } else if tree.contains(pk) {
                tree.remove_node(pk);
                reference.remove(&pk);
            }

            let issues = tree.verify();
            assert!(issues.is_empty(), "round {round}: {issues:?}");

            // Membership matches the reference exactly.
            assert_eq!(tree.node_count(), reference.len());
            for (&key, &parent) in &reference {
                assert_eq!(tree.parent_of(key), Some(parent), "round {round}, key {key}");
            }

            // Attached ∪ orphans partitions the key space.
            let attached = tree.all_nodes(&NodeExclusion::None);
            let orphans = tree.orphans(&NodeExclusion::None);
            assert!(attached.and(&orphans).is_empty());
            assert_eq!(attached.len() + orphans.len(), reference.len());

            // Children lists re-derived from ancestor paths.
            for &key in reference.keys() {
                if let Ok(path) = tree.ancestors_of(key) {
                    for pair in path.windows(2) {
                        assert!(tree.children_of(pair[0]).contains(&pair[1]));
                    }
                }
            }
        }
    }
}
