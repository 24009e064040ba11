// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors

//! # Supplier Adapters — Index-Backed Formula Leaves
//!
//! Each supplier binds one index snapshot to one query shape (a *scope*) and
//! hands the pair to the formula algebra as a deferred leaf. The index is
//! only walked when the surrounding boolean structure actually demands the
//! leaf's bitmap; cheaper operands evaluating to the empty set short-circuit
//! it away entirely.
//!
//! Suppliers are created per query and die with it. Their cardinality
//! estimates come from snapshot counters — never from running the query —
//! and their structural hashes include the structure id *and version*, so
//! leaves over different committed states can never be conflated by the
//! per-query memo.

use std::cell::OnceCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use taxondb_core::{
    Bitmap, BitmapSupplier, PrimaryKey, Result, StructureId, StructureVersion, SupplierSource,
};
use taxondb_query::Formula;
use taxondb_storage::Transaction;

use crate::hierarchy::{HierarchyIndex, HierarchyTree, NodeExclusion};
use crate::inverted::{IndexValue, InvertedIndex, ValueIndex};

/// Rough ancestor-path length used as the cardinality estimate for
/// to-root queries; catalog trees are shallow and the real depth is not
/// known without walking.
const TYPICAL_DEPTH: usize = 8;

// =============================================================================
// Hierarchy Suppliers
// =============================================================================

/// The query shapes the hierarchy index can answer as a formula leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HierarchyScope {
    /// Every attached node.
    AllNodes,
    /// Attached top-level nodes.
    RootNodes,
    /// The subtree of `parent`.
    Subtree {
        parent: PrimaryKey,
        including_self: bool,
    },
    /// The subtree of `parent`, at most `depth` levels deep.
    SubtreeToLevel { parent: PrimaryKey, depth: usize },
    /// The root→self path of `pk`.
    Ancestors { pk: PrimaryKey },
    /// Every node *not* reachable from a root.
    Orphans,
}

struct HierarchySupplier {
    view: Arc<HierarchyTree>,
    structure: StructureId,
    version: StructureVersion,
    scope: HierarchyScope,
    exclusion: NodeExclusion,
    /// Set for predicate exclusions: the closure is opaque, so the supplier
    /// gets a unique hash and is never deduplicated against another leaf.
    opaque: Option<u64>,
    cache: OnceCell<Bitmap>,
}

fn next_opaque() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

impl BitmapSupplier for HierarchySupplier {
    fn estimated_cardinality(&self) -> usize {
        match self.scope {
            HierarchyScope::AllNodes => self.view.attached_count(),
            HierarchyScope::RootNodes => self.view.root_count(),
            // Subtree sizes are unknown without walking; the attached total
            // is the cheap upper bound.
            HierarchyScope::Subtree { .. } | HierarchyScope::SubtreeToLevel { .. } => {
                self.view.attached_count()
            }
            HierarchyScope::Ancestors { .. } => TYPICAL_DEPTH,
            HierarchyScope::Orphans => self.view.orphan_count(),
        }
    }

    fn get(&self) -> Result<Bitmap> {
        if let Some(cached) = self.cache.get() {
            return Ok(cached.clone());
        }
        trace!(structure = %self.structure, scope = ?self.scope, "walking hierarchy for deferred leaf");
        let computed = match self.scope {
            HierarchyScope::AllNodes => self.view.all_nodes(&self.exclusion),
            HierarchyScope::RootNodes => self.view.root_nodes(&self.exclusion),
            HierarchyScope::Subtree {
                parent,
                including_self,
            } => {
                if including_self {
                    self.view
                        .nodes_from_parent_including_self(parent, &self.exclusion)?
                } else {
                    self.view.nodes_from_parent(parent, &self.exclusion)?
                }
            }
            HierarchyScope::SubtreeToLevel { parent, depth } => {
                self.view
                    .nodes_from_parent_down_to_level(parent, depth, &self.exclusion)?
            }
            HierarchyScope::Ancestors { pk } => {
                self.view.ancestors_of(pk)?.into_iter().collect()
            }
            HierarchyScope::Orphans => self.view.orphans(&self.exclusion),
        };
        Ok(self.cache.get_or_init(|| computed).clone())
    }

    fn constant_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.structure.hash(&mut hasher);
        self.version.hash(&mut hasher);
        self.scope.hash(&mut hasher);
        match (&self.exclusion, self.opaque) {
            (NodeExclusion::None, _) => 0u8.hash(&mut hasher),
            (NodeExclusion::Bitmap(bitmap), _) => {
                1u8.hash(&mut hasher);
                bitmap.hash(&mut hasher);
            }
            (NodeExclusion::Predicate(_), nonce) => {
                2u8.hash(&mut hasher);
                nonce.hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    fn source(&self) -> SupplierSource {
        match (self.scope, &self.exclusion) {
            (HierarchyScope::AllNodes, NodeExclusion::None) => {
                SupplierSource::everything(self.structure)
            }
            (HierarchyScope::Orphans, _) => SupplierSource::complement(self.structure),
            _ => SupplierSource::selection(self.structure),
        }
    }
}

impl HierarchyIndex {
    /// A deferred formula leaf for `scope`, bound to the committed snapshot
    /// (`txn: None`) or to a transaction's own view.
    pub fn formula(
        &self,
        txn: Option<&Transaction>,
        scope: HierarchyScope,
        exclusion: NodeExclusion,
    ) -> Formula {
        let view = match txn {
            Some(txn) => self.read(txn),
            None => self.snapshot(),
        };
        let opaque = matches!(exclusion, NodeExclusion::Predicate(_)).then(next_opaque);
        Formula::deferred(Box::new(HierarchySupplier {
            view,
            structure: self.id(),
            version: self.version(),
            scope,
            exclusion,
            opaque,
            cache: OnceCell::new(),
        }))
    }

    pub fn all_nodes_formula(&self) -> Formula {
        self.formula(None, HierarchyScope::AllNodes, NodeExclusion::None)
    }

    pub fn root_nodes_formula(&self) -> Formula {
        self.formula(None, HierarchyScope::RootNodes, NodeExclusion::None)
    }

    pub fn subtree_formula(&self, parent: PrimaryKey, including_self: bool) -> Formula {
        self.formula(
            None,
            HierarchyScope::Subtree {
                parent,
                including_self,
            },
            NodeExclusion::None,
        )
    }

    pub fn ancestors_formula(&self, pk: PrimaryKey) -> Formula {
        self.formula(None, HierarchyScope::Ancestors { pk }, NodeExclusion::None)
    }

    pub fn orphans_formula(&self) -> Formula {
        self.formula(None, HierarchyScope::Orphans, NodeExclusion::None)
    }
}

// =============================================================================
// Inverted Suppliers
// =============================================================================

/// The query shapes the inverted index can answer as a formula leaf.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueScope<V> {
    /// Every indexed record.
    AllRecords,
    /// Records holding exactly this value.
    Equals(V),
    /// Records in the inclusive range; `None` bounds are unbounded.
    Between {
        lower: Option<V>,
        upper: Option<V>,
    },
}

struct InvertedSupplier<V: IndexValue> {
    view: Arc<ValueIndex<V>>,
    structure: StructureId,
    version: StructureVersion,
    scope: ValueScope<V>,
    cache: OnceCell<Bitmap>,
}

impl<V: IndexValue> BitmapSupplier for InvertedSupplier<V> {
    fn estimated_cardinality(&self) -> usize {
        match &self.scope {
            ValueScope::AllRecords => self.view.record_count(),
            ValueScope::Equals(value) => self.view.cardinality_of(value),
            ValueScope::Between { lower, upper } => self
                .view
                .count_records_between(lower.as_ref(), upper.as_ref()),
        }
    }

    fn get(&self) -> Result<Bitmap> {
        Ok(self
            .cache
            .get_or_init(|| {
                trace!(structure = %self.structure, "materializing inverted-index leaf");
                match &self.scope {
                    ValueScope::AllRecords => self.view.all_records(),
                    ValueScope::Equals(value) => self.view.records_for_value(value),
                    ValueScope::Between { lower, upper } => self
                        .view
                        .sorted_records_between(lower.as_ref(), upper.as_ref())
                        .bitmap(),
                }
            })
            .clone())
    }

    fn constant_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.structure.hash(&mut hasher);
        self.version.hash(&mut hasher);
        self.scope.hash(&mut hasher);
        hasher.finish()
    }

    fn source(&self) -> SupplierSource {
        match self.scope {
            ValueScope::AllRecords => SupplierSource::everything(self.structure),
            _ => SupplierSource::selection(self.structure),
        }
    }
}

impl<V: IndexValue> InvertedIndex<V> {
    /// A deferred formula leaf for `scope`, bound to the committed snapshot
    /// (`txn: None`) or to a transaction's own view.
    pub fn formula(&self, txn: Option<&Transaction>, scope: ValueScope<V>) -> Formula {
        let view = match txn {
            Some(txn) => self.read(txn),
            None => self.snapshot(),
        };
        Formula::deferred(Box::new(InvertedSupplier {
            view,
            structure: self.id(),
            version: self.version(),
            scope,
            cache: OnceCell::new(),
        }))
    }

    pub fn equals_formula(&self, value: V) -> Formula {
        self.formula(None, ValueScope::Equals(value))
    }

    pub fn between_formula(&self, lower: Option<V>, upper: Option<V>) -> Formula {
        self.formula(None, ValueScope::Between { lower, upper })
    }

    pub fn all_records_formula(&self) -> Formula {
        self.formula(None, ValueScope::AllRecords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxondb_core::SupplierScope;

    fn sample_hierarchy() -> HierarchyIndex {
        let index = HierarchyIndex::new();
        let txn = Transaction::begin();
        for (pk, parent) in [
            (1, None),
            (2, Some(1)),
            (3, Some(1)),
            (4, Some(2)),
            (5, Some(2)),
            (9, Some(100)), // orphan: 100 never arrives
        ] {
            index.add_node(&txn, pk, parent).unwrap();
        }
        txn.commit().unwrap();
        index
    }

    fn sample_inverted() -> InvertedIndex<i64> {
        let index = InvertedIndex::new();
        let txn = Transaction::begin();
        for (value, pk) in [(10, 2), (10, 4), (20, 3), (30, 5)] {
            index.add_record(&txn, value, pk).unwrap();
        }
        txn.commit().unwrap();
        index
    }

    fn keys(bitmap: &Bitmap) -> Vec<PrimaryKey> {
        bitmap.iter().collect()
    }

    #[test]
    fn test_hierarchy_formulas_match_direct_queries() {
        let index = sample_hierarchy();
        let snapshot = index.snapshot();

        assert_eq!(
            index.all_nodes_formula().evaluate().unwrap(),
            snapshot.all_nodes(&NodeExclusion::None)
        );
        assert_eq!(
            keys(&index.subtree_formula(2, true).evaluate().unwrap()),
            vec![2, 4, 5]
        );
        assert_eq!(
            keys(&index.ancestors_formula(4).evaluate().unwrap()),
            vec![1, 2, 4]
        );
        assert_eq!(keys(&index.orphans_formula().evaluate().unwrap()), vec![9]);
    }

    #[test]
    fn test_inverted_formulas_match_direct_queries() {
        let index = sample_inverted();

        assert_eq!(
            keys(&index.equals_formula(10).evaluate().unwrap()),
            vec![2, 4]
        );
        assert_eq!(
            keys(
                &index
                    .between_formula(Some(15), Some(30))
                    .evaluate()
                    .unwrap()
            ),
            vec![3, 5]
        );
        assert_eq!(
            keys(&index.all_records_formula().evaluate().unwrap()),
            vec![2, 3, 4, 5]
        );
    }

    #[test]
    fn test_estimates_are_cheap_counters() {
        let hierarchy = sample_hierarchy();
        let formula = hierarchy.all_nodes_formula();
        assert_eq!(formula.estimated_cost(), 5); // attached count, not a walk

        let inverted = sample_inverted();
        assert_eq!(inverted.equals_formula(10).estimated_cost(), 2);
        assert_eq!(
            inverted.between_formula(Some(10), Some(20)).estimated_cost(),
            3
        );
        assert_eq!(inverted.all_records_formula().estimated_cost(), 4);
    }

    #[test]
    fn test_scopes_for_pruning() {
        let hierarchy = sample_hierarchy();

        let all = hierarchy.all_nodes_formula();
        let orphans = hierarchy.orphans_formula();
        let subtree = hierarchy.subtree_formula(2, false);

        let scope_of = |f: &Formula| match f.kind() {
            taxondb_query::FormulaKind::Deferred(s) => s.source().scope,
            _ => panic!("expected deferred leaf"),
        };
        assert_eq!(scope_of(&all), SupplierScope::Everything);
        assert_eq!(scope_of(&orphans), SupplierScope::Complement);
        assert_eq!(scope_of(&subtree), SupplierScope::Selection);

        // An excluded all-nodes leaf is no longer the full universe.
        let excluded = hierarchy.formula(
            None,
            HierarchyScope::AllNodes,
            NodeExclusion::Bitmap([2].into_iter().collect()),
        );
        assert_eq!(scope_of(&excluded), SupplierScope::Selection);
    }

    #[test]
    fn test_hash_changes_with_version() {
        let index = sample_inverted();
        let before = index.equals_formula(10);

        let txn = Transaction::begin();
        index.add_record(&txn, 10i64, 7).unwrap();
        txn.commit().unwrap();

        let after = index.equals_formula(10);
        assert_ne!(before.hash(), after.hash());

        // Same version, same scope: identical hash.
        assert_eq!(after.hash(), index.equals_formula(10).hash());
    }

    #[test]
    fn test_predicate_exclusions_never_share() {
        let index = sample_hierarchy();
        let make = || {
            index.formula(
                None,
                HierarchyScope::AllNodes,
                NodeExclusion::Predicate(Box::new(|pk| pk > 3)),
            )
        };
        assert_ne!(make().hash(), make().hash());
    }

    #[test]
    fn test_usage_error_propagates_through_formula() {
        let index = sample_hierarchy();
        let err = index.subtree_formula(777, false).evaluate().unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_txn_view_formula_sees_pending_writes() {
        let index = sample_inverted();
        let txn = Transaction::begin();
        index.add_record(&txn, 10i64, 8).unwrap();

        let committed = index.equals_formula(10).evaluate().unwrap();
        assert_eq!(keys(&committed), vec![2, 4]);

        let own_view = index
            .formula(Some(&txn), ValueScope::Equals(10))
            .evaluate()
            .unwrap();
        assert_eq!(keys(&own_view), vec![2, 4, 8]);
        txn.rollback();
    }
}
