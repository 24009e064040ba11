// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors

//! The formula node: a lazy, memoized, cost-aware element of a boolean
//! expression tree over bitmaps.
//!
//! Formulas are created per query evaluation, are short-lived, and are
//! immutable once constructed — the result, hash, and cost fields are
//! write-once memoization slots, not free mutation. Computation order inside
//! a conjunction is driven by [`estimated_cost`](Formula::estimated_cost),
//! which never forces evaluation.

use std::cell::OnceCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use taxondb_core::{Bitmap, BitmapSupplier, Result, StructureId};

use crate::context::EvalContext;

/// The closed set of formula variants.
///
/// Kept as a tagged union with a single compute/hash/cost dispatch rather
/// than a trait-object hierarchy; a new operator is a new variant, visible
/// to every match in the crate.
pub enum FormulaKind {
    /// Leaf wrapping a precomputed bitmap supplied by the translator.
    Constant(Bitmap),
    /// Always computes to the empty bitmap. The safe identity value where a
    /// translator would otherwise reach for an Option.
    Empty,
    /// Intersection of all operands, cheapest estimate first.
    And(Vec<Formula>),
    /// Union of all operands. Nested unions are flattened at construction.
    Or(Vec<Formula>),
    /// `base` minus `excluded`. Carries the dependency ids of both sides.
    Not {
        base: Box<Formula>,
        excluded: Box<Formula>,
    },
    /// Defers to a [`BitmapSupplier`] bound to an index snapshot. This is
    /// the adapter point between the algebra and the indexes.
    Deferred(Box<dyn BitmapSupplier>),
}

/// A node in a boolean expression tree over bitmaps.
pub struct Formula {
    kind: FormulaKind,
    result: OnceCell<Bitmap>,
    hash: OnceCell<u64>,
    fingerprint: OnceCell<u64>,
    actual_cost: OnceCell<u64>,
}

impl Formula {
    fn from_kind(kind: FormulaKind) -> Self {
        Self {
            kind,
            result: OnceCell::new(),
            hash: OnceCell::new(),
            fingerprint: OnceCell::new(),
            actual_cost: OnceCell::new(),
        }
    }

    /// Leaf wrapping a precomputed bitmap.
    pub fn constant(bitmap: Bitmap) -> Self {
        Self::from_kind(FormulaKind::Constant(bitmap))
    }

    /// The empty-set leaf.
    pub fn empty() -> Self {
        Self::from_kind(FormulaKind::Empty)
    }

    /// Conjunction of the operands.
    pub fn and(operands: Vec<Formula>) -> Self {
        Self::from_kind(FormulaKind::And(operands))
    }

    /// Disjunction of the operands. Nested disjunctions are flattened here
    /// so evaluation unions one flat operand list instead of allocating
    /// intermediate bitmaps per nesting level.
    pub fn or(operands: Vec<Formula>) -> Self {
        let mut flat = Vec::with_capacity(operands.len());
        for operand in operands {
            match operand.kind {
                FormulaKind::Or(inner) => flat.extend(inner),
                _ => flat.push(operand),
            }
        }
        Self::from_kind(FormulaKind::Or(flat))
    }

    /// `base` with `excluded` removed.
    pub fn not(base: Formula, excluded: Formula) -> Self {
        Self::from_kind(FormulaKind::Not {
            base: Box::new(base),
            excluded: Box::new(excluded),
        })
    }

    /// Leaf deferring to an index-backed supplier.
    pub fn deferred(supplier: Box<dyn BitmapSupplier>) -> Self {
        Self::from_kind(FormulaKind::Deferred(supplier))
    }

    pub fn kind(&self) -> &FormulaKind {
        &self.kind
    }

    pub(crate) fn into_kind(self) -> FormulaKind {
        self.kind
    }

    pub(crate) fn rebuild(kind: FormulaKind) -> Self {
        Self::from_kind(kind)
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluate with a fresh single-query context.
    pub fn evaluate(&self) -> Result<Bitmap> {
        self.compute(&mut EvalContext::new())
    }

    /// Evaluate this node, memoizing per node and per query.
    ///
    /// The per-query memo is keyed by the structural hash with a fingerprint
    /// cross-check: a colliding hash whose fingerprint disagrees is treated
    /// as "not equal" and recomputed — always safe, every operation is pure.
    pub fn compute(&self, ctx: &mut EvalContext) -> Result<Bitmap> {
        if let Some(cached) = self.result.get() {
            return Ok(cached.clone());
        }

        let hash = self.hash();
        let fingerprint = self.fingerprint();
        if let Some(shared) = ctx.lookup(hash, fingerprint) {
            let _ = self.actual_cost.set(shared.len() as u64);
            let _ = self.result.set(shared.clone());
            return Ok(shared);
        }

        let computed = self.compute_uncached(ctx)?;

        let operand_cost: u64 = match &self.kind {
            FormulaKind::And(ops) | FormulaKind::Or(ops) => {
                ops.iter().filter_map(|f| f.actual_cost()).sum()
            }
            FormulaKind::Not { base, excluded } => base
                .actual_cost()
                .into_iter()
                .chain(excluded.actual_cost())
                .sum(),
            _ => 0,
        };
        let _ = self.actual_cost.set(operand_cost + computed.len() as u64);

        ctx.store(hash, fingerprint, computed.clone());
        let _ = self.result.set(computed.clone());
        Ok(computed)
    }

    fn compute_uncached(&self, ctx: &mut EvalContext) -> Result<Bitmap> {
        match &self.kind {
            FormulaKind::Constant(bitmap) => Ok(bitmap.clone()),
            FormulaKind::Empty => Ok(Bitmap::new()),
            FormulaKind::And(operands) => {
                // Cheapest estimate first: an empty intermediate result
                // short-circuits every remaining operand unevaluated.
                let mut order: Vec<&Formula> = operands.iter().collect();
                order.sort_by_key(|f| f.estimated_cost());

                let Some(first) = order.first() else {
                    return Ok(Bitmap::new());
                };
                let mut acc = first.compute(ctx)?;
                for operand in &order[1..] {
                    if acc.is_empty() {
                        break;
                    }
                    acc = acc.and(&operand.compute(ctx)?);
                }
                Ok(acc)
            }
            FormulaKind::Or(operands) => {
                let mut acc = Bitmap::new();
                for operand in operands {
                    acc = acc.or(&operand.compute(ctx)?);
                }
                Ok(acc)
            }
            FormulaKind::Not { base, excluded } => {
                let base = base.compute(ctx)?;
                if base.is_empty() {
                    return Ok(base);
                }
                Ok(base.and_not(&excluded.compute(ctx)?))
            }
            FormulaKind::Deferred(supplier) => supplier.get(),
        }
    }

    // =========================================================================
    // Cost
    // =========================================================================

    /// Cheap cost estimate, computable without forcing [`compute`]. Used for
    /// operand ordering and by tree-rewriting callers.
    pub fn estimated_cost(&self) -> u64 {
        match &self.kind {
            FormulaKind::Constant(bitmap) => bitmap.len() as u64,
            FormulaKind::Empty => 0,
            FormulaKind::And(ops) | FormulaKind::Or(ops) => {
                ops.iter().map(Formula::estimated_cost).sum()
            }
            FormulaKind::Not { base, excluded } => {
                base.estimated_cost() + excluded.estimated_cost()
            }
            FormulaKind::Deferred(supplier) => supplier.estimated_cardinality() as u64,
        }
    }

    /// The measured cost, available only after [`compute`] has run.
    pub fn actual_cost(&self) -> Option<u64> {
        self.actual_cost.get().copied()
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Structural hash: operator tag, operand hashes (order-insensitive for
    /// the commutative operators), and leaf parameters. Equivalent subtrees
    /// hash identically within one query, letting the evaluator reuse an
    /// already-computed result.
    pub fn hash(&self) -> u64 {
        *self.hash.get_or_init(|| self.hash_with_seed(0x7A_58))
    }

    /// Independent second hash used to cross-check memo hits. Collisions on
    /// both channels at once are not defended against — the memo is an
    /// optimization hint, and disagreement already falls back to recompute.
    pub(crate) fn fingerprint(&self) -> u64 {
        *self
            .fingerprint
            .get_or_init(|| self.hash_with_seed(0xC3_1F))
    }

    fn hash_with_seed(&self, seed: u64) -> u64 {
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        match &self.kind {
            FormulaKind::Constant(bitmap) => {
                1u8.hash(&mut hasher);
                bitmap.hash(&mut hasher);
            }
            FormulaKind::Empty => 2u8.hash(&mut hasher),
            FormulaKind::And(ops) => {
                3u8.hash(&mut hasher);
                let mut hashes: Vec<u64> =
                    ops.iter().map(|f| f.hash_with_seed(seed)).collect();
                hashes.sort_unstable();
                hashes.hash(&mut hasher);
            }
            FormulaKind::Or(ops) => {
                4u8.hash(&mut hasher);
                let mut hashes: Vec<u64> =
                    ops.iter().map(|f| f.hash_with_seed(seed)).collect();
                hashes.sort_unstable();
                hashes.hash(&mut hasher);
            }
            FormulaKind::Not { base, excluded } => {
                5u8.hash(&mut hasher);
                base.hash_with_seed(seed).hash(&mut hasher);
                excluded.hash_with_seed(seed).hash(&mut hasher);
            }
            FormulaKind::Deferred(supplier) => {
                6u8.hash(&mut hasher);
                supplier.constant_hash().hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    /// The ids of every transactional structure this formula consults.
    /// Cached formula results are valid only while those structures remain
    /// at the versions they were read at.
    pub fn dependency_ids(&self) -> BTreeSet<StructureId> {
        let mut ids = BTreeSet::new();
        self.collect_dependency_ids(&mut ids);
        ids
    }

    fn collect_dependency_ids(&self, ids: &mut BTreeSet<StructureId>) {
        match &self.kind {
            FormulaKind::Constant(_) | FormulaKind::Empty => {}
            FormulaKind::And(ops) | FormulaKind::Or(ops) => {
                for op in ops {
                    op.collect_dependency_ids(ids);
                }
            }
            FormulaKind::Not { base, excluded } => {
                base.collect_dependency_ids(ids);
                excluded.collect_dependency_ids(ids);
            }
            FormulaKind::Deferred(supplier) => {
                if let Some(structure) = supplier.source().structure {
                    ids.insert(structure);
                }
            }
        }
    }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FormulaKind::Constant(bitmap) => write!(f, "Constant({bitmap})"),
            FormulaKind::Empty => write!(f, "Empty"),
            FormulaKind::And(ops) => write!(f, "And[{}]", ops.len()),
            FormulaKind::Or(ops) => write!(f, "Or[{}]", ops.len()),
            FormulaKind::Not { .. } => write!(f, "Not"),
            FormulaKind::Deferred(supplier) => {
                write!(f, "Deferred(est={})", supplier.estimated_cardinality())
            }
        }
    }
}
