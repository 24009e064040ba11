// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors

//! # BitmapSupplier — Deferred, Memoized Index Computations
//!
//! A [`BitmapSupplier`] is a unit of deferred computation bound to an index
//! snapshot. The formula algebra wraps suppliers in deferred leaves so that
//! an index is only actually walked if the surrounding boolean structure
//! still requires it after cost-based short-circuiting.
//!
//! ## Contract
//!
//! - [`estimated_cardinality`](BitmapSupplier::estimated_cardinality) is
//!   cheap and must *not* trigger the real computation; conjunctions use it
//!   to order operands cheapest-first.
//! - [`get`](BitmapSupplier::get) computes once and caches; repeated calls
//!   return the cached bitmap.
//! - [`constant_hash`](BitmapSupplier::constant_hash) identifies the
//!   computation structurally, so equivalent deferred leaves can share one
//!   result within a single query.
//! - [`source`](BitmapSupplier::source) names the transactional structure
//!   consulted (for dependency tracking) and the scope of the selection
//!   (for provably-safe formula pruning).
//!
//! A supplier's memoized result is valid only for the query execution it was
//! created for; suppliers are never reused across queries or transaction
//! boundaries, because the underlying structure may have advanced versions.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::{Bitmap, Result, StructureId};

/// How a supplier's record set relates to its structure's record universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupplierScope {
    /// The full record universe of the structure, with no exclusions.
    /// A conjoined selection from the same structure makes this redundant.
    Everything,
    /// A subset of the structure's record universe.
    Selection,
    /// Records *outside* the structure's record universe (e.g. orphan
    /// hierarchy nodes). Never a superset of a selection — never prunable.
    Complement,
}

/// Provenance of a supplier: which structure it consults and how its result
/// relates to that structure's universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupplierSource {
    /// The transactional structure consulted, if any. `None` for
    /// translator-supplied constant key sets.
    pub structure: Option<StructureId>,
    pub scope: SupplierScope,
}

impl SupplierSource {
    /// A selection over a transactional structure.
    pub fn selection(structure: StructureId) -> Self {
        Self {
            structure: Some(structure),
            scope: SupplierScope::Selection,
        }
    }

    /// The full universe of a transactional structure.
    pub fn everything(structure: StructureId) -> Self {
        Self {
            structure: Some(structure),
            scope: SupplierScope::Everything,
        }
    }

    /// Records outside the structure's universe.
    pub fn complement(structure: StructureId) -> Self {
        Self {
            structure: Some(structure),
            scope: SupplierScope::Complement,
        }
    }

    /// A constant key set with no structure behind it.
    pub fn constant() -> Self {
        Self {
            structure: None,
            scope: SupplierScope::Selection,
        }
    }
}

/// A deferred, memoized bitmap computation bound to an index snapshot.
pub trait BitmapSupplier {
    /// Cheap cardinality estimate. Must not force the computation.
    fn estimated_cardinality(&self) -> usize;

    /// Compute the bitmap, caching the result for repeated calls.
    fn get(&self) -> Result<Bitmap>;

    /// Structural identity of this computation within one query. A hash is
    /// an optimization hint, not a correctness authority — collisions are
    /// resolved by recomputation.
    fn constant_hash(&self) -> u64;

    /// The structure this computation consults and its selection scope.
    fn source(&self) -> SupplierSource;
}

/// A supplier wrapping a translator-supplied, precomputed key set
/// ("within these ids" constraints).
pub struct FixedBitmapSupplier {
    bitmap: Bitmap,
}

impl FixedBitmapSupplier {
    pub fn new(bitmap: Bitmap) -> Self {
        Self { bitmap }
    }
}

impl BitmapSupplier for FixedBitmapSupplier {
    fn estimated_cardinality(&self) -> usize {
        self.bitmap.len()
    }

    fn get(&self) -> Result<Bitmap> {
        Ok(self.bitmap.clone())
    }

    fn constant_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        0xF1u8.hash(&mut hasher);
        self.bitmap.hash(&mut hasher);
        hasher.finish()
    }

    fn source(&self) -> SupplierSource {
        SupplierSource::constant()
    }
}
