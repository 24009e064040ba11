// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors

//! Single-query evaluation context.
//!
//! Holds the memo table that lets structurally equivalent subtrees share one
//! computed bitmap within a query. The context lives exactly as long as one
//! query execution: results memoized here must never leak across queries or
//! transaction boundaries, because the underlying structures may have
//! advanced versions in between.

use std::collections::HashMap;

use taxondb_core::Bitmap;

struct MemoEntry {
    fingerprint: u64,
    bitmap: Bitmap,
}

/// Counters describing how a query evaluation went. Exposed for tests and
/// diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalStats {
    /// Subtree results served from the memo table.
    pub memo_hits: usize,
    /// Subtree results computed fresh.
    pub memo_misses: usize,
    /// Hash hits rejected by the fingerprint cross-check and recomputed.
    pub collisions: usize,
}

/// Per-query evaluation state: the hash-keyed memo table.
#[derive(Default)]
pub struct EvalContext {
    memo: HashMap<u64, MemoEntry>,
    stats: EvalStats,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> EvalStats {
        self.stats
    }

    /// Look up a previously computed subtree result. A matching hash with a
    /// disagreeing fingerprint counts as a collision and misses — the hash
    /// is a hint, recomputation is always safe.
    pub(crate) fn lookup(&mut self, hash: u64, fingerprint: u64) -> Option<Bitmap> {
        match self.memo.get(&hash) {
            Some(entry) if entry.fingerprint == fingerprint => {
                self.stats.memo_hits += 1;
                Some(entry.bitmap.clone())
            }
            Some(_) => {
                self.stats.collisions += 1;
                None
            }
            None => {
                self.stats.memo_misses += 1;
                None
            }
        }
    }

    /// Store a computed subtree result. An occupied slot is left alone: the
    /// first result wins, a colliding later subtree simply stays uncached.
    pub(crate) fn store(&mut self, hash: u64, fingerprint: u64, bitmap: Bitmap) {
        self.memo.entry(hash).or_insert(MemoEntry {
            fingerprint,
            bitmap,
        });
    }
}
