// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors

//! The generic transactional container: an immutable committed snapshot plus
//! at most one pending per-transaction diff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use taxondb_core::{Result, StructureId, StructureVersion, TaxonError};

use crate::consistency::ConsistencyReport;
use crate::transaction::{Transaction, TransactionalUnit, TxnId};

/// A per-transaction overlay of pending mutations.
pub trait DiffLayer: Default + Send {
    /// Whether the overlay records no effective change.
    fn is_empty(&self) -> bool;
}

/// A structure that can live inside a [`Transactional`] container.
///
/// The committed value is immutable; mutations are recorded as `Op`s into a
/// `Diff` overlay and folded into a fresh value on commit (or on demand, for
/// the writing transaction's own reads).
pub trait TransactionalStore: Clone + Send + Sync + 'static {
    /// A single mutation.
    type Op;
    /// The overlay accumulating this transaction's mutations.
    type Diff: DiffLayer;

    /// Record one mutation into the overlay.
    fn record(diff: &mut Self::Diff, op: Self::Op);

    /// Fold the overlay into a new value. The receiver is not modified.
    fn apply(&self, diff: &Self::Diff) -> Self;

    /// Internal-consistency issues of this value, empty when sound.
    fn verify(&self) -> Vec<String>;
}

struct Pending<S: TransactionalStore> {
    owner: TxnId,
    diff: S::Diff,
    /// Cached base ⊕ diff for the owner's reads; dropped on every mutation.
    merged: Option<Arc<S>>,
}

/// Transactional wrapper around an immutable structure.
///
/// Readers share the committed `Arc` and never block each other; the single
/// writing transaction accumulates a private diff and sees `base ⊕ diff`
/// through [`read`](Transactional::read). Commit atomically swaps in the
/// folded value and bumps the monotonic version id that the external
/// WAL/storage layer keys its snapshots on.
pub struct Transactional<S: TransactionalStore> {
    id: StructureId,
    version: AtomicU64,
    committed: RwLock<Arc<S>>,
    pending: Mutex<Option<Pending<S>>>,
    /// Self-handle for enlisting into transactions as a trait object.
    me: Weak<Transactional<S>>,
}

impl<S: TransactionalStore> Transactional<S> {
    /// Wrap an initial committed value (version 1).
    pub fn new(initial: S) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: StructureId::fresh(),
            version: AtomicU64::new(1),
            committed: RwLock::new(Arc::new(initial)),
            pending: Mutex::new(None),
            me: me.clone(),
        })
    }

    pub fn id(&self) -> StructureId {
        self.id
    }

    /// Version of the latest committed value. Strictly increasing across
    /// commits; unchanged by rollbacks.
    pub fn version(&self) -> StructureVersion {
        self.version.load(Ordering::Acquire)
    }

    /// The latest committed value. Never includes pending diffs.
    pub fn snapshot(&self) -> Arc<S> {
        self.committed.read().clone()
    }

    /// The value visible to `txn`: the committed base merged with the
    /// transaction's own pending diff (computed on demand and cached until
    /// the next mutation), or the plain base for transactions without
    /// pending writes here.
    pub fn read(&self, txn: &Transaction) -> Arc<S> {
        let mut pending = self.pending.lock();
        if let Some(p) = pending.as_mut() {
            if p.owner == txn.id() && !p.diff.is_empty() {
                let Pending { diff, merged, .. } = p;
                return merged
                    .get_or_insert_with(|| {
                        let base = self.committed.read().clone();
                        Arc::new(base.apply(diff))
                    })
                    .clone();
            }
        }
        drop(pending);
        self.snapshot()
    }

    /// Record a mutation into `txn`'s diff. The shared base is untouched;
    /// other readers cannot observe the change until commit. A container
    /// with a pending diff from a different transaction rejects the write.
    pub fn mutate(&self, txn: &Transaction, op: S::Op) -> Result<()> {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(p) if p.owner != txn.id() => Err(TaxonError::WriterConflict {
                structure: self.id,
                holder: p.owner,
            }),
            Some(p) => {
                S::record(&mut p.diff, op);
                p.merged = None;
                Ok(())
            }
            None => {
                let mut diff = S::Diff::default();
                S::record(&mut diff, op);
                *pending = Some(Pending {
                    owner: txn.id(),
                    diff,
                    merged: None,
                });
                drop(pending);
                if let Some(me) = self.me.upgrade() {
                    txn.enlist(me as Arc<dyn TransactionalUnit>);
                }
                Ok(())
            }
        }
    }

    /// Run the read-only consistency check against the committed value.
    pub fn check_consistency(&self) -> ConsistencyReport {
        ConsistencyReport {
            structure: self.id,
            version: self.version(),
            issues: self.snapshot().verify(),
        }
    }
}

impl<S: TransactionalStore> TransactionalUnit for Transactional<S> {
    fn structure_id(&self) -> StructureId {
        self.id
    }

    fn commit_txn(&self, txn: TxnId) -> Result<()> {
        let taken = self.pending.lock().take();
        match taken {
            None => Ok(()),
            Some(p) if p.owner != txn => {
                let holder = p.owner;
                *self.pending.lock() = Some(p);
                Err(TaxonError::WriterConflict {
                    structure: self.id,
                    holder,
                })
            }
            Some(p) => {
                let new_base = match p.merged {
                    Some(merged) => merged,
                    None => {
                        let base = self.committed.read().clone();
                        Arc::new(base.apply(&p.diff))
                    }
                };
                *self.committed.write() = new_base;
                let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(structure = %self.id, version, "published new committed version");
                Ok(())
            }
        }
    }

    fn rollback_txn(&self, txn: TxnId) {
        let mut pending = self.pending.lock();
        if pending.as_ref().map(|p| p.owner) == Some(txn) {
            *pending = None;
            debug!(structure = %self.id, txn, "pending diff discarded");
        }
    }
}

impl<S: TransactionalStore> std::fmt::Debug for Transactional<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Transactional(id={}, version={}, pending={})",
            self.id,
            self.version(),
            self.pending.lock().is_some()
        )
    }
}
