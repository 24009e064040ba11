// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors

//! Transaction lifecycle: begin → (mutate …) → commit | rollback.
//!
//! A [`Transaction`] is a lightweight handle that enlists every container it
//! mutates. `commit` and `rollback` consume the handle, so committing a
//! closed transaction is unrepresentable; a handle dropped while still open
//! rolls back implicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use taxondb_core::{Result, StructureId};

/// Transaction identifier.
pub type TxnId = u64;

/// A transactional container, seen through the object-safe lens the
/// [`Transaction`] needs: apply or discard the pending diff I own there.
pub trait TransactionalUnit: Send + Sync {
    fn structure_id(&self) -> StructureId;

    /// Atomically publish the pending diff owned by `txn` as a new committed
    /// version. A missing diff is a no-op.
    fn commit_txn(&self, txn: TxnId) -> Result<()>;

    /// Discard the pending diff owned by `txn`, leaving the committed state
    /// untouched.
    fn rollback_txn(&self, txn: TxnId);
}

/// A write transaction over one or more transactional containers.
///
/// The handle is consumed by [`commit`](Transaction::commit) and
/// [`rollback`](Transaction::rollback); a transaction that goes out of scope
/// while open rolls back. Writer serialization per container is the calling
/// session's job — this type only coordinates the containers one transaction
/// touched.
pub struct Transaction {
    id: TxnId,
    open: bool,
    participants: Mutex<Vec<Arc<dyn TransactionalUnit>>>,
}

impl Transaction {
    /// Begin a new transaction.
    pub fn begin() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        trace!(txn = id, "transaction begun");
        Self {
            id,
            open: true,
            participants: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Register a container this transaction has mutated. Called by
    /// `Transactional::mutate` on the first write; repeat registrations for
    /// the same structure are ignored.
    pub fn enlist(&self, unit: Arc<dyn TransactionalUnit>) {
        let mut participants = self.participants.lock();
        if participants
            .iter()
            .all(|p| p.structure_id() != unit.structure_id())
        {
            participants.push(unit);
        }
    }

    /// Commit every enlisted container's pending diff, publishing the new
    /// versions. If a container rejects its commit, the remaining containers
    /// are rolled back and the error propagates.
    pub fn commit(mut self) -> Result<()> {
        self.open = false;
        let units: Vec<_> = self.participants.lock().drain(..).collect();
        let count = units.len();

        let mut outcome = Ok(());
        for unit in units {
            if outcome.is_ok() {
                outcome = unit.commit_txn(self.id);
            } else {
                unit.rollback_txn(self.id);
            }
        }
        debug!(txn = self.id, containers = count, ok = outcome.is_ok(), "transaction commit");
        outcome
    }

    /// Discard every enlisted container's pending diff.
    pub fn rollback(mut self) {
        self.open = false;
        let units: Vec<_> = self.participants.lock().drain(..).collect();
        for unit in &units {
            unit.rollback_txn(self.id);
        }
        debug!(txn = self.id, containers = units.len(), "transaction rolled back");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.open {
            let units: Vec<_> = self.participants.lock().drain(..).collect();
            for unit in &units {
                unit.rollback_txn(self.id);
            }
            if !units.is_empty() {
                debug!(txn = self.id, "open transaction dropped, rolled back");
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Transaction(id={}, participants={})",
            self.id,
            self.participants.lock().len()
        )
    }
}
