// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors

//! [`TransactionalStore`] implementation for a plain [`Bitmap`] — the
//! simplest transactional payload, and the reference case for the isolation
//! semantics every other structure inherits.

use taxondb_core::{Bitmap, PrimaryKey};

use crate::container::{DiffLayer, TransactionalStore};

/// A single bitmap mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapOp {
    Insert(PrimaryKey),
    Remove(PrimaryKey),
}

/// Overlay of keys added to and removed from the base bitmap. A key flips
/// between the two sides as ops arrive; it never sits in both.
#[derive(Debug, Default, Clone)]
pub struct BitmapDiff {
    added: Bitmap,
    removed: Bitmap,
}

impl DiffLayer for BitmapDiff {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl TransactionalStore for Bitmap {
    type Op = BitmapOp;
    type Diff = BitmapDiff;

    fn record(diff: &mut BitmapDiff, op: BitmapOp) {
        match op {
            BitmapOp::Insert(key) => {
                diff.removed.remove(key);
                diff.added.insert(key);
            }
            BitmapOp::Remove(key) => {
                diff.added.remove(key);
                diff.removed.insert(key);
            }
        }
    }

    fn apply(&self, diff: &BitmapDiff) -> Bitmap {
        self.and_not(&diff.removed).or(&diff.added)
    }

    fn verify(&self) -> Vec<String> {
        // The bitmap keeps its own representation normalized; there is no
        // secondary index that could drift.
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Transactional;
    use crate::transaction::{Transaction, TransactionalUnit};
    use taxondb_core::TaxonError;

    fn bitmap(keys: &[PrimaryKey]) -> Bitmap {
        keys.iter().copied().collect()
    }

    #[test]
    fn test_uncommitted_writes_invisible_to_readers() {
        let container = Transactional::new(bitmap(&[1, 2]));
        let txn = Transaction::begin();

        container.mutate(&txn, BitmapOp::Insert(3)).unwrap();
        container.mutate(&txn, BitmapOp::Remove(1)).unwrap();

        // The writer sees its own overlay.
        assert_eq!(*container.read(&txn), bitmap(&[2, 3]));
        // Plain readers still see the committed base.
        assert_eq!(*container.snapshot(), bitmap(&[1, 2]));

        txn.commit().unwrap();
        assert_eq!(*container.snapshot(), bitmap(&[2, 3]));
    }

    #[test]
    fn test_old_snapshot_survives_commit() {
        let container = Transactional::new(bitmap(&[10, 20]));
        let before = container.snapshot();

        let txn = Transaction::begin();
        container.mutate(&txn, BitmapOp::Insert(30)).unwrap();
        txn.commit().unwrap();

        // The earlier reader keeps its consistent snapshot.
        assert_eq!(*before, bitmap(&[10, 20]));
        assert_eq!(*container.snapshot(), bitmap(&[10, 20, 30]));
    }

    #[test]
    fn test_rollback_restores_exact_state() {
        let container = Transactional::new(bitmap(&[5, 6]));
        let version_before = container.version();

        let txn = Transaction::begin();
        container.mutate(&txn, BitmapOp::Insert(7)).unwrap();
        container.mutate(&txn, BitmapOp::Remove(5)).unwrap();
        txn.rollback();

        assert_eq!(*container.snapshot(), bitmap(&[5, 6]));
        assert_eq!(container.version(), version_before);

        // The container accepts a fresh writer afterwards.
        let txn = Transaction::begin();
        container.mutate(&txn, BitmapOp::Insert(8)).unwrap();
        txn.commit().unwrap();
        assert_eq!(*container.snapshot(), bitmap(&[5, 6, 8]));
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let container = Transactional::new(bitmap(&[1]));
        {
            let txn = Transaction::begin();
            container.mutate(&txn, BitmapOp::Insert(2)).unwrap();
            // dropped without commit
        }
        assert_eq!(*container.snapshot(), bitmap(&[1]));

        let txn = Transaction::begin();
        container.mutate(&txn, BitmapOp::Insert(3)).unwrap();
        txn.commit().unwrap();
        assert_eq!(*container.snapshot(), bitmap(&[1, 3]));
    }

    #[test]
    fn test_second_writer_rejected() {
        let container = Transactional::new(Bitmap::new());
        let txn_a = Transaction::begin();
        let txn_b = Transaction::begin();

        container.mutate(&txn_a, BitmapOp::Insert(1)).unwrap();
        let err = container.mutate(&txn_b, BitmapOp::Insert(2)).unwrap_err();
        assert!(matches!(err, TaxonError::WriterConflict { holder, .. } if holder == txn_a.id()));

        txn_a.commit().unwrap();
        // With the diff published, a new writer is admitted.
        container.mutate(&txn_b, BitmapOp::Insert(2)).unwrap();
        txn_b.commit().unwrap();
        assert_eq!(*container.snapshot(), bitmap(&[1, 2]));
    }

    #[test]
    fn test_versions_increase_only_on_commit() {
        let container = Transactional::new(Bitmap::new());
        assert_eq!(container.version(), 1);

        let txn = Transaction::begin();
        container.mutate(&txn, BitmapOp::Insert(1)).unwrap();
        assert_eq!(container.version(), 1); // not yet published
        txn.commit().unwrap();
        assert_eq!(container.version(), 2);

        let txn = Transaction::begin();
        container.mutate(&txn, BitmapOp::Insert(2)).unwrap();
        txn.rollback();
        assert_eq!(container.version(), 2);

        let txn = Transaction::begin();
        container.mutate(&txn, BitmapOp::Insert(3)).unwrap();
        txn.commit().unwrap();
        assert_eq!(container.version(), 3);
    }

    #[test]
    fn test_insert_then_remove_cancels_out() {
        let container = Transactional::new(bitmap(&[1]));
        let txn = Transaction::begin();

        container.mutate(&txn, BitmapOp::Insert(9)).unwrap();
        container.mutate(&txn, BitmapOp::Remove(9)).unwrap();
        assert_eq!(*container.read(&txn), bitmap(&[1]));

        txn.commit().unwrap();
        assert_eq!(*container.snapshot(), bitmap(&[1]));
    }

    #[test]
    fn test_writer_read_cache_invalidated_by_mutation() {
        let container = Transactional::new(Bitmap::new());
        let txn = Transaction::begin();

        container.mutate(&txn, BitmapOp::Insert(1)).unwrap();
        assert_eq!(*container.read(&txn), bitmap(&[1]));

        container.mutate(&txn, BitmapOp::Insert(2)).unwrap();
        assert_eq!(*container.read(&txn), bitmap(&[1, 2]));
        txn.rollback();
    }

    #[test]
    fn test_consistency_report() {
        let container = Transactional::new(bitmap(&[1, 2, 3]));
        let report = container.check_consistency();
        assert!(report.is_consistent());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_commit_with_foreign_txn_id_rejected() {
        let container = Transactional::new(Bitmap::new());
        let txn = Transaction::begin();
        container.mutate(&txn, BitmapOp::Insert(1)).unwrap();

        // A stray commit attempt under a different transaction id must not
        // publish the pending diff.
        let err = container.commit_txn(txn.id() + 1000).unwrap_err();
        assert!(matches!(err, TaxonError::WriterConflict { .. }));
        assert!(container.snapshot().is_empty());

        txn.commit().unwrap();
        assert_eq!(*container.snapshot(), bitmap(&[1]));
    }
}
