// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors

//! # Inverted Index — Sorted Value → Bitmap Map
//!
//! For each indexed attribute, a sorted map from attribute value to the
//! bitmap of records holding that value. Serves two masters:
//!
//! - **filtering**: equality and range predicates produce a single bitmap;
//! - **sorting**: iterating the entries in comparator order yields record
//!   ids in value order, ready for ORDER BY materialization.
//!
//! A value whose bitmap becomes empty is removed from the map — the
//! structure never carries dangling empty entries.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Bound;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use taxondb_core::{Bitmap, PrimaryKey, Result, StructureId, StructureVersion};
use taxondb_storage::{
    ConsistencyReport, DiffLayer, Transaction, Transactional, TransactionalStore,
};

/// Bounds every indexable value type must satisfy. Blanket-implemented.
pub trait IndexValue: Ord + Clone + Hash + Debug + Send + Sync + 'static {}
impl<V: Ord + Clone + Hash + Debug + Send + Sync + 'static> IndexValue for V {}

/// Immutable snapshot of one attribute's inverted index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueIndex<V: IndexValue> {
    entries: BTreeMap<V, Bitmap>,
}

impl<V: IndexValue> Default for ValueIndex<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V: IndexValue> ValueIndex<V> {
    /// Records holding exactly `value`.
    pub fn records_for_value(&self, value: &V) -> Bitmap {
        self.entries.get(value).cloned().unwrap_or_default()
    }

    /// Every indexed record, regardless of value.
    pub fn all_records(&self) -> Bitmap {
        Bitmap::union_of(self.entries.values())
    }

    /// Number of distinct values.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Total record memberships across all values.
    pub fn record_count(&self) -> usize {
        self.entries.values().map(Bitmap::len).sum()
    }

    /// Number of records holding exactly `value`.
    pub fn cardinality_of(&self, value: &V) -> usize {
        self.entries.get(value).map_or(0, Bitmap::len)
    }

    /// Distinct values in comparator order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.keys()
    }

    /// All records as an ordered stream: value order, ascending key within
    /// one value.
    pub fn sorted_records(&self) -> RecordStream {
        self.stream(self.entries.iter())
    }

    /// Records whose value lies in the inclusive range. Either bound may be
    /// `None` (unbounded); bounds need not match an existing value — the
    /// nearest entries are used.
    pub fn sorted_records_between(&self, lower: Option<&V>, upper: Option<&V>) -> RecordStream {
        if let (Some(lo), Some(hi)) = (lower, upper) {
            if lo > hi {
                return RecordStream::default();
            }
        }
        let lower = lower.map_or(Bound::Unbounded, Bound::Included);
        let upper = upper.map_or(Bound::Unbounded, Bound::Included);
        self.stream(self.entries.range::<V, _>((lower, upper)))
    }

    /// Membership count in the inclusive range, without materializing the
    /// record stream. Cheap enough for cost estimation.
    pub fn count_records_between(&self, lower: Option<&V>, upper: Option<&V>) -> usize {
        if let (Some(lo), Some(hi)) = (lower, upper) {
            if lo > hi {
                return 0;
            }
        }
        let lower = lower.map_or(Bound::Unbounded, Bound::Included);
        let upper = upper.map_or(Bound::Unbounded, Bound::Included);
        self.entries
            .range::<V, _>((lower, upper))
            .map(|(_, bitmap)| bitmap.len())
            .sum()
    }

    fn stream<'a>(&self, range: impl Iterator<Item = (&'a V, &'a Bitmap)>) -> RecordStream
    where
        V: 'a,
    {
        let mut ids = Vec::new();
        for (_, bitmap) in range {
            ids.extend(bitmap.iter());
        }
        RecordStream { ids }
    }

    fn insert_record(&mut self, value: V, pk: PrimaryKey) {
        self.entries.entry(value).or_default().insert(pk);
    }

    fn delete_record(&mut self, value: &V, pk: PrimaryKey) {
        if let Some(bitmap) = self.entries.get_mut(value) {
            bitmap.remove(pk);
            if bitmap.is_empty() {
                self.entries.remove(value);
            }
        }
    }
}

/// Record ids in value order. Doubles as a bitmap source for filtering and
/// as the defined iteration order for sort materialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStream {
    ids: Vec<PrimaryKey>,
}

impl RecordStream {
    /// Ids in value order (ascending key within one value). A record
    /// appears once per value holding it.
    pub fn ids(&self) -> &[PrimaryKey] {
        &self.ids
    }

    /// The deduplicated key set.
    pub fn bitmap(&self) -> Bitmap {
        self.ids.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PrimaryKey> + '_ {
        self.ids.iter().copied()
    }
}

/// A single inverted-index mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueOp<V> {
    Add { value: V, pk: PrimaryKey },
    Remove { value: V, pk: PrimaryKey },
}

/// Overlay of per-value additions and removals. A key flips between the two
/// sides of one value as ops arrive; removal of a never-present key is
/// naturally a no-op when the overlay is folded in.
#[derive(Debug, Clone)]
pub struct ValueDiff<V: IndexValue> {
    added: BTreeMap<V, Bitmap>,
    removed: BTreeMap<V, Bitmap>,
}

impl<V: IndexValue> Default for ValueDiff<V> {
    fn default() -> Self {
        Self {
            added: BTreeMap::new(),
            removed: BTreeMap::new(),
        }
    }
}

impl<V: IndexValue> DiffLayer for ValueDiff<V> {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

fn retract<V: IndexValue>(side: &mut BTreeMap<V, Bitmap>, value: &V, pk: PrimaryKey) {
    if let Some(bitmap) = side.get_mut(value) {
        bitmap.remove(pk);
        if bitmap.is_empty() {
            side.remove(value);
        }
    }
}

impl<V: IndexValue> TransactionalStore for ValueIndex<V> {
    type Op = ValueOp<V>;
    type Diff = ValueDiff<V>;

    fn record(diff: &mut ValueDiff<V>, op: ValueOp<V>) {
        match op {
            ValueOp::Add { value, pk } => {
                retract(&mut diff.removed, &value, pk);
                diff.added.entry(value).or_default().insert(pk);
            }
            ValueOp::Remove { value, pk } => {
                retract(&mut diff.added, &value, pk);
                diff.removed.entry(value).or_default().insert(pk);
            }
        }
    }

    fn apply(&self, diff: &ValueDiff<V>) -> ValueIndex<V> {
        let mut next = self.clone();
        for (value, removed) in &diff.removed {
            for pk in removed {
                next.delete_record(value, pk);
            }
        }
        for (value, added) in &diff.added {
            for pk in added {
                next.insert_record(value.clone(), pk);
            }
        }
        next
    }

    fn verify(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, bitmap)| bitmap.is_empty())
            .map(|(value, _)| format!("value {value:?} has a dangling empty entry"))
            .collect()
    }
}

/// The public, transactional face of one attribute's inverted index.
pub struct InvertedIndex<V: IndexValue> {
    container: Arc<Transactional<ValueIndex<V>>>,
}

impl<V: IndexValue> InvertedIndex<V> {
    pub fn new() -> Self {
        Self {
            container: Transactional::new(ValueIndex::default()),
        }
    }

    pub fn id(&self) -> StructureId {
        self.container.id()
    }

    pub fn version(&self) -> StructureVersion {
        self.container.version()
    }

    /// Latest committed index.
    pub fn snapshot(&self) -> Arc<ValueIndex<V>> {
        self.container.snapshot()
    }

    /// The index as visible to `txn`, including its own pending writes.
    pub fn read(&self, txn: &Transaction) -> Arc<ValueIndex<V>> {
        self.container.read(txn)
    }

    /// Index `pk` under `value`.
    pub fn add_record(&self, txn: &Transaction, value: V, pk: PrimaryKey) -> Result<()> {
        self.container.mutate(txn, ValueOp::Add { value, pk })
    }

    /// Remove `pk` from `value`. Removing a key that is not indexed there
    /// is a no-op, never a corrupting double-decrement.
    pub fn remove_record(&self, txn: &Transaction, value: V, pk: PrimaryKey) -> Result<()> {
        self.container.mutate(txn, ValueOp::Remove { value, pk })
    }

    pub fn check_consistency(&self) -> ConsistencyReport {
        self.container.check_consistency()
    }
}

impl<V: IndexValue> Default for InvertedIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The fixture from the engine's canonical range-query cases:
    /// `{5:[1,20], 10:[3], 15:[2,4], 20:[5]}`.
    fn fixture() -> ValueIndex<i64> {
        let mut index = ValueIndex::default();
        index.insert_record(5, 1);
        index.insert_record(5, 20);
        index.insert_record(10, 3);
        index.insert_record(15, 2);
        index.insert_record(15, 4);
        index.insert_record(20, 5);
        index
    }

    fn keys(bitmap: &Bitmap) -> Vec<PrimaryKey> {
        bitmap.iter().collect()
    }

    #[test]
    fn test_records_for_value() {
        let index = fixture();
        assert_eq!(keys(&index.records_for_value(&5)), vec![1, 20]);
        assert!(index.records_for_value(&7).is_empty());
        assert_eq!(index.entry_count(), 4);
        assert_eq!(index.record_count(), 6);
    }

    #[test]
    fn test_range_inclusive_bounds() {
        let index = fixture();
        let stream = index.sorted_records_between(Some(&10), Some(&15));
        assert_eq!(keys(&stream.bitmap()), vec![2, 3, 4]);
        // Value order: 10 before 15, ascending key within a value.
        assert_eq!(stream.ids(), &[3, 2, 4]);
    }

    #[test]
    fn test_range_between_entries_is_empty() {
        let index = fixture();
        let stream = index.sorted_records_between(Some(&11), Some(&14));
        assert!(stream.is_empty());
        assert!(stream.bitmap().is_empty());
    }

    #[test]
    fn test_range_bounds_need_not_match_entries() {
        let index = fixture();
        // 7 and 17 are not indexed values; the nearest entries are used.
        let stream = index.sorted_records_between(Some(&7), Some(&17));
        assert_eq!(stream.ids(), &[3, 2, 4]);
    }

    #[test]
    fn test_half_open_and_unbounded_ranges() {
        let index = fixture();
        assert_eq!(
            index.sorted_records_between(Some(&15), None).ids(),
            &[2, 4, 5]
        );
        assert_eq!(
            index.sorted_records_between(None, Some(&10)).ids(),
            &[1, 20, 3]
        );
        assert_eq!(index.sorted_records().ids(), &[1, 20, 3, 2, 4, 5]);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let index = fixture();
        assert!(index.sorted_records_between(Some(&15), Some(&10)).is_empty());
        assert_eq!(index.count_records_between(Some(&15), Some(&10)), 0);
    }

    #[test]
    fn test_count_records_between() {
        let index = fixture();
        assert_eq!(index.count_records_between(Some(&10), Some(&15)), 3);
        assert_eq!(index.count_records_between(None, None), 6);
    }

    #[test]
    fn test_last_record_removal_drops_entry() {
        let index = InvertedIndex::new();
        let txn = Transaction::begin();
        index.add_record(&txn, 10i64, 3).unwrap();
        index.add_record(&txn, 15i64, 2).unwrap();
        txn.commit().unwrap();
        assert_eq!(index.snapshot().entry_count(), 2);

        let txn = Transaction::begin();
        index.remove_record(&txn, 10i64, 3).unwrap();
        txn.commit().unwrap();

        let snapshot = index.snapshot();
        assert_eq!(snapshot.entry_count(), 1);
        assert!(snapshot.records_for_value(&10).is_empty());
        assert!(index.check_consistency().is_consistent());
    }

    #[test]
    fn test_double_remove_is_noop() {
        let index = InvertedIndex::new();
        let txn = Transaction::begin();
        index.add_record(&txn, 5i64, 1).unwrap();
        txn.commit().unwrap();

        let txn = Transaction::begin();
        index.remove_record(&txn, 5i64, 1).unwrap();
        index.remove_record(&txn, 5i64, 1).unwrap();
        index.remove_record(&txn, 99i64, 7).unwrap();
        txn.commit().unwrap();

        let snapshot = index.snapshot();
        assert_eq!(snapshot.entry_count(), 0);
        assert_eq!(snapshot.record_count(), 0);
        assert!(index.check_consistency().is_consistent());
    }

    #[test]
    fn test_transactional_isolation() {
        let index = InvertedIndex::new();
        let txn = Transaction::begin();
        index.add_record(&txn, "red".to_string(), 1).unwrap();
        index.add_record(&txn, "blue".to_string(), 2).unwrap();

        // Invisible before commit.
        assert_eq!(index.snapshot().entry_count(), 0);
        assert_eq!(index.read(&txn).entry_count(), 2);

        txn.commit().unwrap();
        let committed = index.snapshot();
        assert_eq!(committed.entry_count(), 2);

        // A rollback leaves the committed snapshot untouched.
        let txn = Transaction::begin();
        index.remove_record(&txn, "red".to_string(), 1).unwrap();
        txn.rollback();
        assert_eq!(*index.snapshot(), *committed);
    }

    #[test]
    fn test_add_then_remove_in_one_txn() {
        let index = InvertedIndex::new();
        let txn = Transaction::begin();
        index.add_record(&txn, 5i64, 1).unwrap();
        index.remove_record(&txn, 5i64, 1).unwrap();
        txn.commit().unwrap();

        assert_eq!(index.snapshot().entry_count(), 0);
    }

    #[test]
    fn test_string_values_sort_lexicographically() {
        let mut index: ValueIndex<String> = ValueIndex::default();
        index.insert_record("banana".into(), 2);
        index.insert_record("apple".into(), 1);
        index.insert_record("cherry".into(), 3);

        let values: Vec<&String> = index.values().collect();
        assert_eq!(values, ["apple", "banana", "cherry"]);
        assert_eq!(index.sorted_records().ids(), &[1, 2, 3]);
    }

    #[test]
    fn test_serde_round_trip() {
        let index = fixture();
        let encoded = serde_json::to_string(&index).unwrap();
        let decoded: ValueIndex<i64> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(index, decoded);
    }
}
