// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! # TaxonDB Storage — Transactional Containers
//!
//! Every mutable index structure in TaxonDB lives inside a
//! [`Transactional`] container: an immutable committed snapshot shared by
//! all readers, plus at most one pending per-transaction diff overlay.
//!
//! ## Visibility Model
//!
//! ```text
//! reader A ──► snapshot()  ──► Arc<S> (version N)        never blocks
//! reader B ──► snapshot()  ──► Arc<S> (version N)        same Arc
//! writer  ──► mutate(txn)  ──► diff overlay (private)
//! writer  ──► read(txn)    ──► Arc<S'> = base ⊕ diff     on demand
//! commit  ──► publish S' as version N+1                  atomic swap
//! ```
//!
//! Readers holding version N keep a fully consistent snapshot after the
//! commit; nothing is mutated in place. Rollback discards the overlay and
//! leaves the committed state bit-for-bit untouched.
//!
//! Serialization of *writers* to one container is the calling session's
//! responsibility; this crate only guarantees that a second transaction
//! touching a container with a foreign pending diff is rejected instead of
//! corrupting it.

pub mod bitmap_store;
pub mod consistency;
pub mod container;
pub mod transaction;

pub use bitmap_store::{BitmapDiff, BitmapOp};
pub use consistency::ConsistencyReport;
pub use container::{DiffLayer, Transactional, TransactionalStore};
pub use transaction::{Transaction, TransactionalUnit, TxnId};
