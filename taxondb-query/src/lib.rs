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

//! # TaxonDB Query — Formula Algebra
//!
//! A query translator converts a user filter expression into a tree of
//! [`Formula`] nodes whose leaves pull bitmaps from the hierarchy and
//! inverted indexes through [`BitmapSupplier`](taxondb_core::BitmapSupplier)
//! adapters. The tree is evaluated once per query:
//!
//! ```text
//! And
//! ├── Deferred(inverted: status == "active")     est. 120
//! ├── Deferred(hierarchy: subtree of 8)          est. 3 400
//! └── Or
//!     ├── Constant([42, 99])                     est. 2
//!     └── Deferred(inverted: price 10..=20)      est. 85
//! ```
//!
//! Conjunctions evaluate their cheapest operand first, so an empty
//! intermediate result short-circuits the expensive index walks entirely.
//! Structurally equivalent subtrees share one result through the per-query
//! memo table in [`EvalContext`]; the memo is valid for a single query
//! execution and is never carried across transaction boundaries.
//!
//! ## Modules
//!
//! - [`formula`] — the closed [`Formula`] tagged union: compute/hash/cost
//! - [`context`] — single-query evaluation context with the hash-keyed memo
//! - [`optimizer`] — optional clone-and-rewrite pruning pass

pub mod context;
pub mod formula;
pub mod optimizer;

pub use context::{EvalContext, EvalStats};
pub use formula::{Formula, FormulaKind};
pub use optimizer::prune;
