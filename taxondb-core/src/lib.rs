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

//! # TaxonDB Core — Shared Leaf Types
//!
//! The foundation of the TaxonDB index engine: the [`Bitmap`] value type that
//! every index query ultimately produces, the workspace-wide error enum, and
//! the [`BitmapSupplier`] contract that binds index-backed computations into
//! the formula algebra without forcing their evaluation.
//!
//! ## Modules
//!
//! - [`bitmap`] — ordered, deduplicated set of primary keys with pure set algebra
//! - [`error`] — [`TaxonError`] and the workspace [`Result`] alias
//! - [`supplier`] — deferred, memoized bitmap computation contract

pub mod bitmap;
pub mod error;
pub mod supplier;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub use bitmap::Bitmap;
pub use error::{Result, TaxonError};
pub use supplier::{BitmapSupplier, SupplierScope, SupplierSource};

/// Entity primary key. Keys are non-negative 32-bit integers ordered
/// numerically ascending.
pub type PrimaryKey = u32;

/// Monotonic version of a committed structure. Bumped on every commit,
/// stable across rollbacks.
pub type StructureVersion = u64;

/// Identity of a transactional structure instance.
///
/// The id is process-unique and stable for the lifetime of the structure.
/// Formula results record the ids of every structure they consulted, so a
/// cached result can be matched against the structures (and versions) it was
/// computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructureId(pub u64);

impl StructureId {
    /// Allocate a fresh, process-unique structure id.
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for StructureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}
