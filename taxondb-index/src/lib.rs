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

//! # TaxonDB Index — Transactional Hierarchy & Inverted Indexes
//!
//! The two index structures that answer "which entity primary keys satisfy
//! this predicate":
//!
//! - [`hierarchy`] — a transactional parent/child tree over primary keys
//!   with out-of-order insertion (orphans), relocation, cycle refusal, and
//!   subtree/ancestor/traversal queries;
//! - [`inverted`] — a transactional sorted map from attribute value to the
//!   bitmap of records holding it, with equality and range queries and
//!   ordered record streams for sort materialization.
//!
//! Both live inside [`Transactional`](taxondb_storage::Transactional)
//! containers and surface their query results either as plain
//! [`Bitmap`](taxondb_core::Bitmap)s or as deferred
//! [`Formula`](taxondb_query::Formula) leaves (see [`suppliers`]), so the
//! query algebra can skip walking an index the boolean structure has already
//! ruled out.

pub mod hierarchy;
pub mod inverted;
pub mod suppliers;

pub use hierarchy::{
    HierarchyIndex, HierarchyOp, HierarchyTree, NodeExclusion, SiblingOrder, TraversalOrder,
};
pub use inverted::{InvertedIndex, RecordStream, ValueIndex, ValueOp};
pub use suppliers::{HierarchyScope, ValueScope};
