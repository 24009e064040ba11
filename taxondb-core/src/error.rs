// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors

//! Error types for the TaxonDB index core.
//!
//! One workspace-wide enum keeps function signatures simple across the
//! storage, index, and query crates. Usage errors (bad caller input) are
//! distinct variants from invariant violations; programming errors such as
//! committing a closed transaction panic instead of returning a variant.

use thiserror::Error;

use crate::{PrimaryKey, StructureId};

/// Result type alias using [`TaxonError`].
pub type Result<T> = std::result::Result<T, TaxonError>;

/// Errors that can occur in TaxonDB index operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxonError {
    // Usage errors: the caller supplied invalid input.
    #[error("node {0} is not present in the hierarchy")]
    NodeNotFound(PrimaryKey),

    #[error("node {0} is an orphan and has no path to a root")]
    NodeNotAttached(PrimaryKey),

    #[error("record {pk} is not indexed under the requested value")]
    RecordNotFound { pk: PrimaryKey },

    // Invariant violations: the structure refused to corrupt itself.
    #[error("structure {structure} already has a pending diff owned by transaction {holder}")]
    WriterConflict { structure: StructureId, holder: u64 },

    #[error("structure {structure} failed its consistency check: {detail}")]
    StructureCorrupted {
        structure: StructureId,
        detail: String,
    },
}

impl TaxonError {
    /// Whether this error is a caller-input (usage) error, as opposed to an
    /// invariant violation inside the engine.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            TaxonError::NodeNotFound(_)
                | TaxonError::NodeNotAttached(_)
                | TaxonError::RecordNotFound { .. }
        )
    }
}
