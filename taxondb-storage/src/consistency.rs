// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors

//! Read-only consistency reporting for transactional structures.

use taxondb_core::{Result, StructureId, StructureVersion, TaxonError};

/// The outcome of a structure's internal-consistency check.
///
/// Produced for diagnostics and testing; an inconsistent report on a
/// committed structure means an engine bug, not a caller error.
#[derive(Debug, Clone)]
pub struct ConsistencyReport {
    pub structure: StructureId,
    pub version: StructureVersion,
    /// Human-readable descriptions of every violation found.
    pub issues: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }

    /// Convert into a `Result`, folding the issues into a
    /// [`TaxonError::StructureCorrupted`].
    pub fn into_result(self) -> Result<()> {
        if self.issues.is_empty() {
            Ok(())
        } else {
            Err(TaxonError::StructureCorrupted {
                structure: self.structure,
                detail: self.issues.join("; "),
            })
        }
    }
}

impl std::fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.issues.is_empty() {
            write!(f, "{} v{}: consistent", self.structure, self.version)
        } else {
            write!(
                f,
                "{} v{}: {} issue(s): {}",
                self.structure,
                self.version,
                self.issues.len(),
                self.issues.join("; ")
            )
        }
    }
}
