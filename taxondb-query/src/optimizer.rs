// SPDX-License-Identifier: AGPL-3.0-or-later
// TaxonDB - Catalog-Oriented Entity Database
// Copyright (C) 2026 TaxonDB Contributors

//! Formula-tree pruning: a rewrite pass that drops subtrees proven
//! redundant by the surrounding boolean structure.
//!
//! This is strictly an optimization — every rewrite preserves the computed
//! result set, and evaluation is correct without the pass. The rules:
//!
//! - a conjunction containing `Empty` collapses to `Empty`; `Empty` operands
//!   disappear from disjunctions;
//! - duplicate operands (by structural hash) evaluate once anyway, so the
//!   extra nodes are removed outright;
//! - inside a conjunction, a deferred leaf whose scope is the *entire*
//!   record universe of a structure is a superset of any selection from the
//!   same structure, so it is dropped when such a sibling selection exists.
//!   Complement-scoped leaves (e.g. orphan nodes) are never supersets and
//!   are never dropped;
//! - single-operand conjunctions/disjunctions unwrap to the operand.
//!
//! The pass consumes the tree and rebuilds the nodes it keeps, so it runs
//! before evaluation, on freshly constructed formulas.

use std::collections::HashSet;

use tracing::trace;

use taxondb_core::{StructureId, SupplierScope};

use crate::formula::{Formula, FormulaKind};

/// Rewrite `formula`, removing redundant subtrees. The computed result set
/// is unchanged.
pub fn prune(formula: Formula) -> Formula {
    match formula.into_kind() {
        FormulaKind::And(operands) => prune_and(operands),
        FormulaKind::Or(operands) => prune_or(operands),
        FormulaKind::Not { base, excluded } => prune_not(*base, *excluded),
        other => Formula::rebuild(other),
    }
}

fn prune_and(operands: Vec<Formula>) -> Formula {
    let mut flat = Vec::with_capacity(operands.len());
    for operand in operands {
        match prune(operand).into_kind() {
            FormulaKind::And(inner) => flat.extend(inner),
            kind => flat.push(Formula::rebuild(kind)),
        }
    }

    if flat
        .iter()
        .any(|f| matches!(f.kind(), FormulaKind::Empty))
    {
        trace!("conjunction contains the empty set, collapsing");
        return Formula::empty();
    }

    dedup_by_hash(&mut flat);

    // Structures that some sibling already narrows to a selection.
    let narrowed: HashSet<StructureId> = flat
        .iter()
        .filter_map(|f| match f.kind() {
            FormulaKind::Deferred(supplier) => {
                let source = supplier.source();
                match source.scope {
                    SupplierScope::Selection => source.structure,
                    _ => None,
                }
            }
            _ => None,
        })
        .collect();

    flat.retain(|f| {
        let redundant = matches!(f.kind(), FormulaKind::Deferred(supplier)
            if supplier.source().scope == SupplierScope::Everything
                && supplier
                    .source()
                    .structure
                    .map_or(false, |id| narrowed.contains(&id)));
        if redundant {
            trace!("dropping whole-universe operand implied by a conjoined selection");
        }
        !redundant
    });

    if flat.len() == 1 {
        return flat.remove(0);
    }
    Formula::and(flat)
}

fn prune_or(operands: Vec<Formula>) -> Formula {
    let mut flat = Vec::with_capacity(operands.len());
    for operand in operands {
        match prune(operand).into_kind() {
            FormulaKind::Or(inner) => flat.extend(inner),
            FormulaKind::Empty => {
                trace!("dropping empty operand from disjunction");
            }
            kind => flat.push(Formula::rebuild(kind)),
        }
    }

    dedup_by_hash(&mut flat);

    match flat.len() {
        0 => Formula::empty(),
        1 => flat.remove(0),
        _ => Formula::or(flat),
    }
}

fn prune_not(base: Formula, excluded: Formula) -> Formula {
    let base = prune(base);
    let excluded = prune(excluded);

    if matches!(base.kind(), FormulaKind::Empty) {
        return Formula::empty();
    }
    if matches!(excluded.kind(), FormulaKind::Empty) {
        trace!("exclusion is empty, unwrapping to base");
        return base;
    }
    Formula::not(base, excluded)
}

/// Operands with equal structural hashes compute the same set; keep the
/// first of each.
fn dedup_by_hash(operands: &mut Vec<Formula>) {
    let mut seen = HashSet::new();
    operands.retain(|f| seen.insert(f.hash()));
}
