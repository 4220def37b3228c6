//! Column activation.
//!
//! Whenever a master column is created, every decision on the active
//! path checks it exactly once and enrolls it into its master row if
//! the column's generator lies in the separating set. Decisions that
//! were inactive while columns appeared catch up when they are
//! activated again. The per-node [`ColumnTicket`] guarantees each
//! (column, decision) pair is judged at most once.

use crate::branching::chain::{DecisionChain, GenericBranchData};
use crate::branching::SeparatingSet;
use crate::error::{BnpError, BnpResult};
use crate::master_problem::column_pool::ColumnTicket;
use crate::master_problem::MasterLp;
use crate::misc::{DecisionId, MasterVarId, RowId};
use crate::vars::{MasterVar, VarRegistry};

/// Whether a master variable's generator lies in the separating set.
/// Pure: depends only on the variable and the set.
pub fn is_in_separating_set(var: &MasterVar, set: &SeparatingSet) -> bool {
    set.contains(|pos| var.generator_value(pos))
}

/// Whether a column belongs to the row of a decision: same pricing block
/// and generator in S. Direct copies and artificials belong nowhere.
pub fn column_in_decision(var: &MasterVar, data: &GenericBranchData) -> bool {
    var.block() == Some(data.block) && !var.released && is_in_separating_set(var, &data.separating_set)
}

/// Runs a freshly created column through all active decisions, deepest
/// first. Returns the decisions that enrolled it.
///
/// Must be called after the variable was stored and handed to the LP and
/// before the LP is solved again.
pub fn activate_column<L: MasterLp + ?Sized>(
    chain: &mut DecisionChain,
    vars: &VarRegistry,
    var_id: MasterVarId,
    lp: &mut L,
) -> BnpResult<Vec<DecisionId>> {
    let var = vars.try_master(var_id)?;
    let mut enrolled = Vec::new();

    // direct copies and artificials are never part of a branching row
    if var.block().is_none() {
        return Ok(enrolled);
    }

    let path: Vec<DecisionId> = chain.active_path().iter().rev().copied().collect();
    for id in path {
        let node = chain.node_mut(id).map_err(|_| BnpError::CorruptedTree {
            decision: id,
            reason: "active path refers to a destroyed decision".to_string(),
        })?;

        if node.has_evaluated(var_id) {
            continue;
        }

        #[cfg(feature = "validity_assertions")]
        for skipped in node.ticket.0..var_id.index() {
            let skipped = MasterVarId::from_index(skipped);
            assert!(
                vars.master(skipped).block().is_none() || vars.master(skipped).released,
                "column {skipped} was never checked against active decision {id}"
            );
        }

        node.ticket = ColumnTicket(var_id.index() + 1);

        let Some(data) = node.data.as_ref() else { continue };
        if !column_in_decision(var, data) {
            continue;
        }

        let row = node.master_row.ok_or_else(|| BnpError::CorruptedTree {
            decision: id,
            reason: "active decision without master row".to_string(),
        })?;

        node.members.insert(var_id);
        if var.in_lp {
            lp.add_coef(row, var_id, 1.0);
        }
        enrolled.push(id);
    }

    Ok(enrolled)
}

/// Brings a decision up to date with all columns created since it was
/// last active. Returns the newly enrolled columns that are in the LP,
/// the caller decides whether they become row entries or coefficients.
pub(crate) fn catch_up(chain: &mut DecisionChain, vars: &VarRegistry, decision: DecisionId) -> BnpResult<Vec<MasterVarId>> {
    let node = chain.node_mut(decision)?;
    let from = node.ticket.0;
    let upto = vars.num_master();
    node.ticket = ColumnTicket(upto);

    let Some(data) = node.data.as_ref() else { return Ok(Vec::new()) };

    let mut in_lp = Vec::new();
    for idx in from..upto {
        let id = MasterVarId::from_index(idx);
        let var = vars.master(id);
        if column_in_decision(var, data) {
            node.members.insert(id);
            if var.in_lp {
                in_lp.push(id);
            }
        }
    }
    Ok(in_lp)
}

/// Row entries of a column re-entering the LP: every live decision
/// that already enrolled it and holds a row. Decisions that did not see
/// the column yet pick it up when they catch up.
pub(crate) fn rows_of_column(chain: &DecisionChain, var_id: MasterVarId) -> Vec<(DecisionId, RowId)> {
    chain
        .iter()
        .filter(|(_, n)| n.has_evaluated(var_id) && n.is_member(var_id))
        .filter_map(|(id, n)| n.master_row.map(|r| (id, r)))
        .collect()
}
