use crate::branching::{BranchOutcome, BranchingRule, NodeConstraint, OrigBound, SearchTree};
use crate::error::{BnpError, BnpResult};
use crate::master_problem::MasterSolution;
use crate::misc::OrigVarId;
use crate::problem::VarAssignment;
use crate::session::Session;
use crate::ui::UIUserMessage;

/// Branches on a fractional master-only or linking variable by bounding
/// its direct copy. The children keep the decision node of the parent.
pub struct DirectCopyBranching {
    priority: i32,
}

impl DirectCopyBranching {
    pub fn new() -> Self {
        Self { priority: -100 }
    }

    fn candidate(session: &Session, values: &[f64]) -> Option<(OrigVarId, f64)> {
        let tol = session.settings().int_feas_tol;
        let vars = session.vars();
        vars.branching_order()
            .into_iter()
            .filter(|ov| matches!(vars.orig(*ov).assignment, VarAssignment::Master | VarAssignment::Linking(_)))
            .map(|ov| (ov, values.get(ov.index()).copied().unwrap_or(0.0)))
            .find(|(_, v)| (v - v.round()).abs() > tol)
    }

    fn branch(session: &mut Session, var: OrigVarId, value: f64, estimate: f64, tree: &mut dyn SearchTree) -> BnpResult<BranchOutcome> {
        let decision = session
            .chain()
            .active_node()
            .ok_or_else(|| BnpError::BranchingNotApplicable("no active decision to branch below".to_string()))?;

        let mut children = Vec::with_capacity(2);
        for bound in [OrigBound::Upper(value.floor()), OrigBound::Lower(value.ceil())] {
            let cons = session.orig_branch_cons(var, bound)?;
            let handle = tree.create_child_node(estimate);
            tree.add_constraint_to_node(handle, NodeConstraint::OrigBound(cons));
            children.push((handle, decision));
        }

        session.ui().send(UIUserMessage::Branched { var, value, block: None, children: children.len() });
        Ok(BranchOutcome::Branched { children })
    }
}

impl Default for DirectCopyBranching {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchingRule for DirectCopyBranching {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn exec_lp(&mut self, session: &mut Session, master_sol: &MasterSolution, tree: &mut dyn SearchTree) -> BnpResult<BranchOutcome> {
        let values = session
            .master_sol_to_orig_values(master_sol)
            .map_err(|e| BnpError::BranchingNotApplicable(format!("master solution not representable: {e}")))?;
        match Self::candidate(session, &values) {
            Some((var, value)) => Self::branch(session, var, value, master_sol.obj, tree),
            None => Ok(BranchOutcome::DidNotFind),
        }
    }

    fn exec_ps(&mut self, session: &mut Session, orig_values: &[f64], tree: &mut dyn SearchTree) -> BnpResult<BranchOutcome> {
        match Self::candidate(session, orig_values) {
            Some((var, value)) => {
                let estimate = session.problem().objective(orig_values);
                Self::branch(session, var, value, estimate, tree)
            }
            None => Ok(BranchOutcome::DidNotFind),
        }
    }
}
