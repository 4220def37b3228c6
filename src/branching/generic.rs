//! Generic branching after Vanderbeck.
//!
//! Instead of branching on master columns, a fractional original variable
//! `x` of a block is picked and the columns of that block are split by a
//! separating set on `x`'s pricing position: the up child requires enough
//! columns with `g[x] >= ceil(x)`, the down child enough columns with
//! `g[x] < ceil(x)`. Pricing stays unchanged apart from the row duals.
//!
//! With aggregated identical blocks a single component often has
//! integral activity although the columns are fractional. The set is then
//! grown component by component on the columns it already contains until
//! its activity becomes fractional; the down child of such a set caps
//! `Σ λ` over S instead of using the complement.

use crate::branching::chain::{BranchDirection, RowSense};
use crate::branching::{
    BoundSense, BranchOutcome, BranchingRule, ComponentBound, NodeConstraint, OrigBound, OrigBranchCons, SearchTree,
};
use crate::branching::activation::is_in_separating_set;
use crate::branching::SeparatingSet;
use crate::error::{BnpError, BnpResult};
use crate::EPSILON;
use crate::master_problem::MasterSolution;
use crate::misc::{DecisionId, OrigVarId};
use crate::problem::VarAssignment;
use crate::session::Session;
use crate::ui::UIUserMessage;
use crate::vars::{MasterVar, VarRegistry};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub var: OrigVarId,
    /// pricing block
    pub block: usize,
    /// pricing position of the variable
    pub position: usize,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChildPlan {
    pub direction: BranchDirection,
    pub bounds: Vec<ComponentBound>,
    pub sense: RowSense,
    pub rhs: f64,
    /// only single component sets mirror a bound of the original variable
    pub orig_cons: Option<OrigBranchCons>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RuleState {
    SelectFractionalBlock,
    BuildSeparatingSet(Candidate),
    CreateChildren(Candidate, Vec<ChildPlan>),
    Done,
}

/// Where the activity of a separating set comes from
enum Activity<'a> {
    /// master LP solution
    Lp(&'a MasterSolution),
    /// original values only, copies are counted
    Pseudo(&'a [f64]),
}

pub struct GenericBranching {
    state: RuleState,
    priority: i32,
}

impl GenericBranching {
    pub fn new() -> Self {
        Self { state: RuleState::Done, priority: 100 }
    }

    pub fn state(&self) -> &RuleState {
        &self.state
    }

    /// Fractional block variables grouped by pricing block, binaries
    /// before integers inside a block
    pub fn lp_candidates(vars: &VarRegistry, values: &[f64], tol: f64) -> Vec<Candidate> {
        let order = vars.branching_order();
        let mut candidates = Vec::new();
        for pb in 0..vars.num_blocks() {
            for ov in &order {
                let orig = vars.orig(*ov);
                let VarAssignment::Block(b) = orig.assignment else { continue };
                if vars.pricing_block_of(b) != pb {
                    continue;
                }
                let value = values.get(ov.index()).copied().unwrap_or(0.0);
                if (value - value.round()).abs() <= tol {
                    continue;
                }
                if let Some(p) = orig.pricing_var {
                    candidates.push(Candidate { var: *ov, block: pb, position: vars.pricing(p).position, value });
                }
            }
        }
        candidates
    }

    /// First fractional integer variable in branching order.
    /// Fails if it has no pricing variable.
    pub fn ps_candidate(vars: &VarRegistry, values: &[f64], tol: f64) -> BnpResult<Option<Candidate>> {
        let Some(ov) = vars.branching_order().into_iter().find(|ov| {
            let v = values.get(ov.index()).copied().unwrap_or(0.0);
            (v - v.round()).abs() > tol
        }) else {
            return Ok(None);
        };

        let pricing = vars
            .resolve_pricing_var(ov)
            .ok_or_else(|| BnpError::BranchingNotApplicable(format!("{ov} has no pricing variable")))?;
        let p = vars.pricing(pricing);
        let value = values.get(ov.index()).copied().unwrap_or(0.0);
        Ok(Some(Candidate { var: ov, block: p.block, position: p.position, value }))
    }

    /// Grows `bounds` on `cols` (all inside the current set, with
    /// integral total activity) until a set of fractional activity is
    /// found. Every step splits the columns at the largest value of the
    /// first position on which they differ and keeps the side holding a
    /// fractional column.
    pub fn separate(
        cols: &[(&MasterVar, f64)],
        mut bounds: Vec<ComponentBound>,
        num_positions: usize,
        tol: f64,
    ) -> Option<(Vec<ComponentBound>, f64)> {
        let is_frac = |x: f64| (x - x.round()).abs() > tol;
        let mut cols: Vec<(&MasterVar, f64)> = cols.to_vec();

        while cols.iter().any(|(_, x)| is_frac(*x)) {
            let (position, threshold) = (0..num_positions).find_map(|pos| {
                let values = cols.iter().map(|(v, _)| v.generator_value(pos));
                let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), g| (lo.min(g), hi.max(g)));
                (hi - lo > EPSILON).then_some((pos, hi))
            })?;

            let hi_bound = ComponentBound::new(position, BoundSense::GreaterEqual, threshold);
            let lo_bound = ComponentBound::new(position, BoundSense::Less, threshold);
            let (hi, lo): (Vec<_>, Vec<_>) = cols.into_iter().partition(|(v, _)| hi_bound.holds(v.generator_value(position)));

            for (side, bound) in [(&hi, hi_bound), (&lo, lo_bound)] {
                let alpha: f64 = side.iter().map(|(_, x)| x).sum();
                if is_frac(alpha) {
                    bounds.push(bound);
                    return Some((bounds, alpha));
                }
            }

            if hi.iter().any(|(_, x)| is_frac(*x)) {
                bounds.push(hi_bound);
                cols = hi;
            } else {
                bounds.push(lo_bound);
                cols = lo;
            }
        }
        None
    }

    /// Children of a set with several components: `Σ λ >= ceil(α)` on S
    /// against `Σ λ <= floor(α)` on S
    fn grown_children(session: &Session, c: &Candidate, sol: &MasterSolution) -> Option<Vec<ChildPlan>> {
        let vars = session.vars();
        let tol = session.settings().int_feas_tol;
        let num_positions = vars.block(c.block).vars.len();
        let threshold = c.value.ceil();

        let cols: Vec<(&MasterVar, f64)> = sol
            .nonzeros(session.settings().feastol)
            .map(|(id, x)| (vars.master(id), x))
            .filter(|(v, _)| v.block() == Some(c.block) && !v.is_ray)
            .collect();

        let up = ComponentBound::new(c.position, BoundSense::GreaterEqual, threshold);
        let down = ComponentBound::new(c.position, BoundSense::Less, threshold);
        let (inside, outside): (Vec<_>, Vec<_>) = cols.into_iter().partition(|(v, _)| up.holds(v.generator_value(c.position)));

        let (bounds, alpha) = Self::separate(&inside, vec![up], num_positions, tol)
            .or_else(|| Self::separate(&outside, vec![down], num_positions, tol))?;

        Some(vec![
            ChildPlan { direction: BranchDirection::Up, bounds: bounds.clone(), sense: RowSense::AtLeast, rhs: alpha.ceil(), orig_cons: None },
            ChildPlan { direction: BranchDirection::Down, bounds, sense: RowSense::AtMost, rhs: alpha.floor(), orig_cons: None },
        ])
    }

    /// Both children for a candidate, `None` if no set grown from the
    /// candidate has fractional activity
    fn build_children(session: &Session, c: &Candidate, activity: &Activity) -> BnpResult<Option<Vec<ChildPlan>>> {
        let vars = session.vars();
        let tol = session.settings().int_feas_tol;
        let threshold = c.value.ceil();
        #[allow(clippy::cast_precision_loss)]
        let k = vars.block(c.block).multiplicity() as f64;

        let up_set = SeparatingSet::new(vec![ComponentBound::new(c.position, BoundSense::GreaterEqual, threshold)])?;

        let alpha = match activity {
            Activity::Lp(sol) => sol
                .nonzeros(session.settings().feastol)
                .map(|(id, x)| (vars.master(id), x))
                .filter(|(v, _)| v.block() == Some(c.block) && !v.is_ray && is_in_separating_set(v, &up_set))
                .map(|(_, x)| x)
                .sum::<f64>(),
            Activity::Pseudo(values) => {
                let others = vars
                    .resolve_pricing_var(c.var)
                    .map(|p| {
                        vars.pricing(p)
                            .orig_vars
                            .iter()
                            .filter(|ov| **ov != c.var && values.get(ov.index()).is_some_and(|v| *v >= threshold - tol))
                            .count()
                    })
                    .unwrap_or(0);
                #[allow(clippy::cast_precision_loss)]
                let others = others as f64;
                // the chosen copy counts as half a unit in S
                others + 0.5
            }
        };

        if (alpha - alpha.round()).abs() <= tol {
            return Ok(match activity {
                Activity::Lp(sol) => Self::grown_children(session, c, sol),
                Activity::Pseudo(_) => None,
            });
        }

        Ok(Some(vec![
            ChildPlan {
                direction: BranchDirection::Up,
                bounds: vec![ComponentBound::new(c.position, BoundSense::GreaterEqual, threshold)],
                sense: RowSense::AtLeast,
                rhs: alpha.ceil(),
                orig_cons: Some(OrigBranchCons { var: c.var, bound: OrigBound::Lower(threshold) }),
            },
            ChildPlan {
                direction: BranchDirection::Down,
                bounds: vec![ComponentBound::new(c.position, BoundSense::Less, threshold)],
                sense: RowSense::AtLeast,
                rhs: k - alpha.floor(),
                orig_cons: Some(OrigBranchCons { var: c.var, bound: OrigBound::Upper(c.value.floor()) }),
            },
        ]))
    }

    fn create_children(
        session: &mut Session,
        c: &Candidate,
        plans: Vec<ChildPlan>,
        estimate: f64,
        tree: &mut dyn SearchTree,
    ) -> BnpResult<BranchOutcome> {
        let parent = session
            .chain()
            .active_node()
            .ok_or_else(|| BnpError::BranchingNotApplicable("no active decision to branch below".to_string()))?;

        let mut decisions: Vec<(DecisionId, Option<OrigBranchCons>)> = Vec::with_capacity(plans.len());
        for plan in plans {
            let created = match plan.sense {
                RowSense::AtLeast => session.create_decision_node(parent, plan.bounds, c.block, plan.direction, plan.rhs, plan.orig_cons),
                RowSense::AtMost => session.create_capped_decision_node(parent, plan.bounds, c.block, plan.rhs),
            };
            match created {
                Ok(decision) => decisions.push((decision, plan.orig_cons)),
                Err(e) => {
                    // siblings were never activated, they own no rows
                    for (created, _) in decisions {
                        session.chain.release(created)?;
                    }
                    return Err(e);
                }
            }
        }

        let mut children = Vec::with_capacity(decisions.len());
        for (decision, orig_cons) in decisions {
            let handle = tree.create_child_node(estimate);
            tree.add_constraint_to_node(handle, NodeConstraint::MasterBranch(decision));
            if let Some(orig_cons) = orig_cons {
                tree.add_constraint_to_node(handle, NodeConstraint::OrigBound(orig_cons));
            }
            children.push((handle, decision));
        }

        session.ui().send(UIUserMessage::Branched { var: c.var, value: c.value, block: Some(c.block), children: children.len() });
        Ok(BranchOutcome::Branched { children })
    }

    /// Runs the state machine over the candidates until children were
    /// created or every candidate was rejected
    fn run(
        &mut self,
        session: &mut Session,
        candidates: Vec<Candidate>,
        activity: &Activity,
        estimate: f64,
        tree: &mut dyn SearchTree,
    ) -> BnpResult<BranchOutcome> {
        let mut remaining = candidates.into_iter();
        self.state = RuleState::SelectFractionalBlock;

        loop {
            self.state = match std::mem::replace(&mut self.state, RuleState::Done) {
                RuleState::SelectFractionalBlock => match remaining.next() {
                    Some(c) => RuleState::BuildSeparatingSet(c),
                    None => {
                        return Err(BnpError::BranchingNotApplicable("no fractional block variable separates the columns".to_string()));
                    }
                },
                RuleState::BuildSeparatingSet(c) => match Self::build_children(session, &c, activity)? {
                    Some(plans) => RuleState::CreateChildren(c, plans),
                    None => RuleState::SelectFractionalBlock,
                },
                RuleState::CreateChildren(c, plans) => {
                    let outcome = Self::create_children(session, &c, plans, estimate, tree)?;
                    self.state = RuleState::Done;
                    return Ok(outcome);
                }
                RuleState::Done => return Ok(BranchOutcome::DidNotFind),
            };
        }
    }
}

impl Default for GenericBranching {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchingRule for GenericBranching {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn exec_lp(&mut self, session: &mut Session, master_sol: &MasterSolution, tree: &mut dyn SearchTree) -> BnpResult<BranchOutcome> {
        let values = session
            .master_sol_to_orig_values(master_sol)
            .map_err(|e| BnpError::BranchingNotApplicable(format!("master solution not representable: {e}")))?;
        let candidates = Self::lp_candidates(session.vars(), &values, session.settings().int_feas_tol);
        if candidates.is_empty() {
            self.state = RuleState::Done;
            return Ok(BranchOutcome::DidNotFind);
        }
        self.run(session, candidates, &Activity::Lp(master_sol), master_sol.obj, tree)
    }

    fn exec_ps(&mut self, session: &mut Session, orig_values: &[f64], tree: &mut dyn SearchTree) -> BnpResult<BranchOutcome> {
        let num_orig = session.vars().num_orig();
        if orig_values.len() != num_orig {
            return Err(BnpError::InvalidBranchingData(format!("{} original values for {num_orig} variables", orig_values.len())));
        }
        let Some(candidate) = Self::ps_candidate(session.vars(), orig_values, session.settings().int_feas_tol)? else {
            self.state = RuleState::Done;
            return Ok(BranchOutcome::DidNotFind);
        };
        let estimate = session.problem().objective(orig_values);
        self.run(session, vec![candidate], &Activity::Pseudo(orig_values), estimate, tree)
    }
}
