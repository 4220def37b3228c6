#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::needless_return)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::must_use_candidate)]

pub mod branching;
pub mod bridge;
pub mod error;
pub mod heuristics;
pub mod master_problem;
pub mod misc;
pub mod pricing;
pub mod problem;
pub mod session;
pub mod solvers;
pub mod vars;
mod ui;

use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

pub use ui::*;

pub use crate::branching::{BranchOutcome, BranchingRule, BranchingRuleSet};
pub use crate::bridge::OrigSolution;
pub use crate::error::{BnpError, BnpResult};
pub use crate::master_problem::{LpStatus, MasterLp, MasterSolution, Settings};
pub use crate::pricing::{Column, PricingSolver, PricingSolverSet};
pub use crate::problem::{Decomposition, OrigProblem, VarAssignment, VarType};
pub use crate::session::Session;

use crate::heuristics::DivingHeuristic;
use crate::master_problem::branch::OpenNode;
use crate::master_problem::{run_column_generation, ColGenResult};
use crate::misc::node_queue::NodeQueue;
use crate::misc::MasterVarId;

/// Tolerance for integrality and reduced cost decisions
pub const INT_FEAS_TOL: f64 = 1e-5;
/// Tolerance of separating set membership tests
pub const EPSILON: f64 = 1e-9;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    NodeLimit,
    TimeLimit,
    /// some node could not be branched and no solution was found
    Unknown,
}

impl Display for SolveStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SolveStatus::Optimal => "optimal",
            SolveStatus::Feasible => "feasible",
            SolveStatus::Infeasible => "infeasible",
            SolveStatus::NodeLimit => "node limit",
            SolveStatus::TimeLimit => "time limit",
            SolveStatus::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeStatistics {
    pub processed: usize,
    pub branched: usize,
    /// pruned by bound or solved to integrality
    pub cut: usize,
    pub infeasible: usize,
    /// every branching rule declined
    pub unresolved: usize,
}

#[derive(Clone, Debug)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub solution: Option<OrigSolution>,
    /// master columns of the incumbent with their values
    pub columns: Vec<(MasterVarId, f64)>,
    pub dual_bound: f64,
    pub root_obj: Option<f64>,
    pub root_duration: Option<Duration>,
    pub nodes: NodeStatistics,
}

impl SolveResult {
    pub fn obj(&self) -> Option<f64> {
        self.solution.as_ref().map(|s| s.obj)
    }
}

/// What happened to a node after its column generation
enum NodeOutcome {
    Cut,
    Infeasible,
    Solved(OrigSolution, Vec<(MasterVarId, f64)>),
    Branched,
    Unresolved(f64),
}

/// Sequential branch-and-price over a decomposed problem.
///
/// Nodes are processed depth first until the first incumbent is known,
/// then by best bound. Every node moves the master LP to its decision
/// node, runs column generation and either prunes, accepts an integral
/// solution or hands the fractional master solution to the branching rules.
pub struct BranchAndPrice {
    pricing: PricingSolverSet,
    rules: BranchingRuleSet,
}

impl BranchAndPrice {
    pub fn new(pricing: PricingSolverSet, rules: BranchingRuleSet) -> Self {
        Self { pricing, rules }
    }

    pub fn rules(&self) -> &BranchingRuleSet {
        &self.rules
    }

    pub fn solve<L: MasterLp + ?Sized>(&mut self, session: &mut Session, lp: &mut L) -> BnpResult<SolveResult> {
        let start = Instant::now();
        let ui = session.ui().clone();
        let deadline = session.settings().time_limit.map(|tl| start + tl);
        let node_limit = session.settings().node_limit;

        ui.send(UIUserMessage::StartPhase("Branch and Price", 0));
        #[cfg(feature = "validity_assertions")]
        ui.send(UIUserMessage::LogS("Validity Assertions Active"));

        session.build_master(lp)?;

        let mut queue = NodeQueue::new();
        let root_handle = queue.next_handle();
        queue.add_job(OpenNode::root(root_handle, session.root_decision()));

        let mut best: Option<(OrigSolution, Vec<(MasterVarId, f64)>)> = None;
        let mut stats = NodeStatistics::default();
        let mut limit: Option<SolveStatus> = None;
        let mut unresolved_bound = f64::INFINITY;
        let mut root_obj = None;
        let mut root_duration = None;

        while let Some(node) = queue.get_job() {
            let start_node = Instant::now();
            let best_obj = best.as_ref().map_or(f64::INFINITY, |(s, _)| s.obj);

            if deadline.is_some_and(|d| start_node > d) {
                ui.send(UIUserMessage::TimeLimitReached);
                limit = Some(SolveStatus::TimeLimit);
                queue.add_job(node);
                break;
            }
            if node_limit.is_some_and(|n| stats.processed >= n) {
                ui.send(UIUserMessage::LogS("node limit reached"));
                limit = Some(SolveStatus::NodeLimit);
                queue.add_job(node);
                break;
            }

            // test if we can still be better than the best found solution
            if node.special.is_none() && best_obj.is_finite() && session.settings().is_a_cutoff_by_bound_b(node.old_obj_bound, best_obj) {
                ui.send(UIUserMessage::NodeCut { node: node.handle });
                stats.cut += 1;
                session.release_decision(node.decision, lp)?;
                continue;
            }

            ui.send(UIUserMessage::NodeStart(Self::node_state(session, &node, queue.len(), None, best_obj)));

            session.switch_to(node.decision, lp)?;
            session.apply_orig_bounds(&node.orig_bounds, lp);

            let colgen = run_column_generation(session, lp, &mut self.pricing, &node, best_obj, deadline)?;
            stats.processed += 1;

            if node.special.is_some() {
                root_obj = Some(colgen.obj);
                root_duration = Some(start_node.elapsed());
            }

            ui.send(UIUserMessage::NodeFinish(Self::node_state(session, &node, queue.len(), Some(colgen.obj), best_obj)));

            if colgen.time_limit_reached {
                limit = Some(SolveStatus::TimeLimit);
                let mut unfinished = node.clone();
                unfinished.old_obj_bound = unfinished.old_obj_bound.max(colgen.dual_bound.min(colgen.obj));
                queue.add_job(unfinished);
                break;
            }

            let (outcome, dived) = self.evaluate(session, lp, &mut queue, &node, &colgen, best_obj, stats.processed)?;
            if let Some((solution, columns)) = dived {
                ui.send(UIUserMessage::NewBest { obj: solution.obj, node: node.handle });
                if !queue.has_bound() {
                    ui.send(UIUserMessage::LogS("Swapping node comparator"));
                    queue.now_has_bound();
                }
                best = Some((solution, columns));
            }
            let best_obj = best.as_ref().map_or(f64::INFINITY, |(s, _)| s.obj);

            match outcome {
                NodeOutcome::Cut => {
                    ui.send(UIUserMessage::NodeCut { node: node.handle });
                    stats.cut += 1;
                }
                NodeOutcome::Infeasible => {
                    ui.send(UIUserMessage::NodeCut { node: node.handle });
                    stats.infeasible += 1;
                }
                NodeOutcome::Solved(solution, columns) => {
                    stats.cut += 1;
                    if solution.obj < best_obj {
                        ui.send(UIUserMessage::NewBest { obj: solution.obj, node: node.handle });
                        if !queue.has_bound() {
                            ui.send(UIUserMessage::LogS("Swapping node comparator"));
                            queue.now_has_bound();
                        }
                        best = Some((solution, columns));
                    }
                }
                NodeOutcome::Branched => stats.branched += 1,
                NodeOutcome::Unresolved(bound) => {
                    stats.unresolved += 1;
                    unresolved_bound = unresolved_bound.min(bound);
                }
            }

            session.release_decision(node.decision, lp)?;
        }

        let open_bound = queue.drain().iter().map(|n| n.old_obj_bound).fold(unresolved_bound, f64::min);
        session.teardown(lp)?;

        let best_obj = best.as_ref().map_or(f64::INFINITY, |(s, _)| s.obj);
        let status = match (limit, best.is_some()) {
            (Some(limit), _) => limit,
            (None, true) if stats.unresolved == 0 => SolveStatus::Optimal,
            (None, true) => SolveStatus::Feasible,
            (None, false) if stats.unresolved == 0 => SolveStatus::Infeasible,
            (None, false) => SolveStatus::Unknown,
        };
        let dual_bound = if status == SolveStatus::Optimal { best_obj } else { open_bound.min(best_obj) };

        ui.send(UIUserMessage::Log(format!(
            "{status}: obj {best_obj} bound {dual_bound} after {} nodes ({} branched, {} unresolved)",
            stats.processed, stats.branched, stats.unresolved
        )));
        ui.send(UIUserMessage::ExitUi { root_node: root_duration });

        let (solution, columns) = best.map_or((None, Vec::new()), |(s, c)| (Some(s), c));
        Ok(SolveResult { status, solution, columns, dual_bound, root_obj, root_duration, nodes: stats })
    }

    /// Decides a node after its column generation. A solution found by
    /// diving is returned next to the outcome.
    #[allow(clippy::too_many_arguments)]
    fn evaluate<L: MasterLp + ?Sized>(
        &mut self,
        session: &mut Session,
        lp: &mut L,
        queue: &mut NodeQueue,
        node: &OpenNode,
        colgen: &ColGenResult,
        best_obj: f64,
        processed: usize,
    ) -> BnpResult<(NodeOutcome, Option<(OrigSolution, Vec<(MasterVarId, f64)>)>)> {
        // artificials still in use after pricing: the node has no feasible master
        if colgen.infeasible || session.has_positive_artificial(&colgen.solution) {
            return Ok((NodeOutcome::Infeasible, None));
        }

        if best_obj.is_finite() && session.settings().is_a_cutoff_by_bound_b(colgen.dual_bound, best_obj) {
            return Ok((NodeOutcome::Cut, None));
        }

        let feastol = session.settings().feastol;
        if let Ok(orig) = session.master_sol_to_orig_sol(&colgen.solution) {
            if session.problem().check_solution(&orig.values, feastol).is_ok() {
                let columns = Self::nonzero_columns(session, &colgen.solution);
                return Ok((NodeOutcome::Solved(orig, columns), None));
            }
        }

        let mut dived = None;
        let mut incumbent = best_obj;
        if DivingHeuristic::is_due(session, processed) {
            if let Some(found) = DivingHeuristic::run(session, lp, &colgen.solution, Some(&mut self.pricing))? {
                if found.obj < incumbent {
                    incumbent = found.obj;
                    let columns = Self::columns_of(session, &found);
                    dived = Some((found, columns));
                }
            }
        }

        if incumbent.is_finite() && session.settings().is_a_cutoff_by_bound_b(colgen.dual_bound, incumbent) {
            return Ok((NodeOutcome::Cut, dived));
        }

        Ok((self.branch(session, queue, node, colgen)?, dived))
    }

    fn branch(&mut self, session: &mut Session, queue: &mut NodeQueue, node: &OpenNode, colgen: &ColGenResult) -> BnpResult<NodeOutcome> {
        queue.set_focus(node, colgen.obj, colgen.smoothing_center.clone());
        match self.rules.exec_lp(session, &colgen.solution, queue)? {
            BranchOutcome::Branched { children } => {
                queue.commit_children();
                for (_, decision) in children {
                    if decision == node.decision {
                        session.retain_decision(decision)?;
                    }
                }
                Ok(NodeOutcome::Branched)
            }
            BranchOutcome::DidNotFind => {
                queue.discard_children();
                session.ui().send(UIUserMessage::Log(format!("no rule could branch {}", node.handle)));
                Ok(NodeOutcome::Unresolved(colgen.dual_bound))
            }
        }
    }

    fn nonzero_columns(session: &Session, sol: &MasterSolution) -> Vec<(MasterVarId, f64)> {
        let feastol = session.settings().feastol;
        sol.nonzeros(feastol).filter(|(id, _)| session.vars().master(*id).block().is_some()).collect()
    }

    /// Master columns reproducing an original solution
    fn columns_of(session: &Session, solution: &OrigSolution) -> Vec<(MasterVarId, f64)> {
        let columns: Vec<MasterVarId> = session.vars().master_vars().filter(|(_, v)| v.in_lp && v.block().is_some()).map(|(id, _)| id).collect();
        let orig_vars: Vec<_> = session.vars().orig_vars().map(|(id, _)| id).collect();
        let values = session.orig_vals_to_master_vals(&orig_vars, &solution.values, &columns);
        columns.into_iter().zip(values).filter(|(_, v)| v.abs() > session.settings().feastol).collect()
    }

    fn node_state(session: &Session, node: &OpenNode, open: usize, after_obj: Option<f64>, best_obj: f64) -> NodeUIState {
        NodeUIState {
            node: node.handle,
            parent: node.parent,
            depth: node.depth,
            num_columns: session.num_columns(),
            current_open: open,
            last_bound: node.last_bound_display(),
            special: node.special.map_or_else(|| "-".to_string(), |s| s.to_string()),
            before_obj: node.old_obj_bound,
            after_obj,
            best_obj,
        }
    }
}
