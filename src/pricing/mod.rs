//! Pricing problems and the solvers that price them.
//!
//! The core only builds the pricing problem of each block from the
//! current duals and recomputes reduced costs. Solving is done by
//! [`PricingSolver`] implementations supplied by the user; the built-in
//! [`EnumerationSolver`] only handles tiny bounded integer blocks.

use std::fmt::{Display, Formatter};

use crate::branching::SeparatingSet;
use crate::problem::VarType;
use crate::EPSILON;

mod enumeration;

pub use enumeration::EnumerationSolver;

#[derive(Clone, Debug, PartialEq)]
pub struct PricingVarData {
    pub name: String,
    pub vtype: VarType,
    pub lb: f64,
    pub ub: f64,
    /// reduced cost coefficient under the current duals
    pub cost: f64,
}

#[derive(Clone, Debug, PartialEq)]
/// Block constraint in pricing positions
pub struct PricingRow {
    pub name: String,
    pub entries: Vec<(usize, f64)>,
    pub lhs: f64,
    pub rhs: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PricingProblem {
    pub block: usize,
    /// number of identical blocks this problem stands for
    pub multiplicity: usize,
    pub vars: Vec<PricingVarData>,
    pub conss: Vec<PricingRow>,
    pub convexity_dual: f64,
    /// separating sets of the active decisions of this block, with the
    /// dual of their master row
    pub branch_duals: Vec<(SeparatingSet, f64)>,
}

impl PricingProblem {
    pub fn objective(&self, values: &[f64]) -> f64 {
        self.vars.iter().zip(values).map(|(v, x)| v.cost * x).sum()
    }

    /// Exact reduced cost of a point or ray, including the duals of every
    /// branching row whose separating set contains it
    pub fn reduced_cost(&self, values: &[f64], is_ray: bool) -> f64 {
        let mut rc = self.objective(values);
        if !is_ray {
            rc -= self.convexity_dual;
        }
        for (set, dual) in &self.branch_duals {
            if set.contains_dense(values) {
                rc -= dual;
            }
        }
        rc
    }

    /// Bounds and block constraints within `tol`
    pub fn is_feasible(&self, values: &[f64], tol: f64) -> bool {
        values.len() == self.vars.len()
            && self.vars.iter().zip(values).all(|(v, x)| *x >= v.lb - tol && *x <= v.ub + tol)
            && self.conss.iter().all(|c| {
                let act: f64 = c.entries.iter().map(|(p, a)| a * values[*p]).sum();
                act >= c.lhs - tol && act <= c.rhs + tol
            })
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Point or ray found by a pricing solver, values in the block's
/// variable order
pub struct Column {
    pub block: usize,
    pub values: Vec<f64>,
    pub is_ray: bool,
    pub reduced_cost: f64,
}

impl Column {
    pub fn point(block: usize, values: Vec<f64>, reduced_cost: f64) -> Self {
        Self { block, values, is_ray: false, reduced_cost }
    }

    /// Non-zero entries, sorted by position
    pub fn generator(&self) -> Vec<(usize, f64)> {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.abs() > EPSILON)
            .map(|(p, v)| (p, *v))
            .collect()
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{} rc={:.6} {:?}", self.block, self.reduced_cost, self.generator())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PricingStatus {
    /// solved to optimality, the columns include the best one
    Optimal,
    /// columns may be improving but optimality is not proven
    Heuristic,
    /// solver can not handle this problem
    NotApplicable,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PricingResult {
    pub status: PricingStatus,
    pub columns: Vec<Column>,
    /// smallest reduced cost over the block, if proven
    pub lower_bound: Option<f64>,
}

impl PricingResult {
    pub fn not_applicable() -> Self {
        Self { status: PricingStatus::NotApplicable, columns: Vec::new(), lower_bound: None }
    }
}

/// Primary trait to implement the pricing problem
pub trait PricingSolver {
    fn name(&self) -> &'static str;

    /// Solvers are tried in descending priority
    fn priority(&self) -> i32 {
        0
    }

    /// Given the pricing problem of one block, find columns of negative
    /// reduced cost
    fn solve(&mut self, problem: &PricingProblem) -> PricingResult;
}

/// Outcome of pricing one block with all applicable solvers
#[derive(Clone, Debug, PartialEq)]
pub struct BlockPricing {
    pub columns: Vec<Column>,
    /// whether an exact solver answered
    pub exact: bool,
    pub lower_bound: Option<f64>,
}

#[derive(Default)]
pub struct PricingSolverSet {
    solvers: Vec<Box<dyn PricingSolver>>,
}

impl PricingSolverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, solver: Box<dyn PricingSolver>) {
        self.solvers.push(solver);
        self.solvers.sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    pub fn is_empty(&self) -> bool {
        self.solvers.is_empty()
    }

    /// Runs the solvers in priority order. A heuristic answer with
    /// improving columns is accepted, otherwise the next solver is tried
    /// until one answers exactly.
    pub fn solve(&mut self, problem: &PricingProblem) -> BlockPricing {
        let mut collected = Vec::new();
        for solver in &mut self.solvers {
            let res = solver.solve(problem);
            match res.status {
                PricingStatus::NotApplicable => continue,
                PricingStatus::Optimal => {
                    collected.extend(res.columns);
                    return BlockPricing { columns: collected, exact: true, lower_bound: res.lower_bound };
                }
                PricingStatus::Heuristic => {
                    let improving = res.columns.iter().any(|c| c.reduced_cost < -EPSILON);
                    collected.extend(res.columns);
                    if improving {
                        return BlockPricing { columns: collected, exact: false, lower_bound: None };
                    }
                }
            }
        }
        BlockPricing { columns: collected, exact: false, lower_bound: None }
    }
}
