//! Original (compact) problem and the decomposition proposed for it.
//!
//! Both are plain input data. The session turns them into the variable
//! registry and the master problem.

use std::fmt::{Display, Formatter};

use crate::error::{BnpError, BnpResult};
use crate::misc::OrigVarId;
use crate::{EPSILON, INT_FEAS_TOL};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VarType {
    Binary,
    Integer,
    Continuous,
}

impl VarType {
    pub fn is_integral(self) -> bool {
        !matches!(self, VarType::Continuous)
    }
}

#[derive(Clone, Debug)]
pub struct OrigVarDef {
    pub name: String,
    pub vtype: VarType,
    pub lb: f64,
    pub ub: f64,
    pub obj: f64,
}

#[derive(Clone, Debug)]
/// Linear row `lhs <= Σ coef·x <= rhs`
pub struct LinearCons {
    pub name: String,
    pub entries: Vec<(OrigVarId, f64)>,
    pub lhs: f64,
    pub rhs: f64,
}

impl LinearCons {
    pub fn activity(&self, values: &[f64]) -> f64 {
        self.entries.iter().map(|(v, c)| c * values[v.index()]).sum()
    }
}

#[derive(Clone, Debug, Default)]
/// Minimisation problem over the original variables
pub struct OrigProblem {
    pub vars: Vec<OrigVarDef>,
    pub conss: Vec<LinearCons>,
}

impl OrigProblem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_var(&mut self, name: &str, vtype: VarType, lb: f64, ub: f64, obj: f64) -> OrigVarId {
        let (lb, ub) = match vtype {
            VarType::Binary => (lb.max(0.0), ub.min(1.0)),
            _ => (lb, ub),
        };
        self.vars.push(OrigVarDef { name: name.to_string(), vtype, lb, ub, obj });
        OrigVarId::from_index(self.vars.len() - 1)
    }

    pub fn add_cons(&mut self, name: &str, entries: Vec<(OrigVarId, f64)>, lhs: f64, rhs: f64) -> usize {
        self.conss.push(LinearCons { name: name.to_string(), entries, lhs, rhs });
        self.conss.len() - 1
    }

    pub fn objective(&self, values: &[f64]) -> f64 {
        self.vars.iter().zip(values).map(|(v, x)| v.obj * x).sum()
    }

    /// Checks bounds, integrality and rows of an original solution.
    /// Returns the first violation found.
    pub fn check_solution(&self, values: &[f64], feastol: f64) -> Result<(), String> {
        if values.len() != self.vars.len() {
            return Err(format!("solution has {} values for {} variables", values.len(), self.vars.len()));
        }

        for (def, x) in self.vars.iter().zip(values) {
            if *x < def.lb - feastol || *x > def.ub + feastol {
                return Err(format!("{} = {} outside [{}, {}]", def.name, x, def.lb, def.ub));
            }
            if def.vtype.is_integral() && (x - x.round()).abs() > INT_FEAS_TOL {
                return Err(format!("{} = {} is fractional", def.name, x));
            }
        }

        for cons in &self.conss {
            let act = cons.activity(values);
            if act < cons.lhs - feastol || act > cons.rhs + feastol {
                return Err(format!("{}: activity {} outside [{}, {}]", cons.name, act, cons.lhs, cons.rhs));
            }
        }

        Ok(())
    }
}


#[derive(Clone, Debug, PartialEq, Eq)]
/// Where the decomposition puts an original variable
pub enum VarAssignment {
    /// stays in the master problem only
    Master,
    /// shared by the listed blocks
    Linking(Vec<usize>),
    /// belongs to exactly one block
    Block(usize),
}

impl Display for VarAssignment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VarAssignment::Master => write!(f, "-1"),
            VarAssignment::Linking(_) => write!(f, "-2"),
            VarAssignment::Block(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Decomposition {
    pub nblocks: usize,
    pub vars: Vec<VarAssignment>,
    /// `None` marks a coupling (master) constraint
    pub conss: Vec<Option<usize>>,
    /// groups of identical blocks, aggregated into one pricing problem
    pub identical: Vec<Vec<usize>>,
}

impl Decomposition {
    /// Decomposition without identical blocks
    pub fn new(nblocks: usize, vars: Vec<VarAssignment>, conss: Vec<Option<usize>>) -> Self {
        Self { nblocks, vars, conss, identical: Vec::new() }
    }

    pub fn with_identical_blocks(mut self, groups: Vec<Vec<usize>>) -> Self {
        self.identical = groups;
        self
    }

    /// Pricing problems in order: one per identical group, ordered by the
    /// representative block. Blocks not listed in any group form their own
    /// group.
    pub fn pricing_groups(&self) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut seen = vec![false; self.nblocks];
        for block in 0..self.nblocks {
            if seen[block] {
                continue;
            }
            let group = self
                .identical
                .iter()
                .find(|g| g.first() == Some(&block))
                .cloned()
                .unwrap_or_else(|| vec![block]);
            for b in &group {
                seen[*b] = true;
            }
            groups.push(group);
        }
        groups
    }

    /// Original variables of a block, in problem order
    pub fn block_vars(&self, block: usize) -> Vec<OrigVarId> {
        self.vars
            .iter()
            .enumerate()
            .filter(|(_, a)| **a == VarAssignment::Block(block))
            .map(|(i, _)| OrigVarId::from_index(i))
            .collect()
    }

    pub fn validate(&self, problem: &OrigProblem) -> BnpResult<()> {
        let invalid = |msg: String| Err(BnpError::InvalidDecomposition(msg));

        if self.vars.len() != problem.vars.len() {
            return invalid(format!("{} variable assignments for {} variables", self.vars.len(), problem.vars.len()));
        }
        if self.conss.len() != problem.conss.len() {
            return invalid(format!("{} constraint assignments for {} constraints", self.conss.len(), problem.conss.len()));
        }

        for (i, a) in self.vars.iter().enumerate() {
            match a {
                VarAssignment::Block(b) if *b >= self.nblocks => {
                    return invalid(format!("variable {} assigned to block {b} of {}", problem.vars[i].name, self.nblocks));
                }
                VarAssignment::Linking(blocks) => {
                    if blocks.len() < 2 {
                        return invalid(format!("linking variable {} spans fewer than two blocks", problem.vars[i].name));
                    }
                    if let Some(b) = blocks.iter().find(|b| **b >= self.nblocks) {
                        return invalid(format!("linking variable {} spans unknown block {b}", problem.vars[i].name));
                    }
                }
                _ => {}
            }
        }

        for (c, assignment) in self.conss.iter().enumerate() {
            let Some(block) = assignment else { continue };
            if *block >= self.nblocks {
                return invalid(format!("constraint {} assigned to block {block} of {}", problem.conss[c].name, self.nblocks));
            }
            for (var, _) in &problem.conss[c].entries {
                let ok = match &self.vars[var.index()] {
                    VarAssignment::Block(b) => b == block,
                    VarAssignment::Linking(blocks) => blocks.contains(block),
                    VarAssignment::Master => false,
                };
                if !ok {
                    return invalid(format!("constraint {} of block {block} uses {} outside the block", problem.conss[c].name, problem.vars[var.index()].name));
                }
            }
        }

        let mut in_group = vec![false; self.nblocks];
        for group in &self.identical {
            let Some(first) = group.first() else {
                return invalid("empty identical block group".to_string());
            };
            let nvars = self.block_vars(*first).len();
            for b in group {
                if *b >= self.nblocks || in_group[*b] {
                    return invalid(format!("block {b} listed twice or unknown in identical groups"));
                }
                in_group[*b] = true;
                if self.block_vars(*b).len() != nvars {
                    return invalid(format!("identical blocks {first} and {b} differ in size"));
                }
                if let Some(diff) = self.identical_mismatch(problem, *first, *b) {
                    return invalid(format!("identical blocks {first} and {b} differ: {diff}"));
                }
            }
            if group.windows(2).any(|w| w[0] > w[1]) {
                return invalid("identical block groups must be sorted".to_string());
            }
            // linking variables would need one copy per aggregated block
            if self.vars.iter().any(|a| matches!(a, VarAssignment::Linking(bs) if bs.iter().any(|b| group.len() > 1 && group.contains(b)))) {
                return invalid(format!("aggregated block group {group:?} is touched by a linking variable"));
            }
        }

        Ok(())
    }

    /// First difference between two blocks of the same size, compared
    /// position by position: variable data, coupling coefficients and
    /// block rows in problem order
    fn identical_mismatch(&self, problem: &OrigProblem, first: usize, other: usize) -> Option<String> {
        let differs = |a: f64, b: f64| !(a == b || (a - b).abs() <= EPSILON);
        let vars_a = self.block_vars(first);
        let vars_b = self.block_vars(other);

        for (a, b) in vars_a.iter().zip(&vars_b) {
            let (da, db) = (&problem.vars[a.index()], &problem.vars[b.index()]);
            if da.vtype != db.vtype || differs(da.obj, db.obj) || differs(da.lb, db.lb) || differs(da.ub, db.ub) {
                return Some(format!("variables {} and {}", da.name, db.name));
            }
        }

        // coefficients of a row by block position
        let dense = |cons: &LinearCons, vars: &[OrigVarId]| -> Vec<f64> {
            vars.iter()
                .map(|v| cons.entries.iter().filter(|(e, _)| e == v).map(|(_, c)| c).sum())
                .collect()
        };

        for (c, assignment) in self.conss.iter().enumerate() {
            if assignment.is_some() {
                continue;
            }
            let cons = &problem.conss[c];
            if dense(cons, &vars_a).iter().zip(dense(cons, &vars_b)).any(|(a, b)| differs(*a, b)) {
                return Some(format!("coefficients in {}", cons.name));
            }
        }

        let rows_of = |block: usize| -> Vec<&LinearCons> {
            self.conss
                .iter()
                .enumerate()
                .filter(|(_, a)| **a == Some(block))
                .map(|(c, _)| &problem.conss[c])
                .collect()
        };
        let (rows_a, rows_b) = (rows_of(first), rows_of(other));
        if rows_a.len() != rows_b.len() {
            return Some(format!("{} against {} block rows", rows_a.len(), rows_b.len()));
        }
        for (ra, rb) in rows_a.iter().zip(&rows_b) {
            let coefs_differ = dense(ra, &vars_a).iter().zip(dense(rb, &vars_b)).any(|(a, b)| differs(*a, b));
            if coefs_differ || differs(ra.lhs, rb.lhs) || differs(ra.rhs, rb.rhs) {
                return Some(format!("rows {} and {}", ra.name, rb.name));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two one-variable blocks sharing `x0 + x1 >= 1`, each with `x <= 1`
    fn twins(obj: [f64; 2], coupling: [f64; 2]) -> (OrigProblem, Decomposition) {
        let mut problem = OrigProblem::new();
        let x0 = problem.add_var("x0", VarType::Integer, 0.0, 3.0, obj[0]);
        let x1 = problem.add_var("x1", VarType::Integer, 0.0, 3.0, obj[1]);
        problem.add_cons("cap0", vec![(x0, 1.0)], f64::NEG_INFINITY, 1.0);
        problem.add_cons("cap1", vec![(x1, 1.0)], f64::NEG_INFINITY, 1.0);
        problem.add_cons("cover", vec![(x0, coupling[0]), (x1, coupling[1])], 1.0, f64::INFINITY);
        let decomposition = Decomposition::new(2, vec![VarAssignment::Block(0), VarAssignment::Block(1)], vec![Some(0), Some(1), None])
            .with_identical_blocks(vec![vec![0, 1]]);
        (problem, decomposition)
    }

    #[test]
    fn identical_blocks_are_compared_by_position() {
        let (problem, decomposition) = twins([1.0, 1.0], [1.0, 1.0]);
        assert!(decomposition.validate(&problem).is_ok());

        let (problem, decomposition) = twins([1.0, 2.0], [1.0, 1.0]);
        assert!(matches!(decomposition.validate(&problem), Err(BnpError::InvalidDecomposition(msg)) if msg.contains("x0 and x1")));

        let (problem, decomposition) = twins([1.0, 1.0], [1.0, 3.0]);
        assert!(matches!(decomposition.validate(&problem), Err(BnpError::InvalidDecomposition(msg)) if msg.contains("cover")));
    }

    #[test]
    fn identical_blocks_need_matching_rows() {
        let (mut problem, decomposition) = twins([1.0, 1.0], [1.0, 1.0]);
        problem.conss[1].rhs = 2.0;
        assert!(matches!(decomposition.validate(&problem), Err(BnpError::InvalidDecomposition(msg)) if msg.contains("cap0 and cap1")));
    }
}
