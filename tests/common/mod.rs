// Shared fixtures: a small dense simplex standing in for the host LP and
// a few toy decompositions.
#![allow(dead_code)]

use std::collections::HashMap;

use dw_bnp::branching::{NodeConstraint, SearchTree};
use dw_bnp::master_problem::{LpStatus, MasterLp};
use dw_bnp::misc::{MasterVarId, NodeHandle, RowId};
use dw_bnp::problem::{Decomposition, OrigProblem, VarAssignment, VarType};
use dw_bnp::{Session, Settings, UISender};

const TOL: f64 = 1e-9;

#[derive(Clone, Debug)]
struct DenseVar {
    id: MasterVarId,
    obj: f64,
    lb: f64,
    ub: f64,
}

#[derive(Clone, Debug)]
struct DenseRow {
    coefs: HashMap<MasterVarId, f64>,
    lhs: f64,
    rhs: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Sense {
    Le,
    Ge,
    Eq,
}

/// Master LP solved by a two phase tableau simplex with Bland's rule.
/// Only meant for the handful of rows and columns of the tests.
#[derive(Clone, Debug, Default)]
pub struct DenseLp {
    vars: Vec<DenseVar>,
    rows: Vec<Option<DenseRow>>,
    x: HashMap<MasterVarId, f64>,
    duals: Vec<f64>,
    obj: f64,
    pub solves: usize,
}

impl DenseLp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_var(&self, var: MasterVarId) -> bool {
        self.vars.iter().any(|v| v.id == var)
    }

    pub fn var_bounds(&self, var: MasterVarId) -> Option<(f64, f64)> {
        self.vars.iter().find(|v| v.id == var).map(|v| (v.lb, v.ub))
    }

    /// Coefficient of a variable in a row, zero if absent
    pub fn coef(&self, row: RowId, var: MasterVarId) -> f64 {
        self.rows
            .get(row.index())
            .and_then(Option::as_ref)
            .and_then(|r| r.coefs.get(&var).copied())
            .unwrap_or(0.0)
    }

    pub fn row_sides(&self, row: RowId) -> Option<(f64, f64)> {
        self.rows.get(row.index()).and_then(Option::as_ref).map(|r| (r.lhs, r.rhs))
    }

    pub fn is_row_alive(&self, row: RowId) -> bool {
        self.row_sides(row).is_some()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.is_some()).count()
    }

    fn solve(&mut self) -> LpStatus {
        let n = self.vars.len();
        if self.vars.iter().any(|v| !v.lb.is_finite()) {
            return LpStatus::Aborted;
        }

        // (dense coefficients, sense, rhs, master row)
        let mut cons: Vec<(Vec<f64>, Sense, f64, Option<usize>)> = Vec::new();
        for (r, row) in self.rows.iter().enumerate() {
            let Some(row) = row else { continue };
            let a: Vec<f64> = self.vars.iter().map(|v| row.coefs.get(&v.id).copied().unwrap_or(0.0)).collect();
            let shift: f64 = a.iter().zip(&self.vars).map(|(c, v)| c * v.lb).sum();
            if row.lhs.is_finite() && row.rhs.is_finite() && (row.lhs - row.rhs).abs() <= TOL {
                cons.push((a, Sense::Eq, row.rhs - shift, Some(r)));
                continue;
            }
            if row.lhs.is_finite() {
                cons.push((a.clone(), Sense::Ge, row.lhs - shift, Some(r)));
            }
            if row.rhs.is_finite() {
                cons.push((a, Sense::Le, row.rhs - shift, Some(r)));
            }
        }
        for (j, v) in self.vars.iter().enumerate() {
            if v.ub.is_finite() {
                let mut a = vec![0.0; n];
                a[j] = 1.0;
                cons.push((a, Sense::Le, v.ub - v.lb, None));
            }
        }

        let m = cons.len();
        let slacks = cons.iter().filter(|c| c.1 != Sense::Eq).count();
        let art0 = n + slacks;
        let width = art0 + m;
        let mut t = vec![vec![0.0; width + 1]; m];
        let mut sign = vec![1.0; m];
        let mut basis: Vec<usize> = (art0..width).collect();

        let mut s = n;
        for (k, (a, sense, b, _)) in cons.iter().enumerate() {
            t[k][..n].copy_from_slice(a);
            match sense {
                Sense::Le => {
                    t[k][s] = 1.0;
                    s += 1;
                }
                Sense::Ge => {
                    t[k][s] = -1.0;
                    s += 1;
                }
                Sense::Eq => {}
            }
            t[k][width] = *b;
            if *b < 0.0 {
                sign[k] = -1.0;
                for e in &mut t[k] {
                    *e = -*e;
                }
            }
            t[k][art0 + k] = 1.0;
        }

        let phase1: Vec<f64> = (0..width).map(|j| if j >= art0 { 1.0 } else { 0.0 }).collect();
        if let Err(status) = run_simplex(&mut t, &mut basis, &phase1, width) {
            return status;
        }
        let infeasibility: f64 = (0..m).filter(|k| basis[*k] >= art0).map(|k| t[k][width]).sum();
        if infeasibility > 1e-7 {
            return LpStatus::Infeasible;
        }

        // artificials left in the basis sit at zero, move them out where possible
        for k in 0..m {
            if basis[k] < art0 {
                continue;
            }
            if let Some(j) = (0..art0).find(|j| t[k][*j].abs() > 1e-9 && !basis.contains(j)) {
                pivot(&mut t, &mut basis, k, j);
            }
        }

        let phase2: Vec<f64> = (0..width).map(|j| if j < n { self.vars[j].obj } else { 0.0 }).collect();
        if let Err(status) = run_simplex(&mut t, &mut basis, &phase2, art0) {
            return status;
        }

        self.x = self.vars.iter().map(|v| (v.id, v.lb)).collect();
        for (k, b) in basis.iter().enumerate() {
            if *b < n {
                *self.x.entry(self.vars[*b].id).or_default() += t[k][width];
            }
        }
        self.obj = self.vars.iter().map(|v| v.obj * self.x[&v.id]).sum();

        // y = c_B B^-1, the artificial columns hold B^-1
        self.duals = vec![0.0; self.rows.len()];
        for (k, (_, _, _, row)) in cons.iter().enumerate() {
            let Some(row) = row else { continue };
            let y: f64 = (0..m).map(|r| phase2[basis[r]] * t[r][art0 + k]).sum();
            self.duals[*row] += sign[k] * y;
        }
        LpStatus::Optimal
    }
}

fn pivot(t: &mut [Vec<f64>], basis: &mut [usize], row: usize, col: usize) {
    let p = t[row][col];
    for e in &mut t[row] {
        *e /= p;
    }
    let pivot_row = t[row].clone();
    for (k, r) in t.iter_mut().enumerate() {
        if k == row {
            continue;
        }
        let f = r[col];
        if f.abs() > 0.0 {
            for (e, pe) in r.iter_mut().zip(&pivot_row) {
                *e -= f * pe;
            }
        }
    }
    basis[row] = col;
}

/// Minimises `cost` over the tableau; only columns below `enter_limit`
/// may enter the basis
fn run_simplex(t: &mut [Vec<f64>], basis: &mut [usize], cost: &[f64], enter_limit: usize) -> Result<(), LpStatus> {
    let m = t.len();
    let rhs = cost.len();
    for _ in 0..10_000 {
        let entering = (0..enter_limit).find(|j| {
            if basis.contains(j) {
                return false;
            }
            let rc = cost[*j] - (0..m).map(|k| cost[basis[k]] * t[k][*j]).sum::<f64>();
            rc < -TOL
        });
        let Some(j) = entering else { return Ok(()) };

        let mut leave: Option<(usize, f64)> = None;
        for k in 0..m {
            if t[k][j] > TOL {
                let ratio = t[k][rhs] / t[k][j];
                leave = match leave {
                    Some((l, best)) if ratio > best + TOL || ((ratio - best).abs() <= TOL && basis[k] > basis[l]) => Some((l, best)),
                    _ => Some((k, ratio)),
                };
            }
        }
        let Some((k, _)) = leave else { return Err(LpStatus::Unbounded) };
        pivot(t, basis, k, j);
    }
    Err(LpStatus::Aborted)
}

impl MasterLp for DenseLp {
    fn add_var(&mut self, var: MasterVarId, _name: &str, obj: f64, lb: f64, ub: f64, rows: &[(RowId, f64)]) {
        self.vars.push(DenseVar { id: var, obj, lb, ub });
        for (row, coef) in rows {
            if let Some(Some(r)) = self.rows.get_mut(row.index()) {
                r.coefs.insert(var, *coef);
            }
        }
    }

    fn remove_var(&mut self, var: MasterVarId) {
        self.vars.retain(|v| v.id != var);
        for row in self.rows.iter_mut().flatten() {
            row.coefs.remove(&var);
        }
        self.x.remove(&var);
    }

    fn create_linear_constraint(&mut self, _name: &str, vars: &[MasterVarId], coefs: &[f64], lhs: f64, rhs: f64) -> RowId {
        let coefs = vars.iter().copied().zip(coefs.iter().copied()).collect();
        self.rows.push(Some(DenseRow { coefs, lhs, rhs }));
        RowId(u32::try_from(self.rows.len() - 1).unwrap())
    }

    fn add_coef(&mut self, row: RowId, var: MasterVarId, coef: f64) {
        if let Some(Some(r)) = self.rows.get_mut(row.index()) {
            *r.coefs.entry(var).or_default() += coef;
        }
    }

    fn change_row_sides(&mut self, row: RowId, lhs: f64, rhs: f64) {
        if let Some(Some(r)) = self.rows.get_mut(row.index()) {
            r.lhs = lhs;
            r.rhs = rhs;
        }
    }

    fn release_constraint(&mut self, row: RowId) {
        if let Some(r) = self.rows.get_mut(row.index()) {
            *r = None;
        }
    }

    fn change_var_bounds(&mut self, var: MasterVarId, lb: f64, ub: f64) {
        if let Some(v) = self.vars.iter_mut().find(|v| v.id == var) {
            v.lb = lb;
            v.ub = ub;
        }
    }

    fn optimize(&mut self) -> LpStatus {
        self.solves += 1;
        self.solve()
    }

    fn get_objective(&self) -> f64 {
        self.obj
    }

    fn get_x_list(&self, vars: &[MasterVarId]) -> Vec<f64> {
        vars.iter().map(|v| self.x.get(v).copied().unwrap_or(0.0)).collect()
    }

    fn get_dual_list(&self, rows: &[RowId]) -> Vec<f64> {
        rows.iter().map(|r| self.duals.get(r.index()).copied().unwrap_or(0.0)).collect()
    }
}

pub fn test_settings() -> Settings {
    Settings { artificial_cost: 1e3, max_column_age: None, ..Settings::default() }
}

/// One integer variable `x` in `[0, 5]` per block, each block alone,
/// coupled by `Σ x = 5`. Costs grow with the block index.
pub fn single_var_blocks(nblocks: usize) -> (OrigProblem, Decomposition) {
    let mut problem = OrigProblem::new();
    let mut vars = Vec::new();
    for b in 0..nblocks {
        #[allow(clippy::cast_precision_loss)]
        vars.push(problem.add_var(&format!("x{b}"), VarType::Integer, 0.0, 5.0, 1.0 + b as f64));
    }
    problem.add_cons("sum", vars.iter().map(|v| (*v, 1.0)).collect(), 5.0, 5.0);
    let decomposition = Decomposition::new(nblocks, (0..nblocks).map(VarAssignment::Block).collect(), vec![None]);
    (problem, decomposition)
}

/// Two machines, three items of weight 2 and capacity 4.
/// Assigning item i to machine m costs `cost[m][i]`.
pub fn assignment(cost: [[f64; 3]; 2]) -> (OrigProblem, Decomposition) {
    let mut problem = OrigProblem::new();
    let mut x = [[None; 3]; 2];
    for (m, row) in cost.iter().enumerate() {
        for (i, c) in row.iter().enumerate() {
            x[m][i] = Some(problem.add_var(&format!("x{m}_{i}"), VarType::Binary, 0.0, 1.0, *c));
        }
    }
    let x = x.map(|row| row.map(|v| v.unwrap()));

    let mut conss = Vec::new();
    for (m, row) in x.iter().enumerate() {
        problem.add_cons(&format!("cap{m}"), row.iter().map(|v| (*v, 2.0)).collect(), f64::NEG_INFINITY, 4.0);
        conss.push(Some(m));
    }
    for i in 0..3 {
        problem.add_cons(&format!("item{i}"), vec![(x[0][i], 1.0), (x[1][i], 1.0)], 1.0, 1.0);
        conss.push(None);
    }

    let assignments = (0..6).map(|v| VarAssignment::Block(v / 3)).collect();
    (problem, Decomposition::new(2, assignments, conss))
}

/// Two identical bins of capacity 4 opened at cost 1, three items of
/// weight 2 that each cost 1 to pack. The LP opens 1.5 bins, the best
/// packing costs 5.
pub fn bin_packing() -> (OrigProblem, Decomposition) {
    let mut problem = OrigProblem::new();
    let mut x = Vec::new();
    let mut open = Vec::new();
    for b in 0..2 {
        x.push((0..3).map(|i| problem.add_var(&format!("x{b}_{i}"), VarType::Binary, 0.0, 1.0, 1.0)).collect::<Vec<_>>());
        open.push(problem.add_var(&format!("y{b}"), VarType::Binary, 0.0, 1.0, 1.0));
    }

    let mut conss = Vec::new();
    for b in 0..2 {
        let mut entries: Vec<_> = x[b].iter().map(|v| (*v, 2.0)).collect();
        entries.push((open[b], -4.0));
        problem.add_cons(&format!("cap{b}"), entries, f64::NEG_INFINITY, 0.0);
        conss.push(Some(b));
    }
    for i in 0..3 {
        problem.add_cons(&format!("item{i}"), vec![(x[0][i], 1.0), (x[1][i], 1.0)], 1.0, 1.0);
        conss.push(None);
    }

    // block b owns x[b][0..3] and y[b], in problem order
    let assignments = (0..8).map(|v| VarAssignment::Block(v / 4)).collect();
    let decomposition = Decomposition::new(2, assignments, conss).with_identical_blocks(vec![vec![0, 1]]);
    (problem, decomposition)
}

/// Block variable `x` in `[0, 3]`, master-only integer `y` in `[0, 4]`
/// and `x + y >= 2.5`
pub fn with_master_var() -> (OrigProblem, Decomposition) {
    let mut problem = OrigProblem::new();
    let x = problem.add_var("x", VarType::Integer, 0.0, 3.0, 1.0);
    let y = problem.add_var("y", VarType::Integer, 0.0, 4.0, 1.0);
    problem.add_cons("cover", vec![(x, 1.0), (y, 1.0)], 2.5, f64::INFINITY);
    let decomposition = Decomposition::new(1, vec![VarAssignment::Block(0), VarAssignment::Master], vec![None]);
    (problem, decomposition)
}

pub fn session_for((problem, decomposition): (OrigProblem, Decomposition)) -> Session {
    Session::new(problem, decomposition, test_settings(), UISender::silent()).unwrap()
}

/// Search tree that only records the children and their constraints
#[derive(Default)]
pub struct RecordingTree {
    pub children: Vec<(f64, Vec<NodeConstraint>)>,
}

impl SearchTree for RecordingTree {
    fn create_child_node(&mut self, estimate: f64) -> NodeHandle {
        self.children.push((estimate, Vec::new()));
        NodeHandle(u32::try_from(self.children.len() - 1).unwrap())
    }

    fn add_constraint_to_node(&mut self, node: NodeHandle, cons: NodeConstraint) {
        self.children[node.index()].1.push(cons);
    }
}
