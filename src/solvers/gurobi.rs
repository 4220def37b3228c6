use ::gurobi::{attr, param, Constr, ConstrSense, Env, LinExpr, Model, Status, Var, VarType};

use crate::master_problem::{LpStatus, MasterLp};
use crate::misc::{HashMap, MasterVarId, RowId};

// gurobi treats everything beyond 1e30 as infinite
const GRB_INFINITY: f64 = 1e30;

fn finite(v: f64) -> f64 {
    v.clamp(-GRB_INFINITY, GRB_INFINITY)
}

/// Master LP on a gurobi model.
///
/// A row `lhs <= a·λ <= rhs` is kept as a pair of constraints so both sides
/// can be moved independently; its dual is the sum of both duals.
/// Gurobi errors are kept and reported as an aborted solve.
pub struct GurobiMaster {
    model: Model,
    vars: HashMap<MasterVarId, Var>,
    rows: Vec<Option<(Constr, Constr)>>,
    error: Option<::gurobi::Error>,
}

impl GurobiMaster {
    pub fn new(name: &str, seed: i32) -> ::gurobi::Result<Self> {
        let mut env = Env::new("")?;
        env.set(param::Threads, 1)?;
        env.set(param::Seed, seed)?;
        env.set(param::OutputFlag, 0)?;
        let model = Model::new(name, &env)?;
        Ok(Self { model, vars: HashMap::default(), rows: Vec::new(), error: None })
    }

    pub fn set_time_limit(&mut self, seconds: f64) -> ::gurobi::Result<()> {
        self.model.get_env_mut().set(param::TimeLimit, seconds)
    }

    /// First gurobi error since the model was created
    pub fn error(&self) -> Option<&::gurobi::Error> {
        self.error.as_ref()
    }

    fn keep<T>(&mut self, result: ::gurobi::Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.error.get_or_insert(e);
                None
            }
        }
    }

    fn row(&self, row: RowId) -> Option<(Constr, Constr)> {
        self.rows.get(row.index()).cloned().flatten()
    }
}

impl MasterLp for GurobiMaster {
    fn add_var(&mut self, var: MasterVarId, name: &str, obj: f64, lb: f64, ub: f64, rows: &[(RowId, f64)]) {
        let mut constrs = Vec::with_capacity(2 * rows.len());
        let mut coefs = Vec::with_capacity(2 * rows.len());
        for (row, coef) in rows {
            if let Some((lo, up)) = self.row(*row) {
                constrs.extend([lo, up]);
                coefs.extend([*coef, *coef]);
            }
        }
        let added = self.model.add_var(name, VarType::Continuous, obj, finite(lb), finite(ub), &constrs, &coefs);
        if let Some(v) = self.keep(added) {
            self.vars.insert(var, v);
        }
        let updated = self.model.update();
        self.keep(updated);
    }

    fn remove_var(&mut self, var: MasterVarId) {
        if let Some(v) = self.vars.remove(&var) {
            let removed = self.model.remove(v);
            self.keep(removed);
        }
    }

    fn create_linear_constraint(&mut self, name: &str, vars: &[MasterVarId], coefs: &[f64], lhs: f64, rhs: f64) -> RowId {
        let (terms, values): (Vec<Var>, Vec<f64>) =
            vars.iter().zip(coefs).filter_map(|(v, c)| self.vars.get(v).map(|gv| (gv.clone(), *c))).unzip();
        let expr = LinExpr::new().add_terms(&values, &terms);

        let lo = self.model.add_constr(&format!("{name}_lo"), expr.clone(), ConstrSense::Greater, finite(lhs));
        let up = self.model.add_constr(&format!("{name}_up"), expr, ConstrSense::Less, finite(rhs));
        let pair = match (self.keep(lo), self.keep(up)) {
            (Some(lo), Some(up)) => Some((lo, up)),
            _ => None,
        };
        let updated = self.model.update();
        self.keep(updated);

        self.rows.push(pair);
        RowId::from_index(self.rows.len() - 1)
    }

    fn add_coef(&mut self, row: RowId, var: MasterVarId, coef: f64) {
        let (Some((lo, up)), Some(v)) = (self.row(row), self.vars.get(&var).cloned()) else { return };
        let a = self.model.set_coeff(&v, &lo, coef);
        self.keep(a);
        let b = self.model.set_coeff(&v, &up, coef);
        self.keep(b);
    }

    fn change_row_sides(&mut self, row: RowId, lhs: f64, rhs: f64) {
        let Some((lo, up)) = self.row(row) else { return };
        let set = self.model.set_values(attr::RHS, &[lo, up], &[finite(lhs), finite(rhs)]);
        self.keep(set);
    }

    fn release_constraint(&mut self, row: RowId) {
        let Some((lo, up)) = self.rows.get_mut(row.index()).and_then(Option::take) else { return };
        let a = self.model.remove(lo);
        self.keep(a);
        let b = self.model.remove(up);
        self.keep(b);
    }

    fn change_var_bounds(&mut self, var: MasterVarId, lb: f64, ub: f64) {
        let Some(v) = self.vars.get(&var).cloned() else { return };
        let a = self.model.set_values(attr::LB, &[v.clone()], &[finite(lb)]);
        self.keep(a);
        let b = self.model.set_values(attr::UB, &[v], &[finite(ub)]);
        self.keep(b);
    }

    fn optimize(&mut self) -> LpStatus {
        if self.error.is_some() {
            return LpStatus::Aborted;
        }
        let updated = self.model.update();
        if self.keep(updated).is_none() {
            return LpStatus::Aborted;
        }
        let solved = self.model.optimize();
        if self.keep(solved).is_none() {
            return LpStatus::Aborted;
        }
        match self.model.status() {
            Ok(Status::Optimal) => LpStatus::Optimal,
            Ok(Status::Infeasible | Status::InfOrUnbd) => LpStatus::Infeasible,
            Ok(Status::Unbounded) => LpStatus::Unbounded,
            Ok(_) => LpStatus::Aborted,
            Err(e) => {
                self.error.get_or_insert(e);
                LpStatus::Aborted
            }
        }
    }

    fn get_objective(&self) -> f64 {
        self.model.get(attr::ObjVal).unwrap_or(f64::INFINITY)
    }

    fn get_x_list(&self, vars: &[MasterVarId]) -> Vec<f64> {
        vars.iter()
            .map(|v| {
                self.vars
                    .get(v)
                    .and_then(|gv| self.model.get_values(attr::X, &[gv.clone()]).ok())
                    .and_then(|x| x.first().copied())
                    .unwrap_or(0.0)
            })
            .collect()
    }

    fn get_dual_list(&self, rows: &[RowId]) -> Vec<f64> {
        rows.iter()
            .map(|r| {
                self.row(*r)
                    .and_then(|(lo, up)| self.model.get_values(attr::Pi, &[lo, up]).ok())
                    .map_or(0.0, |pi| pi.iter().sum())
            })
            .collect()
    }

    fn get_runtime(&self) -> f64 {
        self.model.get(attr::Runtime).unwrap_or(0.0)
    }
}
