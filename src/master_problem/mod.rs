use std::borrow::Cow;
use std::time::{Duration, Instant};

use crate::error::{BnpError, BnpResult};
use crate::master_problem::branch::OpenNode;
use crate::misc::{DecisionId, MasterVarId, RowId};
use crate::pricing::{Column, PricingSolverSet};
use crate::session::Session;
use crate::ui::{LPSolveIterationUIState, PricingProblemUIState, UIUserMessage};
use crate::{EPSILON, INT_FEAS_TOL};

pub mod branch;
pub mod column_pool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LpStatus {
    Optimal,
    Infeasible,
    Unbounded,
    /// time limit or numerical trouble
    Aborted,
}

/// Trait for the master linear program of the host.
///
/// Rows are identified by the `RowId` the host hands out, variables by
/// the core's `MasterVarId`. Minimisation.
pub trait MasterLp {
    /// Adds a variable together with its coefficients in existing rows
    fn add_var(&mut self, var: MasterVarId, name: &str, obj: f64, lb: f64, ub: f64, rows: &[(RowId, f64)]);

    /// Removes a variable from the LP; it may be added again later
    fn remove_var(&mut self, var: MasterVarId);

    /// Creates the row `lhs <= Σ coef·var <= rhs`
    fn create_linear_constraint(&mut self, name: &str, vars: &[MasterVarId], coefs: &[f64], lhs: f64, rhs: f64) -> RowId;

    fn add_coef(&mut self, row: RowId, var: MasterVarId, coef: f64);

    fn change_row_sides(&mut self, row: RowId, lhs: f64, rhs: f64);

    /// Deletes a row for good
    fn release_constraint(&mut self, row: RowId);

    fn change_var_bounds(&mut self, var: MasterVarId, lb: f64, ub: f64);

    // Run optimization.
    fn optimize(&mut self) -> LpStatus;

    // Return optimal objective function
    fn get_objective(&self) -> f64;

    // Return solution values for the list of variables
    fn get_x_list(&self, vars: &[MasterVarId]) -> Vec<f64>;

    // Return dual values for list of constraints
    fn get_dual_list(&self, rows: &[RowId]) -> Vec<f64>;

    // Return runtime of the last optimization in seconds
    fn get_runtime(&self) -> f64 {
        0.0
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
/// Values of all master variables currently in the LP
pub struct MasterSolution {
    pub obj: f64,
    pub values: Vec<(MasterVarId, f64)>,
}

impl MasterSolution {
    pub fn value(&self, var: MasterVarId) -> f64 {
        self.values.iter().find(|(v, _)| *v == var).map_or(0.0, |(_, x)| *x)
    }

    pub fn nonzeros(&self, tol: f64) -> impl Iterator<Item = (MasterVarId, f64)> + '_ {
        self.values.iter().copied().filter(move |(_, x)| x.abs() > tol)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
/// Duals of the master rows
pub struct DualStore {
    /// one per coupling row, in row order
    pub coupling: Vec<f64>,
    /// one per pricing block
    pub convexity: Vec<f64>,
    /// one per linking row
    pub linking: Vec<f64>,
    /// rows of the active decisions
    pub branching: Vec<(DecisionId, f64)>,
}

impl DualStore {
    /// Perform the linear combination following Wentges rule:
    /// `alpha · self + (1 - alpha) · out_duals`.
    /// If alpha <= 0, return borrowed cow
    pub fn linear_combination<'a>(&self, alpha: f64, out_duals: &'a Self) -> Cow<'a, Self> {
        if alpha <= 0.0 {
            return Cow::Borrowed(out_duals);
        }

        let mix = |center: &[f64], out: &[f64]| -> Vec<f64> {
            out.iter()
                .enumerate()
                .map(|(i, o)| center.get(i).map_or(*o, |c| alpha * c + (1.0 - alpha) * o))
                .collect()
        };

        Cow::Owned(DualStore {
            coupling: mix(&self.coupling, &out_duals.coupling),
            convexity: mix(&self.convexity, &out_duals.convexity),
            linking: mix(&self.linking, &out_duals.linking),
            // decisions unknown to the center keep their real dual
            branching: out_duals
                .branching
                .iter()
                .map(|(d, o)| {
                    let c = self.branching.iter().find(|(cd, _)| cd == d).map_or(*o, |(_, c)| *c);
                    (*d, alpha * c + (1.0 - alpha) * o)
                })
                .collect(),
        })
    }

    pub fn branching_dual(&self, decision: DecisionId) -> f64 {
        self.branching.iter().find(|(d, _)| *d == decision).map_or(0.0, |(_, v)| *v)
    }
}

#[derive(Clone, Debug)]
/// Settings for dual stabilization following the Wentges rule
pub struct StabilizationSettings {
    pub cross_iteration_memory: bool,
    pub initial_smoothing_alpha: f64,
    pub maximum_smoothing_alpha: f64,

    pub alpha_steps_up: f64,
    pub alpha_steps_down: f64,
}

impl StabilizationSettings {
    pub fn disabled() -> Self {
        Self {
            cross_iteration_memory: false,
            initial_smoothing_alpha: 0.0,
            maximum_smoothing_alpha: 0.0,
            alpha_steps_up: 0.0,
            alpha_steps_down: 0.0,
        }
    }

    pub fn wentges() -> Self {
        Self {
            cross_iteration_memory: true,
            initial_smoothing_alpha: 0.5,
            maximum_smoothing_alpha: 0.9,
            alpha_steps_up: 0.1,
            alpha_steps_down: 0.25,
        }
    }
}

impl Default for StabilizationSettings {
    fn default() -> Self {
        Self::disabled()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Candidate order of the diving heuristic.
/// Either the column that is closest to one (always rounded up),
/// or the least fractional value.
pub enum DivingSelection {
    ClosestToOne,
    ClosestToInt,
}

#[derive(Clone, Debug)]
pub struct DivingSettings {
    pub enabled: bool,
    /// dive at every n-th processed node
    pub frequency: usize,
    pub max_depth: usize,
    pub selection: DivingSelection,
    /// column generation rounds after every fix, 0 dives price-free
    pub pricing_rounds: usize,
}

impl Default for DivingSettings {
    fn default() -> Self {
        Self { enabled: true, frequency: 1, max_depth: 50, selection: DivingSelection::ClosestToOne, pricing_rounds: 10 }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub feastol: f64,
    pub int_feas_tol: f64,
    /// violations below `bridge_clamp_factor · feastol` are clamped
    pub bridge_clamp_factor: f64,
    pub artificial_cost: f64,
    pub columns_per_block_per_iteration: usize,
    /// `None` keeps every column in the LP
    pub max_column_age: Option<u32>,
    pub max_colgen_iterations: Option<usize>,
    pub time_limit: Option<Duration>,
    pub node_limit: Option<usize>,
    /// objective is known to be integral, bounds may be rounded up
    pub integral_objective: bool,
    pub stabilization: StabilizationSettings,
    pub diving: DivingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feastol: 1e-6,
            int_feas_tol: INT_FEAS_TOL,
            bridge_clamp_factor: 10.0,
            artificial_cost: 1e6,
            columns_per_block_per_iteration: 3,
            max_column_age: Some(20),
            max_colgen_iterations: None,
            time_limit: None,
            node_limit: None,
            integral_objective: false,
            stabilization: StabilizationSettings::default(),
            diving: DivingSettings::default(),
        }
    }
}

impl Settings {
    /// Rule to cutoff nodes once a primal bound was found.
    ///
    /// Suppose the objective function is known to be integral, the current
    /// bound b is 5, and the candidate value a is 4.5:
    ///     The node may be cut early
    pub fn is_a_cutoff_by_bound_b(&self, a: f64, b: f64) -> bool {
        if self.integral_objective {
            (a - self.int_feas_tol).ceil() >= b - self.int_feas_tol
        } else {
            a >= b - self.feastol * b.abs().max(1.0)
        }
    }
}

/// Internal struct storing the results of a column generation run
pub struct ColGenResult {
    pub obj: f64,
    pub solution: MasterSolution,
    /// best Lagrangian bound seen, at least the parent's bound
    pub dual_bound: f64,
    pub time_limit_reached: bool,
    pub infeasible: bool,
    pub smoothing_center: Option<(f64, DualStore)>,
    pub iterations: usize,
}

/// Main function running the column generation of one node.
///
/// Solves the master LP, prices every block with the (smoothed) duals and
/// adds improving columns until none is found or the Lagrangian bound
/// proves that the node can not beat `best_int_obj`.
pub fn run_column_generation<L: MasterLp + ?Sized>(
    session: &mut Session,
    lp: &mut L,
    pricing: &mut PricingSolverSet,
    node: &OpenNode,
    best_int_obj: f64,
    deadline: Option<Instant>,
) -> BnpResult<ColGenResult> {
    let stabilization = session.settings().stabilization.clone();
    let columns_per_block = session.settings().columns_per_block_per_iteration.max(1);
    let max_iterations = session.settings().max_colgen_iterations;

    let mut previous_pricing_runtime = 0.0;
    let mut total_new_columns = 0;
    let mut hit_time_limit = false;
    let mut iterations = 0;

    // initial with parent center
    let mut best_dual_bound_with_store: Option<(f64, DualStore)> = node.old_obj_dual_center.clone();
    let mut lagrangian_bound = node.old_obj_bound;
    let mut current_smoothing_alpha = stabilization.initial_smoothing_alpha;

    loop {
        if let Some(tl) = deadline {
            if Instant::now() > tl {
                session.ui().send(UIUserMessage::TimeLimitReached);
                hit_time_limit = true;
                break;
            }
        }

        if !stabilization.cross_iteration_memory {
            current_smoothing_alpha = stabilization.initial_smoothing_alpha;
        }

        iterations += 1;

        match lp.optimize() {
            LpStatus::Optimal => {}
            status => {
                session.ui().send(UIUserMessage::Log(format!("master lp ended with {status:?}")));
                return Ok(ColGenResult {
                    obj: f64::INFINITY,
                    solution: MasterSolution::default(),
                    dual_bound: f64::INFINITY,
                    time_limit_reached: false,
                    infeasible: true,
                    smoothing_center: None,
                    iterations,
                });
            }
        }

        let master_obj = lp.get_objective();

        session.ui().send(
            // we show the previous pricing runtime, as that was the pricing that was done for this lp
            UIUserMessage::LPSolveIterationFinish(LPSolveIterationUIState {
                best_dual_bound: best_dual_bound_with_store.as_ref().map(|db| db.0),
                obj: master_obj,
                lp_runtime: lp.get_runtime(),
                previous_pricing_runtime,
                num_columns: session.num_columns_in_lp(),
                num_total_pool_columns: session.num_columns(),
            }),
        );

        if max_iterations.is_some_and(|m| iterations > m) {
            session.ui().send(UIUserMessage::LogS("column generation iteration limit"));
            break;
        }

        let real_duals = session.get_duals(lp);
        let start_pricing = Instant::now();

        let price_all = |session: &Session, pricing: &mut PricingSolverSet, duals: &DualStore| {
            (0..session.vars().num_blocks())
                .map(|pb| {
                    let problem = session.pricing_problem(pb, duals);
                    (pb, pricing.solve(&problem))
                })
                .collect::<Vec<_>>()
        };

        // filter on the real duals, smoothed duals may misprice
        let real_problems: Vec<_> = (0..session.vars().num_blocks()).map(|pb| session.pricing_problem(pb, &real_duals)).collect();
        let improving = |cols: Vec<Column>| -> BnpResult<Vec<Column>> {
            let mut kept = Vec::with_capacity(cols.len());
            for mut c in cols {
                let problem = real_problems
                    .get(c.block)
                    .ok_or_else(|| BnpError::InvalidDecomposition(format!("pricing returned column {c} of unknown block {}", c.block)))?;
                if c.values.len() != problem.vars.len() {
                    return Err(BnpError::InvalidDecomposition(format!(
                        "pricing returned column {c} with {} values for {} variables",
                        c.values.len(),
                        problem.vars.len()
                    )));
                }
                c.reduced_cost = problem.reduced_cost(&c.values, c.is_ray);
                if c.reduced_cost < -INT_FEAS_TOL {
                    kept.push(c);
                }
            }
            Ok(kept)
        };

        let (new_columns, exact_bounds): (Vec<Column>, Option<Vec<(usize, f64)>>) =
            if let (Some((_, in_duals)), true) = (&best_dual_bound_with_store, current_smoothing_alpha > INT_FEAS_TOL) {
                let mut new_columns;
                loop {
                    let smooth_duals = in_duals.linear_combination(current_smoothing_alpha, &real_duals);
                    // find columns via smooth duals, that are then still neg reduced cost on real duals
                    new_columns = improving(price_all(session, pricing, &smooth_duals).into_iter().flat_map(|(_, r)| r.columns).collect())?;

                    // if we have none, we must reduce smoothing
                    if new_columns.is_empty() {
                        if current_smoothing_alpha > INT_FEAS_TOL {
                            session.ui().send(UIUserMessage::LogS("Misprice"));
                            current_smoothing_alpha = (current_smoothing_alpha - stabilization.alpha_steps_down).max(0.0);
                            if current_smoothing_alpha <= INT_FEAS_TOL {
                                break;
                            }
                            continue;
                        }
                    } else if current_smoothing_alpha <= stabilization.maximum_smoothing_alpha && stabilization.alpha_steps_up > INT_FEAS_TOL {
                        // had found columns, trust center more
                        current_smoothing_alpha = (current_smoothing_alpha + stabilization.alpha_steps_up).min(stabilization.maximum_smoothing_alpha);
                    }
                    break;
                }

                if new_columns.is_empty() {
                    // smoothing fully backed off, price with the real duals
                    let priced = price_all(session, pricing, &real_duals);
                    let bounds = exact_block_bounds(&priced);
                    (improving(priced.into_iter().flat_map(|(_, r)| r.columns).collect())?, bounds)
                } else {
                    (new_columns, None)
                }
            } else {
                // if we have the real duals, we can just find neg red cost
                let priced = price_all(session, pricing, &real_duals);
                let bounds = exact_block_bounds(&priced);
                (improving(priced.into_iter().flat_map(|(_, r)| r.columns).collect())?, bounds)
            };

        previous_pricing_runtime = start_pricing.elapsed().as_secs_f64();

        // Lagrangian bound: z + Σ_b K_b · min(0, rc_b), only valid for exact pricing on real duals
        let dual_bound = exact_bounds.map(|bounds| {
            master_obj
                + bounds
                    .iter()
                    .map(|(pb, rc)| {
                        #[allow(clippy::cast_precision_loss)]
                        let k = session.vars().block(*pb).multiplicity() as f64;
                        k * rc.min(0.0)
                    })
                    .sum::<f64>()
        });

        if let Some(dual_bound) = dual_bound {
            let best_dual_bound = best_dual_bound_with_store.as_ref().map_or(f64::MIN, |(val, _)| *val);
            if dual_bound > best_dual_bound {
                best_dual_bound_with_store = Some((dual_bound, real_duals.clone()));
            }
            lagrangian_bound = lagrangian_bound.max(dual_bound);
        }

        session.ui().send(UIUserMessage::PricingProblemFinish(PricingProblemUIState {
            runtime: previous_pricing_runtime,
            num_columns: new_columns.len(),
            dual_bound: dual_bound.unwrap_or(f64::NAN),
        }));

        if new_columns.is_empty() {
            break;
        }

        if (master_obj - lagrangian_bound).abs() <= INT_FEAS_TOL * master_obj.abs().max(1.0) {
            session.ui().send(UIUserMessage::Log(format!("Exit pricing due to primal/dual bound {lagrangian_bound} / {master_obj}")));
            break;
        }

        if best_int_obj.is_finite() && session.settings().is_a_cutoff_by_bound_b(lagrangian_bound, best_int_obj) {
            session.ui().send(UIUserMessage::Log(format!("Exit pricing due to best/dual bound {lagrangian_bound} / {best_int_obj}")));
            break;
        }

        let mut has_new_column = false;
        for column in select_columns(new_columns, columns_per_block) {
            if session.materialize_column(&column, lp)?.is_some() {
                has_new_column = true;
                total_new_columns += 1;
            }
        }

        if !has_new_column {
            session.ui().send(UIUserMessage::LogS("only known columns priced, stalling"));
            break;
        }

        let sol = session.master_solution(lp);
        session.age_columns(&sol, lp);
    }

    let solution = session.master_solution(lp);
    session.ui().send(UIUserMessage::Log(format!("column generation added {total_new_columns} columns in {iterations} iterations")));

    Ok(ColGenResult {
        obj: solution.obj,
        dual_bound: lagrangian_bound.min(solution.obj),
        solution,
        time_limit_reached: hit_time_limit,
        infeasible: false,
        smoothing_center: best_dual_bound_with_store,
        iterations,
    })
}

/// Smallest reduced cost per block if every block was priced exactly
fn exact_block_bounds(priced: &[(usize, crate::pricing::BlockPricing)]) -> Option<Vec<(usize, f64)>> {
    priced
        .iter()
        .map(|(pb, r)| match (r.exact, r.lower_bound) {
            (true, Some(lb)) => Some((*pb, lb)),
            // exact and infeasible block, the convexity row carries it
            (true, None) => Some((*pb, 0.0)),
            _ => None,
        })
        .collect()
}

/// Best columns first, at most `per_block` per pricing block
fn select_columns(mut columns: Vec<Column>, per_block: usize) -> Vec<Column> {
    columns.sort_by(|a, b| a.reduced_cost.total_cmp(&b.reduced_cost).then(a.block.cmp(&b.block)));
    let mut taken: Vec<usize> = Vec::new();
    columns
        .into_iter()
        .filter(|c| {
            if taken.len() <= c.block {
                taken.resize(c.block + 1, 0);
            }
            taken[c.block] += 1;
            taken[c.block] <= per_block && c.reduced_cost < -EPSILON
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn duals(v: f64, decision: u32) -> DualStore {
        DualStore {
            coupling: vec![v, 2.0 * v],
            convexity: vec![v],
            linking: vec![],
            branching: vec![(DecisionId(decision), v)],
        }
    }

    #[test]
    fn smoothing_mixes_towards_the_center() {
        let center = duals(1.0, 0);
        let out = duals(3.0, 0);

        assert_eq!(center.linear_combination(0.0, &out).as_ref(), &out);

        let alpha = StabilizationSettings::wentges().initial_smoothing_alpha;
        let mixed = center.linear_combination(alpha, &out);
        assert_relative_eq!(mixed.coupling[0], 2.0);
        assert_relative_eq!(mixed.coupling[1], 4.0);
        assert_relative_eq!(mixed.convexity[0], 2.0);
        assert_relative_eq!(mixed.branching_dual(DecisionId(0)), 2.0);
    }

    #[test]
    fn new_branching_rows_keep_their_dual() {
        let center = duals(1.0, 0);
        let mut out = duals(3.0, 0);
        out.coupling.push(5.0);
        out.branching.push((DecisionId(7), -4.0));

        let mixed = center.linear_combination(0.5, &out);
        assert_relative_eq!(mixed.coupling[2], 5.0);
        assert_relative_eq!(mixed.branching_dual(DecisionId(7)), -4.0);
        assert_eq!(mixed.branching_dual(DecisionId(9)), 0.0);
    }

    #[test]
    fn integral_objective_cuts_earlier() {
        let mut settings = Settings::default();
        assert!(!settings.is_a_cutoff_by_bound_b(4.5, 5.0));
        assert!(settings.is_a_cutoff_by_bound_b(5.0, 5.0));

        settings.integral_objective = true;
        assert!(settings.is_a_cutoff_by_bound_b(4.5, 5.0));
        assert!(!settings.is_a_cutoff_by_bound_b(3.9, 5.0));
    }
}
