use crate::bridge::OrigSolution;
use crate::error::{BnpError, BnpResult};
use crate::master_problem::{DivingSelection, LpStatus, MasterLp, MasterSolution};
use crate::misc::{HashMap, MasterVarId};
use crate::pricing::PricingSolverSet;
use crate::session::Session;
use crate::ui::UIUserMessage;
use crate::vars::MasterVarKind;
use crate::INT_FEAS_TOL;

#[derive(Clone, Copy, Debug, PartialEq)]
struct DiveStep {
    var: MasterVarId,
    lb: f64,
    ub: f64,
    score: f64,
}

/// Diving on the current master LP.
///
/// Every step fixes one more master variable and resolves the LP: a
/// fractional column is rounded up, a fractional integer direct copy is
/// fixed to its nearest integer. With pricing solvers at hand, up to
/// `DivingSettings::pricing_rounds` rounds of column generation follow
/// every fix, so the dive can reach packings the restricted master does
/// not hold yet. The dive ends with the first feasible original
/// solution, an infeasible LP or a failed bridge.
pub struct DivingHeuristic;

impl DivingHeuristic {
    /// Whether the heuristic runs at the `processed`-th node
    pub fn is_due(session: &Session, processed: usize) -> bool {
        let settings = &session.settings().diving;
        settings.enabled && settings.frequency > 0 && processed % settings.frequency == 0
    }

    /// Runs the dive starting from `start`. Bounds changed in the LP are
    /// restored before returning and the LP is solved once more. Columns
    /// priced during the dive stay in the pool.
    pub fn run<L: MasterLp + ?Sized>(
        session: &mut Session,
        lp: &mut L,
        start: &MasterSolution,
        mut pricing: Option<&mut PricingSolverSet>,
    ) -> BnpResult<Option<OrigSolution>> {
        let max_depth = session.settings().diving.max_depth;
        // original (lb, ub) of every variable touched during the dive
        let mut changed: Vec<(MasterVarId, f64, f64)> = Vec::new();
        let mut dive_lb: HashMap<MasterVarId, f64> = HashMap::default();
        let mut found = None;
        let mut sol = start.clone();

        for depth in 0..=max_depth {
            if session.has_positive_artificial(&sol) {
                break;
            }

            if let Ok(orig) = session.master_sol_to_orig_sol(&sol) {
                if session.problem().check_solution(&orig.values, session.settings().feastol).is_ok() {
                    session.ui().send(UIUserMessage::Log(format!("diving found {} at depth {depth}", orig.obj)));
                    found = Some(orig);
                    break;
                }
            } else {
                break;
            }

            if depth == max_depth {
                break;
            }

            let Some(step) = Self::select(session, &sol, &dive_lb) else { break };
            if !changed.iter().any(|(v, _, _)| *v == step.var) {
                let var = session.vars().master(step.var);
                changed.push((step.var, var.lb, var.ub));
            }
            dive_lb.insert(step.var, step.lb);
            lp.change_var_bounds(step.var, step.lb, step.ub);

            if lp.optimize() != LpStatus::Optimal {
                break;
            }
            sol = session.master_solution(lp);
            if let Some(pricing) = pricing.as_deref_mut() {
                match Self::reprice(session, lp, pricing)? {
                    Some(priced) => sol = priced,
                    None => break,
                }
            }
        }

        for (var, lb, ub) in changed.into_iter().rev() {
            lp.change_var_bounds(var, lb, ub);
        }
        if !dive_lb.is_empty() {
            lp.optimize();
        }
        Ok(found)
    }

    /// Column generation under the dive bounds. Returns the new LP
    /// solution, `None` once the LP stops being optimal.
    fn reprice<L: MasterLp + ?Sized>(session: &mut Session, lp: &mut L, pricing: &mut PricingSolverSet) -> BnpResult<Option<MasterSolution>> {
        for _ in 0..session.settings().diving.pricing_rounds {
            let duals = session.get_duals(lp);
            let mut added = false;
            for pb in 0..session.vars().num_blocks() {
                let problem = session.pricing_problem(pb, &duals);
                for mut column in pricing.solve(&problem).columns {
                    if column.block != pb || column.values.len() != problem.vars.len() {
                        return Err(BnpError::InvalidDecomposition(format!("pricing block {pb} returned column {column}")));
                    }
                    column.reduced_cost = problem.reduced_cost(&column.values, column.is_ray);
                    if column.reduced_cost < -INT_FEAS_TOL && session.materialize_column(&column, lp)?.is_some() {
                        added = true;
                    }
                }
            }
            if !added {
                break;
            }
            if lp.optimize() != LpStatus::Optimal {
                return Ok(None);
            }
        }
        Ok(Some(session.master_solution(lp)))
    }

    /// Next variable to fix, `None` if nothing fractional can be fixed
    fn select(session: &Session, sol: &MasterSolution, dive_lb: &HashMap<MasterVarId, f64>) -> Option<DiveStep> {
        let vars = session.vars();
        let settings = session.settings();
        let tol = settings.int_feas_tol;
        let selection = settings.diving.selection;

        // units already forced into every block
        let mut forced = vec![0.0; vars.num_blocks()];
        for (id, lb) in dive_lb {
            if let Some(b) = vars.master(*id).block() {
                forced[b] += lb;
            }
        }

        let score = |x: f64| match selection {
            DivingSelection::ClosestToOne => x.ceil() - x,
            DivingSelection::ClosestToInt => (x - x.round()).abs(),
        };

        let mut best: Option<DiveStep> = None;
        for (id, x) in sol.nonzeros(settings.feastol) {
            if (x - x.round()).abs() <= tol {
                continue;
            }
            let var = vars.master(id);
            let step = match var.kind {
                MasterVarKind::Column { block } if !var.is_ray => {
                    #[allow(clippy::cast_precision_loss)]
                    let k = vars.block(block).multiplicity() as f64;
                    let current = dive_lb.get(&id).copied().unwrap_or(0.0);
                    if forced[block] - current + x.ceil() > k + tol {
                        continue;
                    }
                    DiveStep { var: id, lb: x.ceil(), ub: var.ub, score: score(x) }
                }
                MasterVarKind::DirectCopy => {
                    let Some((ov, _)) = var.orig_vals.first() else { continue };
                    if !vars.orig(*ov).def.vtype.is_integral() {
                        continue;
                    }
                    let r = x.round().clamp(var.lb, var.ub);
                    DiveStep { var: id, lb: r, ub: r, score: score(x) }
                }
                _ => continue,
            };
            if best.map_or(true, |b| step.score < b.score) {
                best = Some(step);
            }
        }
        best
    }
}
