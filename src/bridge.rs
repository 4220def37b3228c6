//! Translation between master solutions and original-space points.

use crate::error::{BnpError, BnpResult};
use crate::master_problem::MasterSolution;
use crate::misc::{HashMap, MasterVarId, OrigVarId};
use crate::session::Session;
use crate::ui::UIUserMessage;
use crate::vars::{MasterVarKind, VarRegistry};

#[derive(Clone, Debug, PartialEq)]
pub struct OrigSolution {
    pub values: Vec<f64>,
    pub obj: f64,
}

#[derive(Clone, Debug, PartialEq)]
/// Raw result of the bridge before bound checks
pub struct BridgedPoint {
    pub values: Vec<f64>,
    /// clamped violations, reported as `NumericAnomaly`
    pub anomalies: Vec<BnpError>,
    /// violations too large to clamp: (variable, violation)
    pub violations: Vec<(OrigVarId, f64)>,
}

/// Maps a master solution to original space.
///
/// Whole units of a point column go to the identical block copies in
/// round-robin order; the fractional remainders fill the copies one after
/// the other, each copy taking at most one unit in total. Rays only
/// contribute whole units. Direct copies add their value to their
/// variable. Fails if a block receives more than its multiplicity or an
/// artificial variable is positive.
pub fn master_to_orig(vars: &VarRegistry, sol: &MasterSolution, feastol: f64, clamp_factor: f64) -> BnpResult<BridgedPoint> {
    let mut values = vec![0.0; vars.num_orig()];
    let nblocks = vars.num_blocks();
    let mut next_copy = vec![0usize; nblocks];
    let mut filled = vec![0.0f64; nblocks];
    let mut remainders: Vec<(MasterVarId, f64)> = Vec::new();
    let mut rays: Vec<(MasterVarId, f64)> = Vec::new();

    let add_to_copy = |values: &mut Vec<f64>, id: MasterVarId, copy: usize, scale: f64| {
        for (ov, val) in &vars.master(id).orig_vals {
            let target = vars
                .orig(*ov)
                .pricing_var
                .and_then(|p| vars.pricing(p).orig_vars.get(copy).copied())
                .unwrap_or(*ov);
            values[target.index()] += scale * val;
        }
    };

    let mut entries: Vec<(MasterVarId, f64)> = sol.nonzeros(feastol).collect();
    entries.sort_unstable_by_key(|(id, _)| *id);

    for (id, m) in entries {
        let var = vars.try_master(id)?;
        match var.kind {
            MasterVarKind::Artificial => {
                return Err(BnpError::InfeasibleBridge(format!("artificial {} has value {m}", var.name)));
            }
            MasterVarKind::DirectCopy => {
                for (ov, coef) in &var.orig_vals {
                    values[ov.index()] += coef * m;
                }
            }
            MasterVarKind::Column { .. } if var.is_ray => rays.push((id, m)),
            MasterVarKind::Column { block } => {
                let k = vars.block(block).multiplicity();
                let units = (m + feastol).floor();
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let whole = units as usize;
                for _ in 0..whole {
                    if next_copy[block] >= k {
                        return Err(BnpError::InfeasibleBridge(format!("block {block} used more than {k} times")));
                    }
                    add_to_copy(&mut values, id, next_copy[block], 1.0);
                    next_copy[block] += 1;
                }
                let rest = m - units;
                if rest > feastol {
                    remainders.push((id, rest));
                }
            }
        }
    }

    for (id, mut rest) in remainders {
        let Some(block) = vars.master(id).block() else { continue };
        let k = vars.block(block).multiplicity();
        while rest > feastol {
            if next_copy[block] >= k {
                return Err(BnpError::InfeasibleBridge(format!("block {block} used more than {k} times")));
            }
            let take = rest.min(1.0 - filled[block]);
            add_to_copy(&mut values, id, next_copy[block], take);
            filled[block] += take;
            rest -= take;
            if filled[block] >= 1.0 - feastol {
                filled[block] = 0.0;
                next_copy[block] += 1;
            }
        }
    }

    // rays scale the last copy used and never consume convexity
    for (id, m) in rays {
        let Some(block) = vars.master(id).block() else { continue };
        let k = vars.block(block).multiplicity();
        let copy = next_copy[block].min(k.saturating_sub(1));
        let units = (m + feastol).floor();
        add_to_copy(&mut values, id, copy, units);
    }

    let mut anomalies = Vec::new();
    let mut violations = Vec::new();
    for (ov, orig) in vars.orig_vars() {
        let x = values[ov.index()];
        let (bound, violation) = if x < orig.def.lb {
            (orig.def.lb, orig.def.lb - x)
        } else if x > orig.def.ub {
            (orig.def.ub, x - orig.def.ub)
        } else {
            continue;
        };
        if violation <= feastol {
            values[ov.index()] = bound;
        } else if violation < clamp_factor * feastol {
            values[ov.index()] = bound;
            anomalies.push(BnpError::NumericAnomaly { var: ov, value: x, bound, violation });
        } else {
            violations.push((ov, violation));
        }
    }

    Ok(BridgedPoint { values, anomalies, violations })
}

/// Inverse direction: distributes original values onto the given master
/// variables. Every master variable containing an original variable gets
/// `coef / ‖orig_vals‖² · value`, so a single column is reproduced exactly.
pub fn orig_to_master(vars: &VarRegistry, orig_vars: &[OrigVarId], orig_vals: &[f64], master_vars: &[MasterVarId]) -> Vec<f64> {
    let mut out = vec![0.0; master_vars.len()];
    let position: HashMap<MasterVarId, usize> = master_vars.iter().enumerate().map(|(i, m)| (*m, i)).collect();

    for (ov, x) in orig_vars.iter().zip(orig_vals) {
        if *x == 0.0 || ov.index() >= vars.num_orig() {
            continue;
        }
        for (m, coef) in &vars.orig(*ov).master_vars {
            let Some(i) = position.get(m) else { continue };
            let norm: f64 = vars.master(*m).orig_vals.iter().map(|(_, v)| v * v).sum();
            if norm > 0.0 {
                out[*i] += coef / norm * x;
            }
        }
    }
    out
}

impl Session {
    /// Original solution of a master solution. Small violations are clamped
    /// and reported, larger ones make the bridge fail.
    pub fn master_sol_to_orig_sol(&self, sol: &MasterSolution) -> BnpResult<OrigSolution> {
        let settings = self.settings();
        let point = master_to_orig(self.vars(), sol, settings.feastol, settings.bridge_clamp_factor)?;
        for anomaly in point.anomalies {
            if let BnpError::NumericAnomaly { var, value, bound, violation } = anomaly {
                self.ui().send(UIUserMessage::NumericAnomaly { var, value, bound, violation });
            }
        }
        if let Some((var, violation)) = point.violations.first() {
            return Err(BnpError::InfeasibleBridge(format!("{var} violates its bounds by {violation:e}")));
        }
        let obj = self.problem().objective(&point.values);
        Ok(OrigSolution { values: point.values, obj })
    }

    /// Original values of a master solution without bound checks, used for
    /// branching on fractional points
    pub fn master_sol_to_orig_values(&self, sol: &MasterSolution) -> BnpResult<Vec<f64>> {
        let settings = self.settings();
        Ok(master_to_orig(self.vars(), sol, settings.feastol, settings.bridge_clamp_factor)?.values)
    }

    pub fn orig_vals_to_master_vals(&self, orig_vars: &[OrigVarId], orig_vals: &[f64], master_vars: &[MasterVarId]) -> Vec<f64> {
        orig_to_master(self.vars(), orig_vars, orig_vals, master_vars)
    }
}
