use crate::pricing::{Column, PricingProblem, PricingResult, PricingSolver, PricingStatus};
use crate::EPSILON;

/// Exhaustive pricing over small bounded integer blocks.
/// Returns `NotApplicable` for continuous variables, unbounded domains
/// or more than `limit` points.
pub struct EnumerationSolver {
    limit: usize,
    max_columns: usize,
}

impl EnumerationSolver {
    pub fn new(limit: usize, max_columns: usize) -> Self {
        Self { limit, max_columns: max_columns.max(1) }
    }

    fn domains(&self, problem: &PricingProblem) -> Option<Vec<(i64, i64)>> {
        let mut points: usize = 1;
        let mut domains = Vec::with_capacity(problem.vars.len());
        for v in &problem.vars {
            if !v.vtype.is_integral() || !v.lb.is_finite() || !v.ub.is_finite() {
                return None;
            }
            #[allow(clippy::cast_possible_truncation)]
            let (lo, hi) = ((v.lb - EPSILON).ceil() as i64, (v.ub + EPSILON).floor() as i64);
            if hi < lo {
                return Some(Vec::new());
            }
            let size = usize::try_from(hi - lo + 1).ok()?;
            points = points.checked_mul(size)?;
            if points > self.limit {
                return None;
            }
            domains.push((lo, hi));
        }
        Some(domains)
    }
}

impl Default for EnumerationSolver {
    fn default() -> Self {
        Self::new(1 << 16, 3)
    }
}

impl PricingSolver for EnumerationSolver {
    fn name(&self) -> &'static str {
        "enumeration"
    }

    fn priority(&self) -> i32 {
        -100
    }

    #[allow(clippy::cast_precision_loss)]
    fn solve(&mut self, problem: &PricingProblem) -> PricingResult {
        let Some(domains) = self.domains(problem) else { return PricingResult::not_applicable() };

        // empty domain: the block has no feasible point
        if domains.len() != problem.vars.len() {
            return PricingResult { status: PricingStatus::Optimal, columns: Vec::new(), lower_bound: None };
        }

        let mut current: Vec<i64> = domains.iter().map(|d| d.0).collect();
        let mut values = vec![0.0; current.len()];
        let mut best: Option<f64> = None;
        let mut found: Vec<Column> = Vec::new();

        loop {
            for (v, c) in values.iter_mut().zip(&current) {
                *v = *c as f64;
            }
            if problem.is_feasible(&values, EPSILON) {
                let rc = problem.reduced_cost(&values, false);
                best = Some(best.map_or(rc, |b: f64| b.min(rc)));
                if rc < -EPSILON {
                    found.push(Column::point(problem.block, values.clone(), rc));
                }
            }

            // odometer step
            let mut i = 0;
            while i < current.len() {
                if current[i] < domains[i].1 {
                    current[i] += 1;
                    break;
                }
                current[i] = domains[i].0;
                i += 1;
            }
            if i == current.len() {
                break;
            }
        }

        found.sort_by(|a, b| a.reduced_cost.total_cmp(&b.reduced_cost));
        found.truncate(self.max_columns);
        PricingResult { status: PricingStatus::Optimal, columns: found, lower_bound: best }
    }
}
