use crate::branching::activation::{activate_column, rows_of_column};
use crate::error::{BnpError, BnpResult};
use crate::master_problem::{MasterLp, MasterSolution};
use crate::misc::{fingerprint, FullHashMap, HashMap, MasterVarId, RowId};
use crate::pricing::Column;
use crate::session::Session;
use crate::vars::{MasterVar, MasterVarKind, VarRegistry};
use crate::EPSILON;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Column ticket: number of master variables known at some point.
/// A decision node records the ticket it last checked columns up to.
/// When it is activated again it only needs to look at the columns
/// created after its ticket.
pub struct ColumnTicket(pub usize);

/// Index of all generated columns, for duplicate detection
#[derive(Clone, Debug, Default)]
pub struct ColumnPool {
    by_fingerprint: FullHashMap<u64, Vec<MasterVarId>>,
    count: usize,
}

impl ColumnPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of columns in pool
    pub fn count(&self) -> usize {
        self.count
    }

    /// Ticket covering every master variable created so far
    pub fn ticket(vars: &VarRegistry) -> ColumnTicket {
        ColumnTicket(vars.num_master())
    }

    /// Existing column with the same block, ray flag and generator
    pub fn find(&self, vars: &VarRegistry, block: usize, is_ray: bool, generator: &[(usize, f64)]) -> Option<MasterVarId> {
        self.by_fingerprint
            .get(&fingerprint(block, is_ray, generator))?
            .iter()
            .copied()
            .find(|id| {
                let var = vars.master(*id);
                !var.released
                    && var.block() == Some(block)
                    && var.is_ray == is_ray
                    && var.generator.len() == generator.len()
                    && var.generator.iter().zip(generator).all(|(a, b)| a.0 == b.0 && (a.1 - b.1).abs() <= EPSILON)
            })
    }

    pub fn insert(&mut self, block: usize, is_ray: bool, generator: &[(usize, f64)], id: MasterVarId) {
        self.by_fingerprint.entry(fingerprint(block, is_ray, generator)).or_default().push(id);
        self.count += 1;
    }
}

impl Session {
    /// Turns a pricing column into a master variable.
    ///
    /// Returns `None` if the same column is already in the LP. A duplicate
    /// that was aged out of the LP is inserted again instead of being
    /// created twice. The new variable runs through the column activation
    /// before this returns.
    pub fn materialize_column<L: MasterLp + ?Sized>(&mut self, column: &Column, lp: &mut L) -> BnpResult<Option<MasterVarId>> {
        let pb = column.block;
        if pb >= self.vars.num_blocks() {
            return Err(BnpError::InvalidDecomposition(format!("column for unknown pricing block {pb}")));
        }
        let block = self.vars.block(pb);
        if column.values.len() != block.vars.len() {
            return Err(BnpError::InvalidDecomposition(format!(
                "column of block {pb} has {} values for {} pricing variables",
                column.values.len(),
                block.vars.len()
            )));
        }

        let generator = column.generator();

        if let Some(existing) = self.pool.find(&self.vars, pb, column.is_ray, &generator) {
            if self.vars.master(existing).in_lp {
                return Ok(None);
            }
            self.reinsert_column(existing, lp)?;
            return Ok(Some(existing));
        }

        let orig_vals: Vec<_> = generator
            .iter()
            .map(|(pos, val)| (self.vars.pricing(block.vars[*pos]), *val))
            .filter(|(p, _)| !p.linking)
            .map(|(p, val)| (p.orig_vars[0], val))
            .collect();
        let obj = orig_vals.iter().map(|(ov, val)| self.vars.orig(*ov).def.obj * val).sum();

        let var = MasterVar {
            name: format!("{}_b{pb}{}", self.vars.next_master_id(), if column.is_ray { "r" } else { "" }),
            kind: MasterVarKind::Column { block: pb },
            is_ray: column.is_ray,
            obj,
            lb: 0.0,
            ub: f64::INFINITY,
            orig_vals,
            generator,
            in_lp: true,
            released: false,
            age: 0,
        };
        let id = self.vars.add_master_var(var);
        let rows = self.static_rows_of(id);
        let var = self.vars.master(id);
        lp.add_var(id, &var.name, var.obj, var.lb, var.ub, &rows);

        activate_column(&mut self.chain, &self.vars, id, lp)?;

        let var = self.vars.master(id);
        self.pool.insert(pb, var.is_ray, &var.generator, id);
        Ok(Some(id))
    }

    /// Coefficients of a master variable in the coupling, convexity and
    /// linking rows. Branching rows are handled by the column activation.
    pub(crate) fn static_rows_of(&self, id: MasterVarId) -> Vec<(RowId, f64)> {
        let var = self.vars.master(id);
        let mut rows: HashMap<RowId, f64> = HashMap::default();

        for (ov, val) in &var.orig_vals {
            for (coef, cons) in &self.vars.orig(*ov).master_rows {
                if let Some(row) = self.rows.coupling_row(*cons) {
                    *rows.entry(row).or_default() += coef * val;
                }
            }
        }

        match var.kind {
            MasterVarKind::Column { block } => {
                if !var.is_ray {
                    *rows.entry(self.rows.convexity[block]).or_default() += 1.0;
                }
                let pricing_vars = &self.vars.block(block).vars;
                for (pos, val) in &var.generator {
                    let p = self.vars.pricing(pricing_vars[*pos]);
                    if p.linking {
                        if let Some(row) = self.rows.linking_row(p.orig_vars[0], block) {
                            *rows.entry(row).or_default() -= val;
                        }
                    }
                }
            }
            MasterVarKind::DirectCopy => {
                for (ov, _) in &var.orig_vals {
                    for link in self.rows.linking.iter().filter(|l| l.var == *ov) {
                        *rows.entry(link.row).or_default() += 1.0;
                    }
                }
            }
            MasterVarKind::Artificial => {}
        }

        let mut rows: Vec<(RowId, f64)> = rows.into_iter().filter(|(_, c)| *c != 0.0).collect();
        rows.sort_unstable_by_key(|(r, _)| *r);
        rows
    }

    /// Puts an aged-out column back into the LP. Its branching rows are the
    /// decisions that enrolled it, the enrollment itself never changes.
    fn reinsert_column<L: MasterLp + ?Sized>(&mut self, id: MasterVarId, lp: &mut L) -> BnpResult<()> {
        let mut rows = self.static_rows_of(id);
        let enrolled = rows_of_column(&self.chain, id);
        #[cfg(feature = "validity_assertions")]
        for (decision, _) in &enrolled {
            let data = self.chain.node(*decision)?.data();
            assert!(data.is_some_and(|d| crate::branching::activation::column_in_decision(self.vars.master(id), d)));
        }
        rows.extend(enrolled.into_iter().map(|(_, row)| (row, 1.0)));

        let var = self.vars.master_mut(id);
        var.in_lp = true;
        var.age = 0;
        let var = self.vars.master(id);
        lp.add_var(id, &var.name, var.obj, var.lb, var.ub, &rows);
        Ok(())
    }

    /// Increases the age of every unused column in the LP and removes those
    /// older than `max_column_age`. Returns the number of removed columns.
    pub fn age_columns<L: MasterLp + ?Sized>(&mut self, sol: &MasterSolution, lp: &mut L) -> usize {
        let Some(max_age) = self.settings.max_column_age else { return 0 };
        let mut removed = 0;
        for (id, value) in &sol.values {
            let var = self.vars.master_mut(*id);
            if var.block().is_none() || !var.in_lp {
                continue;
            }
            if *value > self.settings.feastol {
                var.age = 0;
                continue;
            }
            var.age += 1;
            // columns forced up by a bound stay
            if var.age > max_age && var.lb <= 0.0 {
                var.in_lp = false;
                lp.remove_var(*id);
                removed += 1;
            }
        }
        removed
    }

    /// Destroys a master variable for good, e.g. when the host deletes it
    pub fn release_master_var<L: MasterLp + ?Sized>(&mut self, id: MasterVarId, lp: &mut L) -> BnpResult<()> {
        if self.vars.try_master(id)?.in_lp {
            lp.remove_var(id);
        }
        self.vars.release_master_var(id)
    }
}
