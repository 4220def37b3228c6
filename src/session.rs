//! Session: owner of everything one branch-and-price run shares.
//!
//! The session holds the variable registry, the decision chain, the column
//! pool and the ids of the master rows. It builds the master problem,
//! moves the master LP between search nodes and builds the pricing
//! problems. The master LP itself is owned by the caller and passed in.

use crate::branching::activation::{activate_column, catch_up};
use crate::branching::chain::{BranchDirection, DecisionChain, ReleasedNode, RowSense};
use crate::branching::{ComponentBound, OrigBound, OrigBranchCons};
use crate::error::{BnpError, BnpResult};
use crate::master_problem::column_pool::ColumnPool;
use crate::master_problem::{DualStore, MasterLp, MasterSolution, Settings};
use crate::misc::{DecisionId, HashMap, MasterVarId, OrigVarId, RowId};
use crate::pricing::{PricingProblem, PricingRow, PricingVarData};
use crate::problem::{Decomposition, OrigProblem, VarAssignment};
use crate::ui::{UISender, UIUserMessage};
use crate::vars::{MasterVar, MasterVarKind, VarRegistry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkingRow {
    pub var: OrigVarId,
    /// pricing block of the spanned block
    pub block: usize,
    pub row: RowId,
}

#[derive(Clone, Debug, Default)]
/// Ids of the static master rows
pub struct MasterRows {
    /// (constraint index, row) of every coupling constraint
    pub coupling: Vec<(usize, RowId)>,
    /// one per pricing block
    pub convexity: Vec<RowId>,
    pub linking: Vec<LinkingRow>,
    coupling_of: HashMap<u32, RowId>,
}

impl MasterRows {
    pub fn coupling_row(&self, cons: usize) -> Option<RowId> {
        u32::try_from(cons).ok().and_then(|c| self.coupling_of.get(&c).copied())
    }

    pub fn linking_row(&self, var: OrigVarId, block: usize) -> Option<RowId> {
        self.linking.iter().find(|l| l.var == var && l.block == block).map(|l| l.row)
    }
}

pub struct Session {
    problem: OrigProblem,
    decomposition: Decomposition,
    pub(crate) vars: VarRegistry,
    pub(crate) chain: DecisionChain,
    pub(crate) pool: ColumnPool,
    pub(crate) rows: MasterRows,
    pub(crate) settings: Settings,
    ui: UISender,
    root: DecisionId,
    built: bool,
    /// direct copies whose bounds differ from the original variable
    bounded_copies: Vec<MasterVarId>,
}

impl Session {
    pub fn new(problem: OrigProblem, decomposition: Decomposition, settings: Settings, ui: UISender) -> BnpResult<Self> {
        let vars = VarRegistry::new(&problem, &decomposition)?;
        let mut chain = DecisionChain::new();
        let root = chain.create_root()?;

        ui.send(UIUserMessage::Log(format!(
            "decomposition: {} blocks in {} pricing problems, {} coupling constraints",
            decomposition.nblocks,
            vars.num_blocks(),
            decomposition.conss.iter().filter(|c| c.is_none()).count()
        )));

        Ok(Self {
            problem,
            decomposition,
            vars,
            chain,
            pool: ColumnPool::new(),
            rows: MasterRows::default(),
            settings,
            ui,
            root,
            built: false,
            bounded_copies: Vec::new(),
        })
    }

    pub fn problem(&self) -> &OrigProblem {
        &self.problem
    }

    pub fn decomposition(&self) -> &Decomposition {
        &self.decomposition
    }

    pub fn vars(&self) -> &VarRegistry {
        &self.vars
    }

    pub fn chain(&self) -> &DecisionChain {
        &self.chain
    }

    pub fn rows(&self) -> &MasterRows {
        &self.rows
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn ui(&self) -> &UISender {
        &self.ui
    }

    /// Decision node of the root search node
    pub fn root_decision(&self) -> DecisionId {
        self.root
    }

    /// Number of columns ever generated
    pub fn num_columns(&self) -> usize {
        self.pool.count()
    }

    pub fn num_columns_in_lp(&self) -> usize {
        self.vars.master_vars().filter(|(_, v)| v.in_lp && v.block().is_some()).count()
    }

    /// Creates the static part of the master problem: coupling, convexity
    /// and linking rows, direct copies and artificial variables.
    pub fn build_master<L: MasterLp + ?Sized>(&mut self, lp: &mut L) -> BnpResult<()> {
        if self.built {
            return Ok(());
        }
        self.built = true;

        for (c, assignment) in self.decomposition.conss.iter().enumerate() {
            if assignment.is_some() {
                continue;
            }
            let cons = &self.problem.conss[c];
            let row = lp.create_linear_constraint(&cons.name, &[], &[], cons.lhs, cons.rhs);
            self.rows.coupling.push((c, row));
            if let Ok(key) = u32::try_from(c) {
                self.rows.coupling_of.insert(key, row);
            }
        }

        for (pb, block) in self.vars.blocks().iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let k = block.multiplicity() as f64;
            let row = lp.create_linear_constraint(&format!("conv_{pb}"), &[], &[], k, k);
            self.rows.convexity.push(row);
        }

        for (ov, orig) in self.vars.orig_vars() {
            for (pb, _) in &orig.linking_pricing_vars {
                let row = lp.create_linear_constraint(&format!("link_{}_{pb}", orig.def.name), &[], &[], 0.0, 0.0);
                self.rows.linking.push(LinkingRow { var: ov, block: *pb, row });
            }
        }

        let copies: Vec<OrigVarId> = self
            .vars
            .orig_vars()
            .filter(|(_, v)| matches!(v.assignment, VarAssignment::Master | VarAssignment::Linking(_)))
            .map(|(id, _)| id)
            .collect();
        for ov in copies {
            let def = &self.vars.orig(ov).def;
            let var = MasterVar {
                name: def.name.clone(),
                kind: MasterVarKind::DirectCopy,
                is_ray: false,
                obj: def.obj,
                lb: def.lb,
                ub: def.ub,
                orig_vals: vec![(ov, 1.0)],
                generator: Vec::new(),
                in_lp: true,
                released: false,
                age: 0,
            };
            self.add_static_var(var, lp)?;
        }

        let mut slack_rows: Vec<(String, RowId, f64)> = Vec::new();
        for (c, row) in &self.rows.coupling {
            let cons = &self.problem.conss[*c];
            if cons.lhs.is_finite() {
                slack_rows.push((format!("art_{}_lo", cons.name), *row, 1.0));
            }
            if cons.rhs.is_finite() {
                slack_rows.push((format!("art_{}_up", cons.name), *row, -1.0));
            }
        }
        for (pb, row) in self.rows.convexity.iter().enumerate() {
            slack_rows.push((format!("art_conv_{pb}"), *row, 1.0));
        }
        for link in &self.rows.linking {
            slack_rows.push((format!("art_link_{}_{}_lo", link.var, link.block), link.row, 1.0));
            slack_rows.push((format!("art_link_{}_{}_up", link.var, link.block), link.row, -1.0));
        }
        for (name, row, coef) in slack_rows {
            self.add_artificial(name, row, coef, lp)?;
        }

        self.ui.send(UIUserMessage::Log(format!(
            "master built: {} coupling, {} convexity, {} linking rows, {} static variables",
            self.rows.coupling.len(),
            self.rows.convexity.len(),
            self.rows.linking.len(),
            self.vars.num_master()
        )));
        Ok(())
    }

    fn add_static_var<L: MasterLp + ?Sized>(&mut self, var: MasterVar, lp: &mut L) -> BnpResult<MasterVarId> {
        let id = self.vars.add_master_var(var);
        let rows = self.static_rows_of(id);
        let var = self.vars.master(id);
        lp.add_var(id, &var.name, var.obj, var.lb, var.ub, &rows);
        activate_column(&mut self.chain, &self.vars, id, lp)?;
        Ok(id)
    }

    fn add_artificial<L: MasterLp + ?Sized>(&mut self, name: String, row: RowId, coef: f64, lp: &mut L) -> BnpResult<MasterVarId> {
        let var = MasterVar {
            name,
            kind: MasterVarKind::Artificial,
            is_ray: false,
            obj: self.settings.artificial_cost,
            lb: 0.0,
            ub: f64::INFINITY,
            orig_vals: Vec::new(),
            generator: Vec::new(),
            in_lp: true,
            released: false,
            age: 0,
        };
        let id = self.vars.add_master_var(var);
        let var = self.vars.master(id);
        lp.add_var(id, &var.name, var.obj, var.lb, var.ub, &[(row, coef)]);
        activate_column(&mut self.chain, &self.vars, id, lp)?;
        Ok(id)
    }

    /// Moves the LP to the decision `target`: deactivates the active path
    /// up to the common ancestor, then activates down to the target.
    pub fn switch_to<L: MasterLp + ?Sized>(&mut self, target: DecisionId, lp: &mut L) -> BnpResult<()> {
        let mut path = self.chain.ancestors(target)?;
        path.reverse();

        while let Some(top) = self.chain.active_node() {
            let depth = self.chain.depth(top)? as usize;
            if path.get(depth) == Some(&top) {
                break;
            }
            self.deactivate_decision(top, lp)?;
        }

        let start = self.chain.active_path().len();
        for id in path.into_iter().skip(start) {
            self.activate_decision(id, lp)?;
        }
        Ok(())
    }

    fn activate_decision<L: MasterLp + ?Sized>(&mut self, id: DecisionId, lp: &mut L) -> BnpResult<()> {
        self.chain.activate(id)?;
        let enrolled = catch_up(&mut self.chain, &self.vars, id)?;

        let node = self.chain.node(id)?;
        let Some(data) = node.data() else { return Ok(()) };
        let (lhs, rhs, art_coef) = match data.sense {
            RowSense::AtLeast => (data.rhs, f64::INFINITY, 1.0),
            RowSense::AtMost => (f64::NEG_INFINITY, data.rhs, -1.0),
        };

        match node.master_row() {
            None => {
                let name = format!("branch_{id}_b{}", data.block);
                let ones = vec![1.0; enrolled.len()];
                let row = lp.create_linear_constraint(&name, &enrolled, &ones, lhs, rhs);
                let art = self.add_artificial(format!("art_{name}"), row, art_coef, lp)?;
                let node = self.chain.node_mut(id)?;
                node.master_row = Some(row);
                node.artificial = Some(art);
            }
            Some(row) => {
                for var in enrolled {
                    lp.add_coef(row, var, 1.0);
                }
                lp.change_row_sides(row, lhs, rhs);
            }
        }
        Ok(())
    }

    fn deactivate_decision<L: MasterLp + ?Sized>(&mut self, id: DecisionId, lp: &mut L) -> BnpResult<()> {
        self.chain.deactivate(id)?;
        if let Some(row) = self.chain.node(id)?.master_row() {
            lp.change_row_sides(row, f64::NEG_INFINITY, f64::INFINITY);
        }
        let released = self.chain.reap(id)?;
        self.drop_released(released, lp)
    }

    fn drop_released<L: MasterLp + ?Sized>(&mut self, released: Vec<ReleasedNode>, lp: &mut L) -> BnpResult<()> {
        for node in released {
            if let Some(art) = node.artificial {
                self.release_master_var(art, lp)?;
            }
            if let Some(row) = node.row {
                lp.release_constraint(row);
            }
        }
        Ok(())
    }

    /// Creates an inactive decision below `parent` for a new search node.
    /// Its master row appears on first activation.
    pub fn create_decision_node(
        &mut self,
        parent: DecisionId,
        bounds: Vec<ComponentBound>,
        block: usize,
        direction: BranchDirection,
        rhs: f64,
        orig_cons: Option<OrigBranchCons>,
    ) -> BnpResult<DecisionId> {
        if block >= self.vars.num_blocks() {
            return Err(BnpError::InvalidBranchingData(format!("block {block} does not exist")));
        }
        self.chain.create_decision_node(parent, bounds, block, direction, rhs, orig_cons)
    }

    /// Creates an inactive down decision bounding the columns in S from
    /// above, `Σ λ <= cap`.
    pub fn create_capped_decision_node(&mut self, parent: DecisionId, bounds: Vec<ComponentBound>, block: usize, cap: f64) -> BnpResult<DecisionId> {
        if block >= self.vars.num_blocks() {
            return Err(BnpError::InvalidBranchingData(format!("block {block} does not exist")));
        }
        self.chain.create_capped_decision_node(parent, bounds, block, cap)
    }

    /// Adds a hold for a search node that shares the decision of its parent
    pub fn retain_decision(&mut self, id: DecisionId) -> BnpResult<()> {
        self.chain.retain(id)
    }

    /// Called when a search node is finished (pruned, solved or branched).
    /// Inactive nodes that are no longer used are destroyed right away.
    pub fn release_decision<L: MasterLp + ?Sized>(&mut self, id: DecisionId, lp: &mut L) -> BnpResult<()> {
        let released = self.chain.release(id)?;
        self.drop_released(released, lp)
    }

    /// Deactivates and destroys the whole chain
    pub fn teardown<L: MasterLp + ?Sized>(&mut self, lp: &mut L) -> BnpResult<()> {
        for id in self.chain.active_path().to_vec().into_iter().rev() {
            if let Some(row) = self.chain.node(id)?.master_row() {
                lp.change_row_sides(row, f64::NEG_INFINITY, f64::INFINITY);
            }
        }
        let released = self.chain.teardown()?;
        self.drop_released(released, lp)
    }

    /// Applies the accumulated original bounds of a search node to the
    /// direct copies. Bounds of block variables live in the decision chain.
    pub fn apply_orig_bounds<L: MasterLp + ?Sized>(&mut self, bounds: &[OrigBranchCons], lp: &mut L) {
        for id in std::mem::take(&mut self.bounded_copies) {
            let Some((ov, _)) = self.vars.master(id).orig_vals.first().copied() else { continue };
            let def = &self.vars.orig(ov).def;
            let (lb, ub) = (def.lb, def.ub);
            let var = self.vars.master_mut(id);
            var.lb = lb;
            var.ub = ub;
            lp.change_var_bounds(id, lb, ub);
        }

        let mut tightened: HashMap<MasterVarId, (f64, f64)> = HashMap::default();
        for cons in bounds {
            let Some(copy) = self.direct_copy_of(cons.var) else { continue };
            let var = self.vars.master(copy);
            let entry = tightened.entry(copy).or_insert((var.lb, var.ub));
            *entry = cons.tighten(entry.0, entry.1);
        }
        let mut tightened: Vec<_> = tightened.into_iter().collect();
        tightened.sort_unstable_by_key(|(id, _)| *id);
        for (id, (lb, ub)) in tightened {
            let var = self.vars.master_mut(id);
            var.lb = lb;
            var.ub = ub;
            lp.change_var_bounds(id, lb, ub);
            self.bounded_copies.push(id);
        }
    }

    /// Direct copy master variable of a master-only or linking variable
    pub fn direct_copy_of(&self, var: OrigVarId) -> Option<MasterVarId> {
        self.vars
            .orig(var)
            .master_vars
            .iter()
            .map(|(m, _)| *m)
            .find(|m| matches!(self.vars.master(*m).kind, MasterVarKind::DirectCopy))
    }

    /// Duals of all master rows of the current LP solution
    pub fn get_duals<L: MasterLp + ?Sized>(&self, lp: &L) -> DualStore {
        let coupling_rows: Vec<RowId> = self.rows.coupling.iter().map(|(_, r)| *r).collect();
        let linking_rows: Vec<RowId> = self.rows.linking.iter().map(|l| l.row).collect();
        let branching: Vec<(DecisionId, RowId)> = self
            .chain
            .active_path()
            .iter()
            .filter_map(|id| self.chain.node(*id).ok().and_then(|n| n.master_row()).map(|r| (*id, r)))
            .collect();
        let branching_rows: Vec<RowId> = branching.iter().map(|(_, r)| *r).collect();

        DualStore {
            coupling: lp.get_dual_list(&coupling_rows),
            convexity: lp.get_dual_list(&self.rows.convexity),
            linking: lp.get_dual_list(&linking_rows),
            branching: branching.iter().map(|(d, _)| *d).zip(lp.get_dual_list(&branching_rows)).collect(),
        }
    }

    /// Values of every master variable in the LP
    pub fn master_solution<L: MasterLp + ?Sized>(&self, lp: &L) -> MasterSolution {
        let ids: Vec<MasterVarId> = self.vars.master_vars().filter(|(_, v)| v.in_lp).map(|(id, _)| id).collect();
        let values = lp.get_x_list(&ids);
        MasterSolution { obj: lp.get_objective(), values: ids.into_iter().zip(values).collect() }
    }

    /// Whether an artificial variable carries value, i.e. the restricted
    /// master is not feasible for the real master
    pub fn has_positive_artificial(&self, sol: &MasterSolution) -> bool {
        sol.nonzeros(self.settings.feastol).any(|(id, _)| self.vars.master(id).is_artificial())
    }

    /// Pricing problem of a block under the given duals
    pub fn pricing_problem(&self, pb: usize, duals: &DualStore) -> PricingProblem {
        let block = self.vars.block(pb);
        let coupling_dual: HashMap<RowId, f64> = self.rows.coupling.iter().map(|(_, r)| *r).zip(duals.coupling.iter().copied()).collect();
        let linking_dual = |var: OrigVarId| {
            self.rows
                .linking
                .iter()
                .position(|l| l.var == var && l.block == pb)
                .and_then(|i| duals.linking.get(i).copied())
                .unwrap_or(0.0)
        };

        let active: Vec<_> = self
            .chain
            .active_path()
            .iter()
            .filter_map(|id| self.chain.node(*id).ok().and_then(|n| n.data().map(|d| (*id, d))))
            .filter(|(_, d)| d.block == pb)
            .collect();

        let mut vars: Vec<PricingVarData> = block
            .vars
            .iter()
            .map(|p| {
                let pvar = self.vars.pricing(*p);
                let orig = self.vars.orig(pvar.orig_vars[0]);
                let cost = if pvar.linking {
                    linking_dual(pvar.orig_vars[0])
                } else {
                    orig.def.obj
                        - orig
                            .master_rows
                            .iter()
                            .filter_map(|(coef, c)| self.rows.coupling_row(*c).map(|r| coef * coupling_dual.get(&r).copied().unwrap_or(0.0)))
                            .sum::<f64>()
                };
                PricingVarData { name: pvar.name.clone(), vtype: orig.def.vtype, lb: orig.def.lb, ub: orig.def.ub, cost }
            })
            .collect();

        // single variable blocks can take the mirrored bounds directly
        if vars.len() == 1 && block.multiplicity() == 1 {
            for (_, data) in &active {
                if let Some(cons) = data.orig_cons {
                    let (lb, ub) = cons.tighten(vars[0].lb, vars[0].ub);
                    vars[0].lb = lb;
                    vars[0].ub = ub;
                }
            }
        }

        let position_of = |var: OrigVarId| -> Option<usize> {
            let orig = self.vars.orig(var);
            match &orig.assignment {
                VarAssignment::Block(_) => orig.pricing_var.map(|p| self.vars.pricing(p).position),
                VarAssignment::Linking(_) => {
                    orig.linking_pricing_vars.iter().find(|(b, _)| *b == pb).map(|(_, p)| self.vars.pricing(*p).position)
                }
                VarAssignment::Master => None,
            }
        };

        let conss = block
            .conss
            .iter()
            .map(|c| {
                let cons = &self.problem.conss[*c];
                PricingRow {
                    name: cons.name.clone(),
                    entries: cons.entries.iter().filter_map(|(v, a)| position_of(*v).map(|p| (p, *a))).collect(),
                    lhs: cons.lhs,
                    rhs: cons.rhs,
                }
            })
            .collect();

        PricingProblem {
            block: pb,
            multiplicity: block.multiplicity(),
            vars,
            conss,
            convexity_dual: duals.convexity.get(pb).copied().unwrap_or(0.0),
            branch_duals: active.iter().map(|(id, d)| (d.separating_set.clone(), duals.branching_dual(*id))).collect(),
        }
    }

    /// Builds an original bound cons after checking the variable
    pub fn orig_branch_cons(&self, var: OrigVarId, bound: OrigBound) -> BnpResult<OrigBranchCons> {
        if var.index() >= self.vars.num_orig() {
            return Err(BnpError::BranchingNotApplicable(format!("unknown variable {var}")));
        }
        Ok(OrigBranchCons { var, bound })
    }
}
