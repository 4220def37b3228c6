//! Variable registry.
//!
//! Holds the original, pricing and master variables together with their
//! cross references. Master variables are owned by the master LP: the
//! registry keeps their data and back references for traversal, their
//! lifetime in the LP is decided elsewhere.

use std::fmt::{Display, Formatter};

use crate::error::{BnpError, BnpResult};
use crate::misc::{MasterVarId, OrigVarId, PricingVarId};
use crate::problem::{Decomposition, OrigProblem, OrigVarDef, VarAssignment, VarType};

#[derive(Clone, Debug)]
pub struct OrigVar {
    pub def: OrigVarDef,
    pub assignment: VarAssignment,
    /// pricing variable of a block-assigned variable
    pub pricing_var: Option<PricingVarId>,
    /// copy index among identical blocks (0 for the representative)
    pub copy: usize,
    /// pricing copies of a linking variable, one per pricing block
    pub linking_pricing_vars: Vec<(usize, PricingVarId)>,
    /// master variables containing this variable, with their coefficient
    pub master_vars: Vec<(MasterVarId, f64)>,
    /// (coefficient, coupling constraint) pairs
    pub master_rows: Vec<(f64, usize)>,
}

impl OrigVar {
    /// Block number in the classic encoding: -1 master only, -2 linking
    pub fn blocknr(&self) -> i32 {
        match self.assignment {
            VarAssignment::Master => -1,
            VarAssignment::Linking(_) => -2,
            VarAssignment::Block(b) => i32::try_from(b).unwrap_or(i32::MAX),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PricingVar {
    pub name: String,
    /// pricing problem this variable belongs to
    pub block: usize,
    /// position in the block's variable order
    pub position: usize,
    /// represented original variables, one per identical block
    pub orig_vars: Vec<OrigVarId>,
    /// pricing copy of a linking variable
    pub linking: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MasterVarKind {
    /// generated by a pricing problem
    Column { block: usize },
    /// copy of a master-only or linking original variable
    DirectCopy,
    /// big-M slack keeping the restricted master feasible
    Artificial,
}

#[derive(Clone, Debug)]
pub struct MasterVar {
    pub name: String,
    pub kind: MasterVarKind,
    pub is_ray: bool,
    pub obj: f64,
    pub lb: f64,
    pub ub: f64,
    /// decomposition in original variables
    pub orig_vals: Vec<(OrigVarId, f64)>,
    /// non-zero pricing values, sorted by position
    pub generator: Vec<(usize, f64)>,
    pub in_lp: bool,
    pub released: bool,
    /// consecutive LP solves with value zero
    pub age: u32,
}

impl MasterVar {
    /// Pricing block, `None` for direct copies and artificials
    pub fn block(&self) -> Option<usize> {
        match self.kind {
            MasterVarKind::Column { block } => Some(block),
            _ => None,
        }
    }

    /// Block number in the classic encoding, -1 when not generated by a block
    pub fn blocknr(&self) -> i32 {
        self.block().map_or(-1, |b| i32::try_from(b).unwrap_or(i32::MAX))
    }

    /// Generator entry at a pricing position, zero when absent
    pub fn generator_value(&self, position: usize) -> f64 {
        self.generator
            .binary_search_by_key(&position, |(p, _)| *p)
            .map_or(0.0, |i| self.generator[i].1)
    }

    pub fn is_artificial(&self) -> bool {
        matches!(self.kind, MasterVarKind::Artificial)
    }
}

impl Display for MasterVar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[b={} ray={}]", self.name, self.blocknr(), self.is_ray)
    }
}

#[derive(Clone, Debug)]
/// One pricing problem, possibly standing for several identical blocks
pub struct PricingBlock {
    /// original blocks, the first one is the representative
    pub blocks: Vec<usize>,
    pub vars: Vec<PricingVarId>,
    /// block constraints of the representative
    pub conss: Vec<usize>,
}

impl PricingBlock {
    pub fn multiplicity(&self) -> usize {
        self.blocks.len()
    }
}

#[derive(Clone, Debug, Default)]
pub struct VarRegistry {
    orig: Vec<OrigVar>,
    pricing: Vec<PricingVar>,
    master: Vec<MasterVar>,
    blocks: Vec<PricingBlock>,
    /// pricing block of every original block
    pricing_block_of: Vec<usize>,
}

impl VarRegistry {
    /// Builds original and pricing variables from a validated decomposition
    pub fn new(problem: &OrigProblem, decomposition: &Decomposition) -> BnpResult<Self> {
        decomposition.validate(problem)?;

        let mut registry = VarRegistry {
            orig: problem
                .vars
                .iter()
                .zip(&decomposition.vars)
                .map(|(def, assignment)| OrigVar {
                    def: def.clone(),
                    assignment: assignment.clone(),
                    pricing_var: None,
                    copy: 0,
                    linking_pricing_vars: Vec::new(),
                    master_vars: Vec::new(),
                    master_rows: Vec::new(),
                })
                .collect(),
            pricing: Vec::new(),
            master: Vec::new(),
            blocks: Vec::new(),
            pricing_block_of: vec![usize::MAX; decomposition.nblocks],
        };

        for (pb, group) in decomposition.pricing_groups().into_iter().enumerate() {
            let copies: Vec<Vec<OrigVarId>> = group.iter().map(|b| decomposition.block_vars(*b)).collect();
            let representative = group[0];
            let mut vars = Vec::with_capacity(copies[0].len());

            for position in 0..copies[0].len() {
                let orig_vars: Vec<OrigVarId> = copies.iter().map(|c| c[position]).collect();
                let id = PricingVarId::from_index(registry.pricing.len());
                for (copy, ov) in orig_vars.iter().enumerate() {
                    let orig = &mut registry.orig[ov.index()];
                    orig.pricing_var = Some(id);
                    orig.copy = copy;
                }
                registry.pricing.push(PricingVar {
                    name: format!("pr{}_{}", pb, registry.orig[orig_vars[0].index()].def.name),
                    block: pb,
                    position,
                    orig_vars,
                    linking: false,
                });
                vars.push(id);
            }

            for b in &group {
                registry.pricing_block_of[*b] = pb;
            }

            let conss = decomposition
                .conss
                .iter()
                .enumerate()
                .filter(|(_, a)| **a == Some(representative))
                .map(|(c, _)| c)
                .collect();

            registry.blocks.push(PricingBlock { blocks: group, vars, conss });
        }

        // pricing copies of linking variables go behind the block's own variables
        for ov in 0..registry.orig.len() {
            let VarAssignment::Linking(spanned) = registry.orig[ov].assignment.clone() else { continue };
            for block in spanned {
                let pb = registry.pricing_block_of[block];
                let id = PricingVarId::from_index(registry.pricing.len());
                let position = registry.blocks[pb].vars.len();
                registry.pricing.push(PricingVar {
                    name: format!("pr{}_{}", pb, registry.orig[ov].def.name),
                    block: pb,
                    position,
                    orig_vars: vec![OrigVarId::from_index(ov)],
                    linking: true,
                });
                registry.blocks[pb].vars.push(id);
                registry.orig[ov].linking_pricing_vars.push((pb, id));
            }
        }

        for (c, assignment) in decomposition.conss.iter().enumerate() {
            if assignment.is_some() {
                continue;
            }
            for (var, coef) in &problem.conss[c].entries {
                registry.orig[var.index()].master_rows.push((*coef, c));
            }
        }

        Ok(registry)
    }

    pub fn orig(&self, id: OrigVarId) -> &OrigVar {
        &self.orig[id.index()]
    }

    pub fn orig_vars(&self) -> impl Iterator<Item = (OrigVarId, &OrigVar)> {
        self.orig.iter().enumerate().map(|(i, v)| (OrigVarId::from_index(i), v))
    }

    pub fn num_orig(&self) -> usize {
        self.orig.len()
    }

    pub fn pricing(&self, id: PricingVarId) -> &PricingVar {
        &self.pricing[id.index()]
    }

    pub fn master(&self, id: MasterVarId) -> &MasterVar {
        &self.master[id.index()]
    }

    pub fn master_mut(&mut self, id: MasterVarId) -> &mut MasterVar {
        &mut self.master[id.index()]
    }

    pub fn try_master(&self, id: MasterVarId) -> BnpResult<&MasterVar> {
        self.master.get(id.index()).filter(|v| !v.released).ok_or(BnpError::UnknownMasterVar(id))
    }

    pub fn master_vars(&self) -> impl Iterator<Item = (MasterVarId, &MasterVar)> {
        self.master.iter().enumerate().map(|(i, v)| (MasterVarId::from_index(i), v))
    }

    /// Next id a master variable will receive. Ids are handed out in
    /// creation order, which is what column watermarks rely on.
    pub fn next_master_id(&self) -> MasterVarId {
        MasterVarId::from_index(self.master.len())
    }

    pub fn num_master(&self) -> usize {
        self.master.len()
    }

    pub fn block(&self, pb: usize) -> &PricingBlock {
        &self.blocks[pb]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[PricingBlock] {
        &self.blocks
    }

    /// Pricing problem an original block was aggregated into
    pub fn pricing_block_of(&self, block: usize) -> usize {
        self.pricing_block_of[block]
    }

    /// Resolves the pricing variable standing for an original variable.
    /// Master-only and linking variables have none.
    pub fn resolve_pricing_var(&self, var: OrigVarId) -> Option<PricingVarId> {
        self.orig.get(var.index()).and_then(|v| v.pricing_var)
    }

    /// Stores a master variable and links it into the back references
    /// of its original variables.
    pub fn add_master_var(&mut self, var: MasterVar) -> MasterVarId {
        let id = self.next_master_id();
        for (ov, val) in &var.orig_vals {
            self.orig[ov.index()].master_vars.push((id, *val));
        }
        self.master.push(var);
        id
    }

    /// Forgets a master variable destroyed by the master LP.
    /// The slot stays so ids remain dense.
    pub fn release_master_var(&mut self, id: MasterVarId) -> BnpResult<()> {
        let var = self.master.get_mut(id.index()).filter(|v| !v.released).ok_or(BnpError::UnknownMasterVar(id))?;
        var.released = true;
        var.in_lp = false;
        let orig_vals = std::mem::take(&mut var.orig_vals);
        for (ov, _) in orig_vals {
            self.orig[ov.index()].master_vars.retain(|(m, _)| *m != id);
        }
        Ok(())
    }

    /// Integer original variables in branching order: binaries first,
    /// then general integers, each by index.
    pub fn branching_order(&self) -> Vec<OrigVarId> {
        let of_type = |t: VarType| {
            self.orig
                .iter()
                .enumerate()
                .filter(move |(_, v)| v.def.vtype == t)
                .map(|(i, _)| OrigVarId::from_index(i))
        };
        of_type(VarType::Binary).chain(of_type(VarType::Integer)).collect()
    }
}
