//! Chain of branching decisions.
//!
//! Every decision node refers to its parent; the root carries no
//! decision. Nodes live in an arena addressed by [`DecisionId`]. The
//! active nodes always form a path starting at the root, kept as a stack:
//! a node may only be activated directly below the active top and only
//! the top may be deactivated.
//!
//! A node stays alive while it is active, while an open search node
//! holds it or while it has live children. Destruction therefore always
//! happens child before parent.

use crate::branching::{ComponentBound, OrigBranchCons, SeparatingSet};
use crate::error::{BnpError, BnpResult};
use crate::master_problem::column_pool::ColumnTicket;
use crate::misc::{DecisionId, IdSet, MasterVarId, RowId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchDirection {
    Up,
    Down,
}

/// Sense of the master row of a decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowSense {
    /// `Σ λ >= rhs`
    AtLeast,
    /// `Σ λ <= rhs`
    AtMost,
}

#[derive(Clone, Debug, PartialEq)]
/// Data of a generic branching decision: the columns of `block` generated
/// by a point in S must satisfy `Σ λ >= rhs` (or `<=` for `AtMost`).
pub struct GenericBranchData {
    pub separating_set: SeparatingSet,
    /// pricing block the decision applies to
    pub block: usize,
    pub direction: BranchDirection,
    pub sense: RowSense,
    pub rhs: f64,
    /// mirrored bound on the original variable that was branched on
    pub orig_cons: Option<OrigBranchCons>,
}

#[derive(Clone, Debug)]
pub struct DecisionNode {
    parent: Option<DecisionId>,
    depth: u32,
    /// `None` for the root
    pub(crate) data: Option<GenericBranchData>,
    active: bool,
    /// open search nodes referring to this decision
    holds: u32,
    live_children: u32,
    /// master row, created on first activation
    pub(crate) master_row: Option<RowId>,
    /// artificial variable of the master row
    pub(crate) artificial: Option<MasterVarId>,
    /// first master variable not yet checked against this node
    pub(crate) ticket: ColumnTicket,
    /// columns found compatible with the separating set
    pub(crate) members: IdSet<MasterVarId>,
}

impl DecisionNode {
    pub fn parent(&self) -> Option<DecisionId> {
        self.parent
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn data(&self) -> Option<&GenericBranchData> {
        self.data.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn master_row(&self) -> Option<RowId> {
        self.master_row
    }

    /// Whether the column was already checked against this node
    pub fn has_evaluated(&self, var: MasterVarId) -> bool {
        var.index() < self.ticket.0
    }

    pub fn is_member(&self, var: MasterVarId) -> bool {
        self.members.contains(&var)
    }

    pub fn num_members(&self) -> usize {
        self.members.len()
    }
}

/// Resources of a destroyed node that the master LP still owns
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReleasedNode {
    pub decision: DecisionId,
    pub row: Option<RowId>,
    pub artificial: Option<MasterVarId>,
}

#[derive(Clone, Debug, Default)]
pub struct DecisionChain {
    nodes: Vec<Option<DecisionNode>>,
    /// active path, root first
    active: Vec<DecisionId>,
    root: Option<DecisionId>,
}

impl DecisionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the root. The root is held by the root search node.
    pub fn create_root(&mut self) -> BnpResult<DecisionId> {
        if let Some(root) = self.root {
            return Err(BnpError::CorruptedTree { decision: root, reason: "root created twice".to_string() });
        }
        let id = self.push(DecisionNode {
            parent: None,
            depth: 0,
            data: None,
            active: false,
            holds: 1,
            live_children: 0,
            master_row: None,
            artificial: None,
            ticket: ColumnTicket(0),
            members: IdSet::default(),
        });
        self.root = Some(id);
        Ok(id)
    }

    /// Creates a decision below `parent`, held by one open search node.
    /// The master row is only created once the node is activated.
    pub fn create_decision_node(
        &mut self,
        parent: DecisionId,
        bounds: Vec<ComponentBound>,
        block: usize,
        direction: BranchDirection,
        rhs: f64,
        orig_cons: Option<OrigBranchCons>,
    ) -> BnpResult<DecisionId> {
        let separating_set = SeparatingSet::new(bounds)?;
        self.insert_decision(parent, GenericBranchData { separating_set, block, direction, sense: RowSense::AtLeast, rhs, orig_cons })
    }

    /// Down decision capping the columns in S: `Σ λ <= cap`.
    /// Used when S has several components and its complement is no
    /// separating set.
    pub fn create_capped_decision_node(
        &mut self,
        parent: DecisionId,
        bounds: Vec<ComponentBound>,
        block: usize,
        cap: f64,
    ) -> BnpResult<DecisionId> {
        let separating_set = SeparatingSet::new(bounds)?;
        self.insert_decision(
            parent,
            GenericBranchData { separating_set, block, direction: BranchDirection::Down, sense: RowSense::AtMost, rhs: cap, orig_cons: None },
        )
    }

    fn insert_decision(&mut self, parent: DecisionId, data: GenericBranchData) -> BnpResult<DecisionId> {
        let rhs = data.rhs;
        if !rhs.is_finite() {
            return Err(BnpError::InvalidBranchingData(format!("non-finite right hand side {rhs}")));
        }

        let parent_node = self.node_mut(parent)?;
        parent_node.live_children += 1;
        let depth = parent_node.depth + 1;

        Ok(self.push(DecisionNode {
            parent: Some(parent),
            depth,
            data: Some(data),
            active: false,
            holds: 1,
            live_children: 0,
            master_row: None,
            artificial: None,
            ticket: ColumnTicket(0),
            members: IdSet::default(),
        }))
    }

    fn push(&mut self, node: DecisionNode) -> DecisionId {
        let id = DecisionId::from_index(self.nodes.len());
        self.nodes.push(Some(node));
        id
    }

    pub fn root(&self) -> Option<DecisionId> {
        self.root
    }

    pub fn node(&self, id: DecisionId) -> BnpResult<&DecisionNode> {
        self.nodes.get(id.index()).and_then(Option::as_ref).ok_or(BnpError::UnknownDecision(id))
    }

    pub(crate) fn node_mut(&mut self, id: DecisionId) -> BnpResult<&mut DecisionNode> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut).ok_or(BnpError::UnknownDecision(id))
    }

    pub fn is_alive(&self, id: DecisionId) -> bool {
        self.node(id).is_ok()
    }

    pub fn parent(&self, id: DecisionId) -> BnpResult<Option<DecisionId>> {
        Ok(self.node(id)?.parent)
    }

    pub fn depth(&self, id: DecisionId) -> BnpResult<u32> {
        Ok(self.node(id)?.depth)
    }

    /// Deepest active decision
    pub fn active_node(&self) -> Option<DecisionId> {
        self.active.last().copied()
    }

    /// Active path, root first
    pub fn active_path(&self) -> &[DecisionId] {
        &self.active
    }

    /// Live nodes in creation order
    pub fn iter(&self) -> impl Iterator<Item = (DecisionId, &DecisionNode)> {
        self.nodes.iter().enumerate().filter_map(|(i, n)| n.as_ref().map(|n| (DecisionId::from_index(i), n)))
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path from `id` up to the root, `id` first.
    /// Fails if a parent link is dangling or longer than the arena.
    pub fn ancestors(&self, id: DecisionId) -> BnpResult<Vec<DecisionId>> {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            if path.len() > self.nodes.len() {
                return Err(BnpError::CorruptedTree { decision: id, reason: "cycle in parent links".to_string() });
            }
            let node = self.node(c).map_err(|_| BnpError::CorruptedTree {
                decision: id,
                reason: format!("dangling parent {c}"),
            })?;
            path.push(c);
            current = node.parent;
        }
        Ok(path)
    }

    /// Deepest node on both root paths
    pub fn common_ancestor(&self, a: DecisionId, b: DecisionId) -> BnpResult<Option<DecisionId>> {
        let pa = self.ancestors(a)?;
        let pb = self.ancestors(b)?;
        Ok(pa.iter().rev().zip(pb.iter().rev()).take_while(|(x, y)| x == y).last().map(|(x, _)| *x))
    }

    /// Marks a node active. Its parent must be the active top, the root
    /// may only be activated on an empty stack.
    pub fn activate(&mut self, id: DecisionId) -> BnpResult<()> {
        let top = self.active_node();
        let node = self.node(id)?;
        if node.active || node.parent != top {
            return Err(BnpError::ChainNotNested(id));
        }
        self.node_mut(id)?.active = true;
        self.active.push(id);
        Ok(())
    }

    /// Marks the active top inactive
    pub fn deactivate(&mut self, id: DecisionId) -> BnpResult<()> {
        if self.active_node() != Some(id) {
            return Err(BnpError::ChainNotNested(id));
        }
        self.node_mut(id)?.active = false;
        self.active.pop();
        Ok(())
    }

    /// Adds a hold, for a search node sharing the decision of its parent
    pub fn retain(&mut self, id: DecisionId) -> BnpResult<()> {
        self.node_mut(id)?.holds += 1;
        Ok(())
    }

    /// Drops a hold and destroys whatever became unreferenced.
    /// Returns the destroyed nodes, children first.
    pub fn release(&mut self, id: DecisionId) -> BnpResult<Vec<ReleasedNode>> {
        let node = self.node_mut(id)?;
        if node.holds == 0 {
            return Err(BnpError::CorruptedTree { decision: id, reason: "released more often than held".to_string() });
        }
        node.holds -= 1;
        self.reap(id)
    }

    /// Destroys `id` and then its ancestors as long as they are unused
    pub fn reap(&mut self, id: DecisionId) -> BnpResult<Vec<ReleasedNode>> {
        let mut released = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            let node = self.node(c)?;
            if node.active || node.holds > 0 || node.live_children > 0 {
                break;
            }
            current = node.parent;
            released.push(self.destroy(c)?);
        }
        Ok(released)
    }

    fn destroy(&mut self, id: DecisionId) -> BnpResult<ReleasedNode> {
        let node = self.nodes.get_mut(id.index()).and_then(Option::take).ok_or(BnpError::UnknownDecision(id))?;
        if let Some(parent) = node.parent {
            let p = self.node_mut(parent).map_err(|_| BnpError::CorruptedTree {
                decision: id,
                reason: format!("parent {parent} destroyed before its child"),
            })?;
            p.live_children -= 1;
        }
        if self.root == Some(id) {
            self.root = None;
        }
        Ok(ReleasedNode { decision: id, row: node.master_row, artificial: node.artificial })
    }

    /// Deactivates everything and destroys all nodes, children first
    pub fn teardown(&mut self) -> BnpResult<Vec<ReleasedNode>> {
        while let Some(top) = self.active_node() {
            self.deactivate(top)?;
        }
        let mut released = Vec::new();
        // children always have larger ids than their parents
        for i in (0..self.nodes.len()).rev() {
            if self.nodes[i].is_some() {
                released.push(self.destroy(DecisionId::from_index(i))?);
            }
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branching::BoundSense;

    fn up(pos: usize, v: f64) -> Vec<ComponentBound> {
        vec![ComponentBound::new(pos, BoundSense::GreaterEqual, v)]
    }

    #[test]
    fn activation_is_stack_ordered() {
        let mut chain = DecisionChain::new();
        let root = chain.create_root().unwrap();
        let a = chain.create_decision_node(root, up(0, 1.0), 0, BranchDirection::Up, 1.0, None).unwrap();
        let b = chain.create_decision_node(a, up(1, 1.0), 0, BranchDirection::Up, 1.0, None).unwrap();

        assert_eq!(chain.activate(a), Err(BnpError::ChainNotNested(a)));
        chain.activate(root).unwrap();
        chain.activate(a).unwrap();
        chain.activate(b).unwrap();
        assert_eq!(chain.active_path(), &[root, a, b]);
        assert_eq!(chain.deactivate(a), Err(BnpError::ChainNotNested(a)));
        chain.deactivate(b).unwrap();
        assert_eq!(chain.active_node(), Some(a));
        assert_eq!(chain.common_ancestor(b, a).unwrap(), Some(a));
    }

    #[test]
    fn children_are_destroyed_before_parents() {
        let mut chain = DecisionChain::new();
        let root = chain.create_root().unwrap();
        let a = chain.create_decision_node(root, up(0, 1.0), 0, BranchDirection::Up, 1.0, None).unwrap();
        let b = chain.create_decision_node(a, up(1, 1.0), 0, BranchDirection::Up, 1.0, None).unwrap();

        // a's search node is done, b still holds it through the parent link
        assert!(chain.release(a).unwrap().is_empty());
        assert!(chain.is_alive(a));

        let released: Vec<DecisionId> = chain.release(b).unwrap().iter().map(|r| r.decision).collect();
        assert_eq!(released, vec![b, a]);
        assert!(chain.is_alive(root));
        assert_eq!(chain.release(b), Err(BnpError::UnknownDecision(b)));
    }

    #[test]
    fn empty_separating_set_is_rejected() {
        let mut chain = DecisionChain::new();
        let root = chain.create_root().unwrap();
        let res = chain.create_decision_node(root, vec![], 0, BranchDirection::Up, 1.0, None);
        assert!(matches!(res, Err(BnpError::InvalidBranchingData(_))));
        assert_eq!(chain.len(), 1);
    }
}
