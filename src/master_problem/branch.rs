use std::fmt::{Display, Formatter};
use compare::Compare;

use crate::branching::OrigBranchCons;
use crate::master_problem::DualStore;
use crate::misc::{DecisionId, NodeHandle};


#[derive(Clone)]
/// Orders open nodes in the queue.
///
/// Without an incumbent the deepest node wins (depth first, plunging into
/// the most recent children). Once a bound is known the node with the
/// lowest parent bound is processed first.
pub struct NodeComparator {
    has_bound: bool,
}

impl NodeComparator {

    pub fn with_bound() -> Self {
        Self { has_bound : true }
    }

    pub fn without_bound() -> Self {
        Self { has_bound : false }
    }

    // higher score -> earlier in queue
    fn score_node(n: &OpenNode) -> u64 {
        if matches!(n.special, Some(SpecialType::Root)) {
            return u64::MAX;
        }

        (u64::from(n.depth) << 32) + u64::from(n.handle.0)
    }
}

impl Compare<OpenNode> for NodeComparator {
    fn compare(&self, l: &OpenNode, r: &OpenNode) -> core::cmp::Ordering {
        if self.has_bound {
            r.old_obj_bound.total_cmp(&l.old_obj_bound)
                .then(l.depth.cmp(&r.depth))
                .then(l.handle.cmp(&r.handle))
        } else {
            NodeComparator::score_node(l).cmp(&NodeComparator::score_node(r))
        }
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Indicates a special type of node
pub enum SpecialType {
    Root,
}

impl Display for SpecialType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SpecialType::Root => write!(f, "Root"),
        }
    }
}


#[derive(Debug, Clone)]
/// Open node of the branch-and-bound tree
/// Holds everything needed to resume it later
pub struct OpenNode {
    pub handle: NodeHandle,
    pub parent: Option<NodeHandle>,
    pub depth: u32,
    /// decision chain node this node activates
    pub decision: DecisionId,
    pub old_obj_bound: f64, // objective value of the parent
    pub old_obj_dual_center: Option<(f64, DualStore)>,
    /// mirrored original-problem bounds attached by the branching rule
    pub orig_bounds: Vec<OrigBranchCons>,
    pub special: Option<SpecialType>,
}

impl OpenNode {

    /// Returns the root node, initialized with default values
    pub fn root(handle: NodeHandle, decision: DecisionId) -> Self {
        OpenNode {
            handle,
            parent: None,
            depth: 0,
            decision,
            old_obj_bound: f64::NEG_INFINITY,
            old_obj_dual_center: None,
            orig_bounds: Vec::default(),
            special: Some(SpecialType::Root),
        }
    }

    /// Creates a child that still has to be attached to a decision node.
    /// Until the branching rule adds a master-branch constraint the child
    /// reuses the decision node of its parent. Original bounds are inherited.
    pub fn create_child(&self, handle: NodeHandle, parent_obj: f64, parent_dual_center: Option<(f64, DualStore)>) -> Self {
        OpenNode {
            handle,
            parent: Some(self.handle),
            depth: self.depth + 1,
            decision: self.decision,
            old_obj_bound: parent_obj,
            old_obj_dual_center: parent_dual_center,
            orig_bounds: self.orig_bounds.clone(),
            special: None,
        }
    }

    pub fn last_bound_display(&self) -> String {
        self.orig_bounds.last().map_or_else(|| "-".to_string(), ToString::to_string)
    }
}
