/*
   Open node queue of the sequential branch-and-price search.

   Nodes are kept in a binary heap whose comparator is swapped
   once an incumbent exists: depth first before, best bound after.
   The queue doubles as the host search tree the branching rules
   talk to: children are staged on the focus node and only enter
   the heap once the rule has finished attaching constraints.
*/

use binary_heap_plus::BinaryHeap;
use compare::Compare;

use crate::branching::{NodeConstraint, SearchTree};
use crate::master_problem::branch::{NodeComparator, OpenNode};
use crate::master_problem::DualStore;
use crate::misc::{DecisionId, NodeHandle};


/// Priority queue of open branch-and-bound nodes
pub struct NodeQueue {
    queue: BinaryHeap<OpenNode, NodeComparator>,
    did_swap_priority: bool,
    node_counter: u32,
    focus: Option<(OpenNode, f64, Option<(f64, DualStore)>)>,
    staged: Vec<OpenNode>,
}

impl NodeQueue {
    /// Create empty queue in depth first mode
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::from_vec_cmp(vec![] as Vec<OpenNode>, NodeComparator::without_bound()),
            did_swap_priority: false,
            node_counter: 0,
            focus: None,
            staged: Vec::new(),
        }
    }

    /// Hands out the next node handle
    pub fn next_handle(&mut self) -> NodeHandle {
        let handle = NodeHandle(self.node_counter);
        self.node_counter += 1;
        handle
    }

    /// Switch to best bound ordering
    pub fn now_has_bound(&mut self) {

        // only swap if not previously
        if !self.did_swap_priority {
            self.did_swap_priority = true;
            self.queue.replace_cmp(NodeComparator::with_bound());
        }
    }

    pub fn has_bound(&self) -> bool {
        self.did_swap_priority
    }

    /// push node into the queue
    pub fn add_job(&mut self, node: OpenNode) {
        self.queue.push(node);
    }

    /// pop the node with the highest priority
    pub fn get_job(&mut self) -> Option<OpenNode> {
        self.queue.pop()
    }

    /// Sets the node children are created for
    pub fn set_focus(&mut self, node: &OpenNode, obj: f64, dual_center: Option<(f64, DualStore)>) {
        self.staged.clear();
        self.focus = Some((node.clone(), obj, dual_center));
    }

    /// Moves the staged children into the queue and returns them
    pub fn commit_children(&mut self) -> Vec<OpenNode> {
        let children: Vec<OpenNode> = self.staged.drain(..).collect();
        for child in &children {
            self.queue.push(child.clone());
        }
        self.focus = None;
        children
    }

    /// Drops staged children, used when a rule declined midway
    pub fn discard_children(&mut self) -> Vec<OpenNode> {
        self.staged.drain(..).collect()
    }

    pub fn lowest_bound(&self) -> Option<f64> {
        self.queue.iter().map(|n| n.old_obj_bound).min_by(f64::total_cmp)
    }

    /// Removes all remaining nodes, e.g. on a limit
    pub fn drain(&mut self) -> Vec<OpenNode> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(n) = self.queue.pop() {
            out.push(n);
        }
        out
    }

    /// return number of elements in queue
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for NodeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchTree for NodeQueue {
    fn create_child_node(&mut self, estimate: f64) -> NodeHandle {
        let handle = self.next_handle();
        let (parent, parent_obj, center) = self
            .focus
            .as_ref()
            .expect("children can only be created for a focus node");
        let mut child = parent.create_child(handle, *parent_obj, center.clone());
        child.old_obj_bound = child.old_obj_bound.max(estimate);
        self.staged.push(child);
        handle
    }

    fn add_constraint_to_node(&mut self, node: NodeHandle, cons: NodeConstraint) {
        if let Some(child) = self.staged.iter_mut().find(|c| c.handle == node) {
            match cons {
                NodeConstraint::MasterBranch(decision) => child.decision = decision,
                NodeConstraint::OrigBound(bound) => child.orig_bounds.push(bound),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_first_then_best_bound() {
        let mut q = NodeQueue::new();
        let root = OpenNode::root(q.next_handle(), DecisionId(0));
        q.set_focus(&root, 1.0, None);
        let a = q.create_child_node(5.0);
        let b = q.create_child_node(2.0);
        assert_eq!(q.commit_children().len(), 2);

        // depth tie: newest child first
        assert_eq!(q.get_job().map(|n| n.handle), Some(b));

        let mut grandchild = root.create_child(q.next_handle(), 9.0, None);
        grandchild.depth = 2;
        q.add_job(grandchild.clone());
        assert_eq!(q.get_job().map(|n| n.handle), Some(grandchild.handle));

        let c = root.create_child(q.next_handle(), 2.0, None);
        q.add_job(c.clone());
        q.add_job(grandchild.clone());

        q.now_has_bound();
        assert_eq!(q.get_job().map(|n| n.handle), Some(c.handle));
        assert_eq!(q.get_job().map(|n| n.handle), Some(a));
        assert_eq!(q.lowest_bound(), Some(9.0));
        assert!(NodeComparator::with_bound().compare(&c, &root) == core::cmp::Ordering::Less);
    }
}
