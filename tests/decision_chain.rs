#[cfg(test)]
mod tests {
    use dw_bnp::branching::chain::{BranchDirection, DecisionChain};
    use dw_bnp::branching::{BoundSense, ComponentBound};
    use dw_bnp::misc::DecisionId;
    use dw_bnp::BnpError;

    fn ge(position: usize, threshold: f64) -> Vec<ComponentBound> {
        vec![ComponentBound::new(position, BoundSense::GreaterEqual, threshold)]
    }

    fn less(position: usize, threshold: f64) -> Vec<ComponentBound> {
        vec![ComponentBound::new(position, BoundSense::Less, threshold)]
    }

    #[test]
    fn ancestors_lead_to_the_root() {
        let mut chain = DecisionChain::new();
        let root = chain.create_root().unwrap();
        let a = chain.create_decision_node(root, ge(0, 1.0), 0, BranchDirection::Up, 1.0, None).unwrap();
        let b = chain.create_decision_node(a, ge(1, 2.0), 0, BranchDirection::Up, 1.0, None).unwrap();
        let c = chain.create_decision_node(a, less(1, 2.0), 0, BranchDirection::Down, 1.0, None).unwrap();

        assert_eq!(chain.ancestors(b).unwrap(), vec![b, a, root]);
        assert_eq!(chain.depth(b).unwrap(), 2);
        assert_eq!(chain.parent(c).unwrap(), Some(a));
        assert_eq!(chain.parent(root).unwrap(), None);
        assert_eq!(chain.common_ancestor(b, c).unwrap(), Some(a));
        assert_eq!(chain.common_ancestor(root, c).unwrap(), Some(root));
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn siblings_are_never_active_together() {
        let mut chain = DecisionChain::new();
        let root = chain.create_root().unwrap();
        let up = chain.create_decision_node(root, ge(0, 3.0), 0, BranchDirection::Up, 1.0, None).unwrap();
        let down = chain.create_decision_node(root, less(0, 3.0), 0, BranchDirection::Down, 1.0, None).unwrap();

        chain.activate(root).unwrap();
        chain.activate(up).unwrap();
        let err = chain.activate(down).unwrap_err();
        assert_eq!(err, BnpError::ChainNotNested(down));
        assert!(err.is_fatal());
        assert_eq!(chain.deactivate(root), Err(BnpError::ChainNotNested(root)));

        chain.deactivate(up).unwrap();
        chain.activate(down).unwrap();
        assert_eq!(chain.active_path(), &[root, down]);
        assert!(!chain.node(up).unwrap().is_active());
        assert!(chain.node(down).unwrap().is_active());
    }

    #[test]
    fn active_nodes_outlive_their_last_hold() {
        let mut chain = DecisionChain::new();
        let root = chain.create_root().unwrap();
        let a = chain.create_decision_node(root, ge(0, 1.0), 0, BranchDirection::Up, 1.0, None).unwrap();
        chain.activate(root).unwrap();
        chain.activate(a).unwrap();

        assert!(chain.release(a).unwrap().is_empty());
        assert!(chain.is_alive(a));

        chain.deactivate(a).unwrap();
        let released: Vec<DecisionId> = chain.reap(a).unwrap().iter().map(|r| r.decision).collect();
        assert_eq!(released, vec![a]);
        // the root search node still holds the root
        assert!(chain.is_alive(root));
    }

    #[test]
    fn retained_decision_needs_every_release() {
        let mut chain = DecisionChain::new();
        let root = chain.create_root().unwrap();
        let a = chain.create_decision_node(root, ge(0, 1.0), 0, BranchDirection::Up, 1.0, None).unwrap();
        chain.retain(a).unwrap();

        assert!(chain.release(a).unwrap().is_empty());
        assert_eq!(chain.release(a).unwrap().len(), 1);
        assert!(!chain.is_alive(a));
        assert!(matches!(chain.release(a), Err(BnpError::UnknownDecision(_))));
    }

    #[test]
    fn teardown_destroys_children_first() {
        let mut chain = DecisionChain::new();
        let root = chain.create_root().unwrap();
        let a = chain.create_decision_node(root, ge(0, 1.0), 0, BranchDirection::Up, 1.0, None).unwrap();
        let b = chain.create_decision_node(a, ge(1, 1.0), 0, BranchDirection::Up, 1.0, None).unwrap();
        let c = chain.create_decision_node(root, less(0, 1.0), 0, BranchDirection::Down, 1.0, None).unwrap();
        chain.activate(root).unwrap();
        chain.activate(a).unwrap();
        chain.activate(b).unwrap();

        let order: Vec<DecisionId> = chain.teardown().unwrap().iter().map(|r| r.decision).collect();
        let pos = |d: DecisionId| order.iter().position(|x| *x == d).unwrap();
        assert_eq!(order.len(), 4);
        assert!(pos(b) < pos(a));
        assert!(pos(a) < pos(root));
        assert!(pos(c) < pos(root));
        assert!(chain.is_empty());
        assert!(chain.active_path().is_empty());
        assert_eq!(chain.root(), None);
    }

    #[test]
    fn malformed_decisions_are_rejected() {
        let mut chain = DecisionChain::new();
        let root = chain.create_root().unwrap();

        let nan_rhs = chain.create_decision_node(root, ge(0, 1.0), 0, BranchDirection::Up, f64::NAN, None);
        assert!(matches!(nan_rhs, Err(BnpError::InvalidBranchingData(_))));

        let inf_threshold = chain.create_decision_node(root, ge(0, f64::INFINITY), 0, BranchDirection::Up, 1.0, None);
        assert!(matches!(inf_threshold, Err(BnpError::InvalidBranchingData(_))));

        let orphan = chain.create_decision_node(DecisionId(42), ge(0, 1.0), 0, BranchDirection::Up, 1.0, None);
        assert_eq!(orphan, Err(BnpError::UnknownDecision(DecisionId(42))));

        assert_eq!(chain.len(), 1);
        assert!(matches!(chain.create_root(), Err(BnpError::CorruptedTree { .. })));
    }
}
