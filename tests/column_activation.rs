mod common;

#[cfg(test)]
mod tests {
    use crate::common::{self, DenseLp};
    use dw_bnp::branching::chain::BranchDirection;
    use dw_bnp::branching::{BoundSense, ComponentBound};
    use dw_bnp::misc::{DecisionId, OrigVarId, RowId};
    use dw_bnp::{BnpError, Column, Session};

    fn branch_row(session: &Session, decision: DecisionId) -> RowId {
        session.chain().node(decision).unwrap().master_row().unwrap()
    }

    fn bound(sense: BoundSense, threshold: f64) -> Vec<ComponentBound> {
        vec![ComponentBound::new(0, sense, threshold)]
    }

    /// Root active, up child `g >= 3` and down child `g < 3` of block 0
    fn split_at_three(session: &mut Session, lp: &mut DenseLp) -> (DecisionId, DecisionId) {
        session.build_master(lp).unwrap();
        let root = session.root_decision();
        session.switch_to(root, lp).unwrap();
        let up = session.create_decision_node(root, bound(BoundSense::GreaterEqual, 3.0), 0, BranchDirection::Up, 1.0, None).unwrap();
        let down = session.create_decision_node(root, bound(BoundSense::Less, 3.0), 0, BranchDirection::Down, 1.0, None).unwrap();
        (up, down)
    }

    #[test]
    fn columns_enter_only_the_matching_side() {
        let mut session = common::session_for(common::single_var_blocks(1));
        let mut lp = DenseLp::new();
        let (up, down) = split_at_three(&mut session, &mut lp);

        session.switch_to(up, &mut lp).unwrap();
        let three = session.materialize_column(&Column::point(0, vec![3.0], -1.0), &mut lp).unwrap().unwrap();
        let two = session.materialize_column(&Column::point(0, vec![2.0], -1.0), &mut lp).unwrap().unwrap();

        let up_row = branch_row(&session, up);
        assert_eq!(lp.row_sides(up_row), Some((1.0, f64::INFINITY)));
        assert_eq!(lp.coef(up_row, three), 1.0);
        assert_eq!(lp.coef(up_row, two), 0.0);

        session.switch_to(down, &mut lp).unwrap();
        let down_row = branch_row(&session, down);
        assert_eq!(lp.row_sides(up_row), Some((f64::NEG_INFINITY, f64::INFINITY)));
        assert_eq!(lp.coef(down_row, two), 1.0);
        assert_eq!(lp.coef(down_row, three), 0.0);

        let up_node = session.chain().node(up).unwrap();
        let down_node = session.chain().node(down).unwrap();
        assert!(up_node.is_member(three) && !up_node.is_member(two));
        assert!(down_node.is_member(two) && !down_node.is_member(three));
    }

    #[test]
    fn reactivation_checks_each_column_once() {
        let mut session = common::session_for(common::single_var_blocks(1));
        let mut lp = DenseLp::new();
        let (up, down) = split_at_three(&mut session, &mut lp);

        session.switch_to(up, &mut lp).unwrap();
        let three = session.materialize_column(&Column::point(0, vec![3.0], -1.0), &mut lp).unwrap().unwrap();
        let up_row = branch_row(&session, up);

        session.switch_to(down, &mut lp).unwrap();
        let four = session.materialize_column(&Column::point(0, vec![4.0], -1.0), &mut lp).unwrap().unwrap();
        let one = session.materialize_column(&Column::point(0, vec![1.0], -1.0), &mut lp).unwrap().unwrap();
        let down_row = branch_row(&session, down);
        assert_eq!(lp.coef(down_row, one), 1.0);
        assert_eq!(lp.coef(down_row, four), 0.0);

        // up catches up with the columns created while it was inactive
        session.switch_to(up, &mut lp).unwrap();
        assert_eq!(lp.coef(up_row, three), 1.0);
        assert_eq!(lp.coef(up_row, four), 1.0);
        assert_eq!(lp.coef(up_row, one), 0.0);
        assert_eq!(lp.row_sides(up_row), Some((1.0, f64::INFINITY)));

        session.switch_to(down, &mut lp).unwrap();
        session.switch_to(up, &mut lp).unwrap();
        assert_eq!(lp.coef(up_row, three), 1.0);
        assert_eq!(lp.coef(up_row, four), 1.0);

        let node = session.chain().node(up).unwrap();
        assert!(node.has_evaluated(one));
        assert_eq!(node.num_members(), 2);
    }

    #[test]
    fn decisions_only_see_their_own_block() {
        let mut session = common::session_for(common::single_var_blocks(2));
        let mut lp = DenseLp::new();
        session.build_master(&mut lp).unwrap();
        let root = session.root_decision();
        session.switch_to(root, &mut lp).unwrap();
        let d = session.create_decision_node(root, bound(BoundSense::GreaterEqual, 1.0), 0, BranchDirection::Up, 1.0, None).unwrap();
        session.switch_to(d, &mut lp).unwrap();

        let own = session.materialize_column(&Column::point(0, vec![2.0], -1.0), &mut lp).unwrap().unwrap();
        let other = session.materialize_column(&Column::point(1, vec![5.0], -1.0), &mut lp).unwrap().unwrap();

        let row = branch_row(&session, d);
        assert_eq!(lp.coef(row, own), 1.0);
        assert_eq!(lp.coef(row, other), 0.0);
        assert!(!session.chain().node(d).unwrap().is_member(other));
    }

    #[test]
    fn direct_copies_are_never_enrolled() {
        let mut session = common::session_for(common::with_master_var());
        let mut lp = DenseLp::new();
        session.build_master(&mut lp).unwrap();
        let root = session.root_decision();
        session.switch_to(root, &mut lp).unwrap();
        let d = session.create_decision_node(root, bound(BoundSense::Less, 1.0), 0, BranchDirection::Down, 1.0, None).unwrap();
        session.switch_to(d, &mut lp).unwrap();

        let copy = session.direct_copy_of(OrigVarId(1)).unwrap();
        let zero = session.materialize_column(&Column::point(0, vec![0.0], -1.0), &mut lp).unwrap().unwrap();
        let row = branch_row(&session, d);

        assert!(session.vars().master(zero).generator.is_empty());
        assert_eq!(lp.coef(row, zero), 1.0);
        assert_eq!(lp.coef(row, copy), 0.0);
        assert!(!session.chain().node(d).unwrap().is_member(copy));
        assert!(session.direct_copy_of(OrigVarId(0)).is_none());
    }

    #[test]
    fn released_decisions_give_back_their_row() {
        let mut session = common::session_for(common::single_var_blocks(1));
        let mut lp = DenseLp::new();
        let (up, down) = split_at_three(&mut session, &mut lp);
        let rows_before = lp.num_rows();

        session.switch_to(up, &mut lp).unwrap();
        let up_row = branch_row(&session, up);
        assert_eq!(lp.num_rows(), rows_before + 1);

        session.switch_to(session.root_decision(), &mut lp).unwrap();
        session.release_decision(up, &mut lp).unwrap();
        assert!(!lp.is_row_alive(up_row));
        assert!(!session.chain().is_alive(up));
        assert_eq!(lp.num_rows(), rows_before);

        // never activated, so no row to give back
        session.release_decision(down, &mut lp).unwrap();
        assert_eq!(lp.num_rows(), rows_before);
        assert_eq!(session.chain().len(), 1);
    }

    #[test]
    fn switching_to_a_destroyed_decision_fails() {
        let mut session = common::session_for(common::single_var_blocks(1));
        let mut lp = DenseLp::new();
        let (up, _) = split_at_three(&mut session, &mut lp);
        session.release_decision(up, &mut lp).unwrap();

        assert!(matches!(session.switch_to(up, &mut lp), Err(BnpError::CorruptedTree { .. })));
        let root = session.root_decision();
        let bad_block = session.create_decision_node(root, bound(BoundSense::Less, 1.0), 3, BranchDirection::Down, 1.0, None);
        assert!(matches!(bad_block, Err(BnpError::InvalidBranchingData(_))));
        assert!(!bad_block.unwrap_err().is_fatal());
    }
}
