mod common;

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::common::{self, DenseLp};
    use dw_bnp::bridge::master_to_orig;
    use dw_bnp::misc::{MasterVarId, OrigVarId};
    use dw_bnp::{BnpError, Column, MasterSolution, Session};

    fn column(session: &mut Session, lp: &mut DenseLp, block: usize, values: Vec<f64>) -> MasterVarId {
        session.materialize_column(&Column::point(block, values, -1.0), lp).unwrap().unwrap()
    }

    fn solution(values: Vec<(MasterVarId, f64)>) -> MasterSolution {
        MasterSolution { obj: 0.0, values }
    }

    #[test]
    fn single_column_round_trip() {
        let mut session = common::session_for(common::single_var_blocks(1));
        let mut lp = DenseLp::new();
        session.build_master(&mut lp).unwrap();
        let three = column(&mut session, &mut lp, 0, vec![3.0]);

        let orig = session.master_sol_to_orig_sol(&solution(vec![(three, 1.0)])).unwrap();
        assert_eq!(orig.values, vec![3.0]);
        assert_relative_eq!(orig.obj, 3.0);

        let back = session.orig_vals_to_master_vals(&[OrigVarId(0)], &orig.values, &[three]);
        assert_relative_eq!(back[0], 1.0);
    }

    #[test]
    fn identical_blocks_are_filled_copy_by_copy() {
        let mut session = common::session_for(common::bin_packing());
        let mut lp = DenseLp::new();
        session.build_master(&mut lp).unwrap();
        let pair = column(&mut session, &mut lp, 0, vec![1.0, 1.0, 0.0, 1.0]);
        let single = column(&mut session, &mut lp, 0, vec![0.0, 0.0, 1.0, 1.0]);

        let orig = session.master_sol_to_orig_sol(&solution(vec![(pair, 1.0), (single, 1.0)])).unwrap();
        assert_eq!(orig.values, vec![1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
        assert_relative_eq!(orig.obj, 5.0);
        assert!(session.problem().check_solution(&orig.values, 1e-6).is_ok());

        // fractional parts share the first copy
        let orig = session.master_sol_to_orig_values(&solution(vec![(pair, 0.5), (single, 0.5)])).unwrap();
        for (got, want) in orig.iter().zip([0.5, 0.5, 0.5, 1.0, 0.0, 0.0, 0.0, 0.0]) {
            assert_relative_eq!(*got, want);
        }
    }

    #[test]
    fn more_units_than_copies_fail() {
        let mut session = common::session_for(common::bin_packing());
        let mut lp = DenseLp::new();
        session.build_master(&mut lp).unwrap();
        let pair = column(&mut session, &mut lp, 0, vec![1.0, 1.0, 0.0, 1.0]);
        let single = column(&mut session, &mut lp, 0, vec![0.0, 0.0, 1.0, 1.0]);

        let res = session.master_sol_to_orig_sol(&solution(vec![(pair, 2.0), (single, 1.0)]));
        assert!(matches!(res, Err(BnpError::InfeasibleBridge(_))));
    }

    #[test]
    fn small_bound_violations_are_clamped() {
        let mut session = common::session_for(common::single_var_blocks(1));
        let mut lp = DenseLp::new();
        session.build_master(&mut lp).unwrap();
        let slightly = column(&mut session, &mut lp, 0, vec![5.000_005]);
        let far = column(&mut session, &mut lp, 0, vec![5.1]);

        let point = master_to_orig(session.vars(), &solution(vec![(slightly, 1.0)]), 1e-6, 10.0).unwrap();
        assert_eq!(point.values, vec![5.0]);
        assert_eq!(point.anomalies.len(), 1);
        assert!(matches!(point.anomalies[0], BnpError::NumericAnomaly { var: OrigVarId(0), bound, .. } if bound == 5.0));
        assert!(point.violations.is_empty());

        let orig = session.master_sol_to_orig_sol(&solution(vec![(slightly, 1.0)])).unwrap();
        assert_eq!(orig.values, vec![5.0]);

        let res = session.master_sol_to_orig_sol(&solution(vec![(far, 1.0)]));
        assert!(matches!(res, Err(BnpError::InfeasibleBridge(_))));
    }

    #[test]
    fn positive_artificial_has_no_original_solution() {
        let mut session = common::session_for(common::single_var_blocks(1));
        let mut lp = DenseLp::new();
        session.build_master(&mut lp).unwrap();
        let art = session.vars().master_vars().find(|(_, v)| v.is_artificial()).map(|(id, _)| id).unwrap();

        let sol = solution(vec![(art, 1.0)]);
        assert!(session.has_positive_artificial(&sol));
        assert!(matches!(session.master_sol_to_orig_sol(&sol), Err(BnpError::InfeasibleBridge(_))));
    }

    #[test]
    fn direct_copies_carry_their_value() {
        let mut session = common::session_for(common::with_master_var());
        let mut lp = DenseLp::new();
        session.build_master(&mut lp).unwrap();
        let copy = session.direct_copy_of(OrigVarId(1)).unwrap();
        let one = column(&mut session, &mut lp, 0, vec![1.0]);

        let orig = session.master_sol_to_orig_sol(&solution(vec![(one, 1.0), (copy, 2.0)])).unwrap();
        assert_eq!(orig.values, vec![1.0, 2.0]);
        assert!(session.problem().check_solution(&orig.values, 1e-6).is_ok());

        let back = session.orig_vals_to_master_vals(&[OrigVarId(0), OrigVarId(1)], &orig.values, &[one, copy]);
        assert_relative_eq!(back[0], 1.0);
        assert_relative_eq!(back[1], 2.0);
    }
}
