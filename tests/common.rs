use dualqp::{DualQp, DynamicsInput, QpOptions, StageCost};
use nalgebra::DMatrix;

pub const OPEN: f64 = 1e12;

/// Scalar double-sum chain: `n_x = n_u = 1`, `H = I`, `x_{k+1} = x_k + u_k`,
/// zero linear terms, over `n` couplings. Bounds start open; callers pin or
/// box individual variables afterwards via `update_stage_data`.
pub fn scalar_chain(n: usize, options: QpOptions) -> DualQp {
    let mut qp = DualQp::new(1, 1, n, options).expect("valid dimensions");
    for k in 0..n {
        qp.setup_regular_stage(
            k,
            StageCost::Identity,
            None,
            DynamicsInput::Coupling(DMatrix::from_row_slice(1, 2, &[1.0, 1.0])),
            None,
            None,
            None,
        )
        .expect("stage data is consistent");
    }
    qp.setup_final_stage(Some(StageCost::Identity), None, None, None)
        .expect("final stage data is consistent");
    qp
}

/// Assert the bound-multiplier invariants on every stage: `y ≥ 0`
/// componentwise and no two-sided activity.
pub fn assert_multiplier_invariants(qp: &DualQp) {
    let n_stages = qp.n_intervals() + 1;
    for k in 0..n_stages {
        let y = qp.bound_multipliers(k);
        for i in 0..y.len() / 2 {
            let (lo, up) = (y[2 * i], y[2 * i + 1]);
            assert!(lo >= 0.0 && up >= 0.0, "stage {k} var {i}: y = ({lo}, {up})");
            assert!(
                lo == 0.0 || up == 0.0,
                "stage {k} var {i}: two-sided activity y = ({lo}, {up})"
            );
        }
    }
}
