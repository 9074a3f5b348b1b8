//! Singular Newton Hessians and the regularization policies.
//!
//! Clamping every variable that feeds a block of the reduced Hessian
//! projects that block to zero, so the first factorization attempt must
//! fail and the configured policy has to recover.

mod common;

use common::scalar_chain;
use dualqp::{QpOptions, RegType, SolveStatus, StageUpdate};
use nalgebra::DVector;

/// A chain whose first reduced-Hessian block is projected to zero: all of
/// stage 0 and the state of stage 1 are pinned, consistently with the
/// dynamics (1 + 0.5 = 1.5), while the rest of the horizon stays free and
/// keeps a nonzero dual gradient.
fn singular_chain_with(options: QpOptions) -> dualqp::DualQp {
    let mut qp = scalar_chain(2, options);
    qp.update_stage_data(
        0,
        StageUpdate {
            z_low: Some(DVector::from_vec(vec![1.0, 0.5])),
            z_upp: Some(DVector::from_vec(vec![1.0, 0.5])),
            ..StageUpdate::default()
        },
    )
    .unwrap();
    qp.update_stage_data(
        1,
        StageUpdate {
            z_low: Some(DVector::from_vec(vec![1.5, -common::OPEN])),
            z_upp: Some(DVector::from_vec(vec![1.5, common::OPEN])),
            ..StageUpdate::default()
        },
    )
    .unwrap();
    qp
}

fn singular_chain(reg_type: RegType) -> dualqp::DualQp {
    singular_chain_with(QpOptions {
        reg_type,
        ..QpOptions::default()
    })
}

#[test]
fn levenberg_marquardt_recovers_from_singular_block() {
    let mut qp = singular_chain(RegType::LevenbergMarquardt);
    let status = qp.solve().expect("regularized solve succeeds");
    assert_eq!(status, SolveStatus::Optimal);

    let log = qp.iteration_log();
    assert!(!log.is_empty());
    assert!(
        log[0].hessian_regularized,
        "the first iteration must report regularization"
    );

    // stage-1 input and final state settle at the analytic optimum:
    // gradient₁ = 1.5 + u₁ − x₂ with u₁ = −λ₁, x₂ = λ₁ → λ₁ = 0.75
    assert!((qp.lambda()[1] - 0.75).abs() < 1e-5, "λ₁ = {}", qp.lambda()[1]);
    assert!((qp.stage_solution(1)[1] + 0.75).abs() < 1e-5);
    assert!((qp.stage_solution(2)[0] - 0.75).abs() < 1e-5);
    // the fully clamped coupling keeps its multiplier at the origin
    assert!(qp.lambda()[0].abs() < 1e-9, "λ₀ = {}", qp.lambda()[0]);
}

#[test]
fn singular_directions_zero_the_degenerate_coordinate() {
    let mut qp = singular_chain(RegType::SingularDirections);
    let status = qp.solve().expect("regularized solve succeeds");
    assert_eq!(status, SolveStatus::Optimal);

    assert!(qp.iteration_log()[0].hessian_regularized);
    assert!((qp.lambda()[1] - 0.75).abs() < 1e-5);
    assert_eq!(qp.lambda()[0], 0.0, "singular direction must stay put");
}

#[test]
fn gradient_step_fallback_still_converges() {
    // gradient steps converge linearly; give them room and a plain
    // backtracking search
    let mut qp = singular_chain_with(QpOptions {
        reg_type: RegType::GradientStep,
        line_search_kind: dualqp::LineSearchKind::Backtracking,
        max_iter: 400,
        ..QpOptions::default()
    });
    let status = qp.solve().expect("gradient fallback succeeds");
    assert_eq!(status, SolveStatus::Optimal);

    let log = qp.iteration_log();
    assert!(!log.is_empty());
    assert!(
        log.iter().all(|r| r.hessian_regularized),
        "every iteration falls back to the gradient"
    );
    assert!((qp.lambda()[1] - 0.75).abs() < 1e-5);
}

#[test]
fn reserved_regularization_is_rejected() {
    let mut qp = singular_chain(RegType::NormalizedLevenbergMarquardt);
    let err = qp.solve().expect_err("reserved strategy must be rejected");
    assert!(matches!(err, dualqp::QpError::InvalidArgument(_)));
}

/// A well-conditioned problem never enters the regularization path, so the
/// reserved strategies are harmless there.
#[test]
fn reserved_regularization_unused_on_regular_problem() {
    let options = QpOptions {
        reg_type: RegType::UnconstrainedHessian,
        ..QpOptions::default()
    };
    let mut qp = scalar_chain(2, options);
    qp.update_stage_data(
        0,
        StageUpdate {
            z_low: Some(DVector::from_vec(vec![1.0, -common::OPEN])),
            z_upp: Some(DVector::from_vec(vec![1.0, common::OPEN])),
            ..StageUpdate::default()
        },
    )
    .unwrap();
    assert_eq!(qp.solve().unwrap(), SolveStatus::Optimal);
}
