//! Step-length determination on the piecewise-quadratic concave dual.
//!
//! Kinks of the dual restricted to the ray `λ + α·Δλ` occur where some
//! stage's active set changes; the smallest such step size `α_min` is
//! reported by the stage solvers. If the full step stays short of every
//! kink and the Hessian was not regularized, α = 1 is exact and accepted
//! without search. Otherwise one of the configured strategies searches the
//! ray, and the accepted step is committed to λ and all stages.

use log::trace;

use crate::clipping::StageSolver;
use crate::error::{LineSearchStatus, QpError};
use crate::newton::gradient::compute_trial_gradient;
use crate::options::LineSearchKind;
use crate::solver::DualQp;

impl DualQp {
    /// Determine the step length along `Δλ`, commit it, and refresh the
    /// incumbent objective. Returns the line-search status and the number
    /// of objective/slope evaluations spent.
    ///
    /// On [`LineSearchStatus::MinStepSize`] nothing is committed; the
    /// driver turns that into [`QpError::NoAscentDirection`].
    pub(crate) fn determine_step_length(
        &mut self,
        hessian_regularized: bool,
    ) -> Result<(LineSearchStatus, usize), QpError> {
        let mut counter = 0usize;

        // smallest step at which any stage's active set changes
        let mut alpha_min_as = f64::INFINITY;
        for stage in &self.stages {
            let a = self
                .stage_solver
                .min_step_size(stage, self.options.zero, self.options.infinity);
            alpha_min_as = alpha_min_as.min(a);
        }

        // the full step is exact while no kink is crossed
        if alpha_min_as > 1.0 - self.options.equality_tolerance && !hessian_regularized {
            self.alpha = 1.0;
            self.commit_accepted_step();
            return Ok((LineSearchStatus::Accepted, counter));
        }

        let incumbent = self.objective;
        let status = match self.options.line_search_kind {
            LineSearchKind::Backtracking => {
                self.backtracking(&mut counter, 0.0, 1.0, incumbent)
            }
            LineSearchKind::BacktrackingWithActiveSetChange => {
                let status = self.backtracking(&mut counter, 0.0, 1.0, incumbent);
                // force at least one active-set change so the next Newton
                // Hessian carries new information
                if status != LineSearchStatus::MinStepSize
                    && alpha_min_as < 1.0 - self.options.equality_tolerance
                    && self.alpha < alpha_min_as
                {
                    self.alpha = alpha_min_as;
                }
                status
            }
            LineSearchKind::GoldenSection => {
                return Err(QpError::InvalidArgument(
                    "golden section line search is not implemented",
                ));
            }
            LineSearchKind::GradientBisection => {
                let lo = Self::finite_or_zero(alpha_min_as, 1.0);
                self.bisection_interval_search(&mut counter, lo, 1.0)
            }
            LineSearchKind::AcceleratedGradientBisection => {
                let status = self.backtracking(&mut counter, 0.0, 1.0, incumbent);
                if status == LineSearchStatus::MinStepSize {
                    status
                } else {
                    // narrow to the last step that did not yet lose ascent
                    let alpha_max =
                        (self.alpha / self.options.line_search_reduction_factor).min(1.0);
                    let lo = Self::finite_or_zero(alpha_min_as, alpha_max);
                    self.bisection_interval_search(&mut counter, lo, alpha_max)
                }
            }
            LineSearchKind::Grid => {
                let lo = Self::finite_or_zero(alpha_min_as, 1.0);
                self.grid_search(&mut counter, lo, 1.0, incumbent)?
            }
            LineSearchKind::AcceleratedGrid => {
                let status = self.backtracking(&mut counter, 0.0, 1.0, incumbent);
                if status == LineSearchStatus::MinStepSize {
                    status
                } else {
                    let alpha_max =
                        (self.alpha / self.options.line_search_reduction_factor).min(1.0);
                    let lo = Self::finite_or_zero(alpha_min_as, alpha_max);
                    self.grid_search(&mut counter, lo, alpha_max, incumbent)?
                }
            }
        };

        if status == LineSearchStatus::MinStepSize {
            return Ok((status, counter));
        }

        self.commit_accepted_step();
        Ok((status, counter))
    }

    /// Lower search-interval end from the kink locator: the first kink when
    /// one exists ahead of `cap`, otherwise zero (a regularized step may
    /// have to shrink below the full step even without kinks).
    fn finite_or_zero(alpha_min_as: f64, cap: f64) -> f64 {
        if alpha_min_as < cap { alpha_min_as } else { 0.0 }
    }

    /// Apply the accepted `self.alpha`: advance λ, commit every stage, and
    /// refresh the incumbent objective.
    fn commit_accepted_step(&mut self) {
        let alpha = self.alpha;
        self.lambda.axpy(alpha, &self.delta_lambda, 1.0);
        for stage in &mut self.stages {
            self.stage_solver.commit_step(stage, alpha);
        }
        self.objective = self.compute_objective();
    }

    /// Dual objective at trial step length `alpha` (no committed state is
    /// touched).
    pub(crate) fn parametric_objective(&mut self, alpha: f64) -> f64 {
        let mut obj = 0.0;
        for stage in &mut self.stages {
            obj += self.stage_solver.trial_step(stage, alpha);
        }
        obj
    }

    /// Directional derivative of the dual at trial step length `alpha`,
    /// normalized by `max(1, ‖Δλ‖)`.
    fn normalized_trial_slope(&mut self, alpha: f64) -> f64 {
        for stage in &mut self.stages {
            self.stage_solver.trial_point(stage, alpha);
        }
        compute_trial_gradient(&self.stages, self.nx, &mut self.gradient_trial);
        let slope = self.gradient_trial.dot(&self.delta_lambda);
        slope / self.delta_lambda.norm().max(1.0)
    }

    /// Shrink from `alpha_max` until the objective improves on the
    /// incumbent by the demanded progress.
    fn backtracking(
        &mut self,
        counter: &mut usize,
        alpha_min: f64,
        alpha_max: f64,
        incumbent: f64,
    ) -> LineSearchStatus {
        let minimum_progress = self.options.minimum_progress(incumbent);
        let norm_delta_lambda = self.delta_lambda.norm();
        let mut alpha = alpha_max;

        while *counter < self.options.max_num_line_search_iterations {
            *counter += 1;
            let obj = self.parametric_objective(alpha);
            trace!("backtracking: alpha {alpha:.6e} objective {obj:.6e}");
            if obj > incumbent + minimum_progress {
                self.alpha = alpha;
                return LineSearchStatus::Accepted;
            }
            alpha *= self.options.line_search_reduction_factor;

            if norm_delta_lambda * (alpha - alpha_min) < self.options.equality_tolerance {
                self.alpha = alpha_min;
                return LineSearchStatus::MinStepSize;
            }
        }
        self.alpha = alpha;
        LineSearchStatus::MaxIterations
    }

    /// Two-phase search on the directional derivative: grow the interval
    /// while the slope at its right end still ascends, then bisect on the
    /// slope sign.
    fn bisection_interval_search(
        &mut self,
        counter: &mut usize,
        mut alpha_min: f64,
        mut alpha_max: f64,
    ) -> LineSearchStatus {
        let tol = self.options.line_search_stationarity_tolerance;
        let cap = self.options.max_num_line_search_refinement_iterations;

        // (1) check whether the right end is stationary or still ascending
        while *counter < cap {
            *counter += 1;
            let slope = self.normalized_trial_slope(alpha_max);
            trace!("bisection grow: alpha {alpha_max:.6e} slope {slope:.6e}");
            if slope.abs() <= tol {
                self.alpha = alpha_max;
                return LineSearchStatus::Accepted;
            }
            if slope < 0.0 {
                break;
            }
            alpha_min = alpha_max;
            alpha_max *= self.options.line_search_increase_factor;
            if alpha_max > self.options.line_search_max_step_size {
                self.alpha = alpha_min;
                return LineSearchStatus::MaxStepSize;
            }
        }

        // (2) bisect on the slope sign
        let mut alpha_c = 0.5 * (alpha_min + alpha_max);
        while *counter < cap {
            *counter += 1;
            alpha_c = 0.5 * (alpha_min + alpha_max);
            let slope = self.normalized_trial_slope(alpha_c);
            trace!("bisection: alpha {alpha_c:.6e} slope {slope:.6e}");
            if slope.abs() <= tol {
                self.alpha = alpha_c;
                return LineSearchStatus::Accepted;
            }
            if slope > 0.0 {
                alpha_min = alpha_c;
            } else {
                alpha_max = alpha_c;
            }
        }
        self.alpha = alpha_c;
        LineSearchStatus::MaxIterations
    }

    /// Evaluate the objective on an equidistant grid over
    /// `[alpha_min, alpha_max]` and keep the maximizer that improves the
    /// incumbent.
    fn grid_search(
        &mut self,
        counter: &mut usize,
        alpha_min: f64,
        alpha_max: f64,
        incumbent: f64,
    ) -> Result<LineSearchStatus, QpError> {
        let n = self.options.line_search_nbr_grid_points;
        if n < 2 {
            return Err(QpError::InvalidArgument(
                "grid search needs at least two grid points",
            ));
        }
        let mut best = incumbent;
        let spacing = (alpha_max - alpha_min) / (n - 1) as f64;
        for k in 0..n {
            let alpha_try = alpha_min + k as f64 * spacing;
            let obj = self.parametric_objective(alpha_try);
            if obj > best {
                best = obj;
                self.alpha = alpha_try;
            }
        }
        *counter += n;
        Ok(LineSearchStatus::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::QpOptions;
    use crate::stage::Coupling;
    use nalgebra::{DMatrix, DVector};

    /// Hand-built solver state: two stages, one coupling, with the stage
    /// homotopy data set directly so the dual restricted to the ray is
    /// `φ(α) = φ(0) + α − 6α²` before the kink at `α = 0.25` and
    /// `φ(0) − 4α² + 0.125` beyond it. The full step loses ascent, α = 0.1
    /// regains it, and the first active-set change sits at exactly 0.25.
    fn crafted_solver(kind: LineSearchKind) -> DualQp {
        let options = QpOptions {
            line_search_kind: kind,
            ..QpOptions::default()
        };
        let mut qp = DualQp::new(1, 1, 1, options).unwrap();

        let s = 2.0 * std::f64::consts::SQRT_2;
        {
            let stage0 = &mut qp.stages[0];
            stage0.coupling = Some(Coupling {
                c_mat: DMatrix::from_row_slice(1, 2, &[0.5 * s, 0.0]),
                c_vec: DVector::zeros(1),
            });
            stage0.q = DVector::from_vec(vec![-1.0 / s, 0.0]);
            stage0.q_step = DVector::from_vec(vec![s, 0.0]);
            stage0.z_unconstrained = DVector::from_vec(vec![1.0 / s, 0.0]);
            stage0.dz = DVector::from_vec(vec![-s, 0.0]);
            stage0.z.copy_from(&stage0.z_unconstrained);
        }
        {
            let stage1 = &mut qp.stages[1];
            stage1.z_upp[0] = 0.5;
            stage1.q_step = DVector::from_vec(vec![-2.0]);
            stage1.dz = DVector::from_vec(vec![2.0]);
        }
        qp.delta_lambda[0] = 2.0;
        qp.objective = qp.parametric_objective(0.0);
        qp
    }

    #[test]
    fn crafted_dual_shape() {
        let mut qp = crafted_solver(LineSearchKind::Backtracking);
        let phi0 = qp.objective;
        // φ(α) − φ(0) = α − 6α² up to the kink, −4α² + 0.125 beyond
        for &(alpha, expect) in &[(0.1, 0.04), (0.25, -0.125), (1.0, -3.875)] {
            let got = qp.parametric_objective(alpha) - phi0;
            assert!(
                (got - expect).abs() < 1e-12,
                "phi({alpha}) - phi(0) = {got}, expected {expect}"
            );
        }
        // the kink is the first active-set change
        let a = qp.stage_solver.min_step_size(&qp.stages[1], 1e-20, 1e12);
        assert_eq!(a, 0.25);
    }

    #[test]
    fn backtracking_accepts_first_improving_step() {
        let mut qp = crafted_solver(LineSearchKind::Backtracking);
        let (status, iters) = qp.determine_step_length(false).unwrap();
        assert_eq!(status, LineSearchStatus::Accepted);
        // α = 1 rejected, α = 0.1 accepted
        assert_eq!(iters, 2);
        assert_eq!(qp.alpha, 0.1);
    }

    #[test]
    fn as_change_clamps_to_first_kink() {
        let mut qp = crafted_solver(LineSearchKind::BacktrackingWithActiveSetChange);
        let (status, _) = qp.determine_step_length(false).unwrap();
        assert_eq!(status, LineSearchStatus::Accepted);
        // accepted α = 0.1 is pulled up to the first active-set change
        assert_eq!(qp.alpha, 0.25);
        // the step was committed with the clamped α
        assert_eq!(qp.lambda[0], 0.5);
        assert_eq!(qp.stages[1].z[0], 0.5);
    }

    #[test]
    fn bisection_lands_near_the_maximizer() {
        let mut qp = crafted_solver(LineSearchKind::GradientBisection);
        // early kink at α = 0.025; beyond it φ(α) − φ(0) = 0.9α − 4α² +
        // 0.00125 with its maximizer at α = 0.1125, inside the bisection
        // interval
        qp.stages[1].z_upp[0] = 0.05;
        let phi0 = qp.objective;
        let (status, _) = qp.determine_step_length(false).unwrap();
        assert_eq!(status, LineSearchStatus::Accepted);
        assert!(
            (qp.alpha - 0.1125).abs() < 1e-3,
            "alpha = {} should be near 0.1125",
            qp.alpha
        );
        assert!(qp.objective > phi0);
    }

    #[test]
    fn grid_keeps_the_best_point() {
        let mut qp = crafted_solver(LineSearchKind::Grid);
        // kink at α = 0.05; beyond it φ(α) − φ(0) = 0.8α − 4α² + 0.005,
        // positive at the kink and falling on the rest of the grid
        qp.stages[1].z_upp[0] = 0.1;
        let (status, iters) = qp.determine_step_length(false).unwrap();
        assert_eq!(status, LineSearchStatus::Accepted);
        assert_eq!(iters, qp.options.line_search_nbr_grid_points);
        // grid over [0.05, 1] with 5 points: the first point wins
        assert!(
            (qp.alpha - 0.05).abs() < 1e-15,
            "alpha = {} should be the first grid point",
            qp.alpha
        );
    }

    #[test]
    fn descent_direction_fails_with_min_step() {
        let mut qp = crafted_solver(LineSearchKind::Backtracking);
        // flip the ray: φ(α) = φ(0) − α − 6α² never improves
        {
            let stage0 = &mut qp.stages[0];
            stage0.q = DVector::from_vec(vec![1.0 / (2.0 * std::f64::consts::SQRT_2), 0.0]);
            stage0.z_unconstrained[0] = -stage0.q[0];
            let z_unc = stage0.z_unconstrained.clone();
            stage0.z.copy_from(&z_unc);
        }
        qp.objective = qp.parametric_objective(0.0);
        let (status, _) = qp.determine_step_length(false).unwrap();
        assert_eq!(status, LineSearchStatus::MinStepSize);
    }

    #[test]
    fn full_step_shortcut_without_kinks() {
        let mut qp = crafted_solver(LineSearchKind::Backtracking);
        // move the bound out of reach: no kink before α = 1
        qp.stages[1].z_upp[0] = 1e12;
        let (status, iters) = qp.determine_step_length(false).unwrap();
        assert_eq!(status, LineSearchStatus::Accepted);
        assert_eq!(iters, 0);
        assert_eq!(qp.alpha, 1.0);
    }
}
