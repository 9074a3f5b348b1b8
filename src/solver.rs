//! The dual Newton driver.
//!
//! Owns the stages, the stacked costate multiplier λ, the reduced Newton
//! system, and all scratch storage. A solve alternates stage QP solutions
//! with Newton (or gradient) steps on the dual until the coupling residual
//! drops below the stationarity tolerance.

use log::debug;
use nalgebra::DVector;

use crate::clipping::{ClippingSolver, StageSolver};
use crate::error::{LineSearchStatus, QpError, SolveStatus};
use crate::iter_log::IterationRecord;
use crate::newton::cholesky::{
    PivotPolicy, factorize_forward, factorize_reverse, solve_forward, solve_reverse,
};
use crate::newton::gradient::compute_gradient;
use crate::newton::hessian::{BlockTridiag, assemble_newton_hessian};
use crate::options::{FactorizationOrder, QpOptions, RegType};
use crate::stage::Stage;

/// What the factorization step produced.
enum FactorOutcome {
    /// A usable Cholesky factor, possibly after regularization.
    Factored { regularized: bool },
    /// Factorization failed and the policy asks for a plain gradient step.
    UseGradient,
}

/// Dual Newton solver for a chain of coupled stage QPs.
pub struct DualQp {
    pub(crate) nx: usize,
    pub(crate) nu: usize,
    /// Number of couplings; the horizon has `n_intervals + 1` stages.
    pub(crate) n_intervals: usize,
    pub(crate) options: QpOptions,

    pub(crate) stages: Vec<Stage>,
    pub(crate) stage_solver: ClippingSolver,

    pub(crate) lambda: DVector<f64>,
    pub(crate) delta_lambda: DVector<f64>,
    pub(crate) gradient: DVector<f64>,
    pub(crate) gradient_trial: DVector<f64>,
    pub(crate) hessian: BlockTridiag,
    pub(crate) chol: BlockTridiag,

    /// Step size accepted by the most recent line search.
    pub(crate) alpha: f64,
    /// Incumbent dual objective.
    pub(crate) objective: f64,

    /// Largest stage index with an activity change since the last
    /// factorization (partial refactorization scope).
    pub(crate) pending_refactor: Option<usize>,
    pub(crate) num_iter: usize,
    pub(crate) records: Vec<IterationRecord>,
}

impl DualQp {
    /// Create a solver for `n_intervals` couplings of state dimension `nx`
    /// and input dimension `nu`. Stages start with identity cost, zero
    /// linear terms, and open bounds; use the setup calls to install the
    /// problem data.
    pub fn new(
        nx: usize,
        nu: usize,
        n_intervals: usize,
        options: QpOptions,
    ) -> Result<Self, QpError> {
        if nx == 0 {
            return Err(QpError::InvalidArgument("state dimension must be positive"));
        }
        if n_intervals == 0 {
            return Err(QpError::InvalidArgument(
                "at least one coupling interval is required",
            ));
        }
        let nz = nx + nu;
        let infinity = options.infinity;
        let mut stages: Vec<Stage> = (0..n_intervals)
            .map(|k| Stage::new(k, nz, infinity))
            .collect();
        stages.push(Stage::new(n_intervals, nx, infinity));

        let n_dual = n_intervals * nx;
        Ok(Self {
            nx,
            nu,
            n_intervals,
            options,
            stages,
            stage_solver: ClippingSolver,
            lambda: DVector::zeros(n_dual),
            delta_lambda: DVector::zeros(n_dual),
            gradient: DVector::zeros(n_dual),
            gradient_trial: DVector::zeros(n_dual),
            hessian: BlockTridiag::new(n_intervals, nx),
            chol: BlockTridiag::new(n_intervals, nx),
            alpha: 0.0,
            objective: 0.0,
            pending_refactor: None,
            num_iter: 0,
            records: Vec::new(),
        })
    }

    /// Run the dual Newton iteration to a terminal status.
    pub fn solve(&mut self) -> Result<SolveStatus, QpError> {
        if self.stages[..self.n_intervals]
            .iter()
            .any(|s| s.coupling.is_none())
        {
            return Err(QpError::InvalidArgument(
                "every interior stage needs its coupling data before solving",
            ));
        }
        self.records.clear();
        self.num_iter = 0;

        // resolve the stage QPs at the current λ (initial value embedding
        // after bound updates) and commit the unit step
        self.prime_stages()?;
        self.objective = self.compute_objective();
        self.refresh_active_sets();

        for it in 1..=self.options.max_iter {
            self.num_iter = it;
            let mut hessian_regularized = false;

            // direction: a configurable prefix of gradient steps after the
            // first Newton iteration, Newton otherwise
            let gradient_prefix =
                it > 1 && it - 1 <= self.options.nbr_initial_gradient_steps;
            compute_gradient(&self.stages, self.nx, &mut self.gradient);
            if gradient_prefix {
                self.delta_lambda.copy_from(&self.gradient);
            } else {
                if self.gradient.norm() < self.options.stationarity_tolerance {
                    debug!("optimal at iteration {it}");
                    return Ok(SolveStatus::Optimal);
                }
                assemble_newton_hessian(
                    &self.stages,
                    &mut self.hessian,
                    self.options.equality_tolerance,
                );
                match self.factor_newton_system()? {
                    FactorOutcome::Factored { regularized } => {
                        hessian_regularized = regularized;
                        self.solve_newton_equation();
                        for s in &mut self.stages {
                            s.act_set_changed = false;
                        }
                        self.pending_refactor = None;
                    }
                    FactorOutcome::UseGradient => {
                        hessian_regularized = true;
                        self.delta_lambda.copy_from(&self.gradient);
                    }
                }
            }

            // stage QP directions for the full multiplier step
            self.update_stage_directions()?;

            let gradient_norm = self.gradient.norm();
            let step_norm = self.delta_lambda.norm();

            // line search along Δλ, committing the accepted step
            let (ls_status, ls_iterations) =
                self.determine_step_length(hessian_regularized)?;
            if ls_status == LineSearchStatus::MinStepSize {
                return Err(QpError::NoAscentDirection);
            }

            let (n_active, n_changed, last_change) = self.refresh_active_sets();
            let record = IterationRecord {
                iteration: it,
                gradient_norm,
                step_norm,
                step_size: self.alpha,
                lambda_norm: self.lambda.norm(),
                objective: self.objective,
                n_active_constraints: n_active,
                n_changed_constraints: n_changed,
                last_act_set_change: last_change,
                hessian_regularized,
                line_search_iterations: ls_iterations,
            };
            debug!("{record}");
            self.records.push(record);
        }

        Ok(SolveStatus::IterationLimit)
    }

    /// Rebuild each stage's effective linear term from the current λ,
    /// reset its homotopy state, and commit the unit step.
    fn prime_stages(&mut self) -> Result<(), QpError> {
        let nx = self.nx;
        let lambda = self.lambda.as_slice();
        for (k, stage) in self.stages.iter_mut().enumerate() {
            let l_in = (k > 0).then(|| &lambda[(k - 1) * nx..k * nx]);
            let l_out = (k < self.n_intervals).then(|| &lambda[k * nx..(k + 1) * nx]);
            self.stage_solver.update_stage_direction(stage, l_in, l_out);
            stage.q_step += &stage.g;
            stage.q.fill(0.0);
            stage.p = 0.0;
            stage.z_unconstrained.fill(0.0);
            self.stage_solver
                .solve_direction(stage)
                .map_err(|_| QpError::StageInfeasible(k))?;
            self.stage_solver.commit_step(stage, 1.0);
        }
        Ok(())
    }

    /// Rebuild each stage's linear-term increment and primal direction
    /// from the current Δλ.
    fn update_stage_directions(&mut self) -> Result<(), QpError> {
        let nx = self.nx;
        let dl = self.delta_lambda.as_slice();
        for (k, stage) in self.stages.iter_mut().enumerate() {
            let l_in = (k > 0).then(|| &dl[(k - 1) * nx..k * nx]);
            let l_out = (k < self.n_intervals).then(|| &dl[k * nx..(k + 1) * nx]);
            self.stage_solver.update_stage_direction(stage, l_in, l_out);
            self.stage_solver
                .solve_direction(stage)
                .map_err(|_| QpError::StageInfeasible(k))?;
        }
        Ok(())
    }

    /// Factorize the Newton Hessian under the configured order and
    /// regularization policy.
    fn factor_newton_system(&mut self) -> Result<FactorOutcome, QpError> {
        let n = self.n_intervals;
        let policy = PivotPolicy {
            singular_directions: self.options.reg_type == RegType::SingularDirections,
            tolerance: self.options.newton_hess_diag_reg_tolerance,
            infinity: self.options.infinity,
        };

        let attempt = match self.options.factorization_order {
            FactorizationOrder::BandForward => {
                factorize_forward(&mut self.chol, &self.hessian, policy)
            }
            FactorizationOrder::BandReverse => match self.pending_refactor {
                Some(idx) => {
                    factorize_reverse(&mut self.chol, &self.hessian, idx.min(n - 1), policy)
                }
                // no activity change since the last factorization: the
                // stored factor is still valid
                None => Ok(false),
            },
        };

        let mut regularized = matches!(attempt, Ok(true));
        let failed = attempt.is_err();
        let deficient = !failed && self.chol.min_diag() < self.options.newton_hess_diag_reg_tolerance;

        if failed || deficient {
            match self.options.reg_type {
                RegType::LevenbergMarquardt => {
                    self.hessian.shift_diagonal(self.options.reg_param);
                    regularized = true;
                    debug!(
                        "regularizing Newton Hessian (Levenberg-Marquardt, {:e})",
                        self.options.reg_param
                    );
                    match self.options.factorization_order {
                        FactorizationOrder::BandForward => {
                            factorize_forward(&mut self.chol, &self.hessian, policy)?;
                        }
                        FactorizationOrder::BandReverse => {
                            factorize_reverse(&mut self.chol, &self.hessian, n - 1, policy)?;
                        }
                    }
                }
                RegType::SingularDirections => {
                    // deficient pivots were lifted inside the factorization
                }
                RegType::GradientStep => {
                    debug!("factorization failed, substituting a gradient step");
                    return Ok(FactorOutcome::UseGradient);
                }
                RegType::NormalizedLevenbergMarquardt | RegType::UnconstrainedHessian => {
                    return Err(QpError::InvalidArgument(
                        "reserved regularization strategy",
                    ));
                }
            }
        }

        Ok(FactorOutcome::Factored { regularized })
    }

    /// Back-substitute the gradient through the stored factor into Δλ.
    fn solve_newton_equation(&mut self) {
        match self.options.factorization_order {
            FactorizationOrder::BandForward => solve_forward(
                &self.chol,
                &mut self.delta_lambda,
                &self.gradient,
                self.options.infinity,
            ),
            FactorizationOrder::BandReverse => solve_reverse(
                &self.chol,
                &mut self.delta_lambda,
                &self.gradient,
                self.options.infinity,
            ),
        }
    }

    /// Incumbent dual objective at the committed stage iterates.
    pub(crate) fn compute_objective(&self) -> f64 {
        self.stages
            .iter()
            .map(|s| self.stage_solver.committed_objective(s))
            .sum()
    }

    /// Re-derive all activity vectors, accumulate the change flags, and
    /// widen the pending refactorization scope. Returns the number of
    /// active constraints, changed constraints, and the largest changed
    /// stage of this comparison.
    fn refresh_active_sets(&mut self) -> (usize, usize, Option<usize>) {
        let tol = self.options.equality_tolerance;
        let mut n_active = 0;
        let mut n_changed = 0;
        let mut last_change = None;
        for (k, stage) in self.stages.iter_mut().enumerate() {
            n_active += stage.record_active_set(tol);
            let was_changed = stage.act_set_changed;
            let changed = stage.active_set_changes();
            if changed > 0 {
                n_changed += changed;
                last_change = Some(k);
            }
            // keep earlier, not yet factored-in changes visible
            stage.act_set_changed |= was_changed;
        }
        self.pending_refactor = match (self.pending_refactor, last_change) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        (n_active, n_changed, last_change)
    }

    // --- accessors ---

    /// Solver options.
    pub fn options(&self) -> &QpOptions {
        &self.options
    }

    /// State dimension.
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Input dimension.
    pub fn nu(&self) -> usize {
        self.nu
    }

    /// Number of coupling intervals.
    pub fn n_intervals(&self) -> usize {
        self.n_intervals
    }

    /// Primal iterate of stage `k`.
    pub fn stage_solution(&self, k: usize) -> &DVector<f64> {
        &self.stages[k].z
    }

    /// Bound multipliers of stage `k` in `(lower, upper)` pairs.
    pub fn bound_multipliers(&self, k: usize) -> &DVector<f64> {
        &self.stages[k].y
    }

    /// Primal iterates of all stages stacked into one vector.
    pub fn primal_solution(&self) -> DVector<f64> {
        let total: usize = self.stages.iter().map(|s| s.nv).sum();
        let mut z = DVector::zeros(total);
        let mut offset = 0;
        for s in &self.stages {
            z.rows_mut(offset, s.nv).copy_from(&s.z);
            offset += s.nv;
        }
        z
    }

    /// The stacked costate multiplier.
    pub fn lambda(&self) -> &DVector<f64> {
        &self.lambda
    }

    /// Incumbent dual objective.
    pub fn objective(&self) -> f64 {
        self.objective
    }

    /// Number of outer iterations the last solve performed.
    pub fn iterations(&self) -> usize {
        self.num_iter
    }

    /// Per-iteration records of the last solve.
    pub fn iteration_log(&self) -> &[IterationRecord] {
        &self.records
    }

    /// Install a warm-start guess for the costate multiplier.
    pub fn set_lambda_guess(&mut self, guess: &[f64]) -> Result<(), QpError> {
        if guess.len() != self.lambda.len() {
            return Err(QpError::InvalidArgument(
                "lambda guess length must be n_intervals * nx",
            ));
        }
        self.lambda.copy_from_slice(guess);
        Ok(())
    }
}
