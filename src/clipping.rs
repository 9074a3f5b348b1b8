//! Closed-form stage QP solver for diagonal Hessians and simple bounds.
//!
//! The stage QPs are parameterized in their linear term by the costate
//! multipliers. The solver tracks the unconstrained minimizer through these
//! parameter changes (a homotopy in the linear term) and obtains the
//! box-constrained solution by clipping, with the bound multipliers read
//! off the clipping residuals.

use crate::error::QpError;
use crate::stage::Stage;

/// The capability a stage solver provides to the dual Newton driver:
/// produce the primal direction for the current multiplier step and report
/// the smallest step size at which the stage's active set changes. Other
/// stage solvers (e.g. a dense active-set method for general constraints)
/// can slot in behind this.
pub(crate) trait StageSolver {
    /// Compute the primal direction `dz = −H⁻¹ q_step` for the stage's
    /// current linear-term increment.
    fn solve_direction(&self, stage: &mut Stage) -> Result<(), QpError>;

    /// Smallest `α ≥ 0` at which `z_unconstrained + α·dz` crosses a bound,
    /// `+∞` if no crossing exists.
    fn min_step_size(&self, stage: &Stage, zero: f64, infinity: f64) -> f64;
}

/// The clipping implementation of [`StageSolver`].
#[derive(Debug, Default)]
pub(crate) struct ClippingSolver;

impl ClippingSolver {
    /// Rebuild the stage's linear-term increment `(q_step, p_step)` from
    /// the incoming and outgoing multiplier blocks. Pass multiplier *steps*
    /// to obtain the per-iteration increment, or full multipliers (plus `g`
    /// added by the caller) to prime a solve.
    pub fn update_stage_direction(
        &self,
        stage: &mut Stage,
        lambda_k: Option<&[f64]>,
        lambda_k1: Option<&[f64]>,
    ) {
        stage.q_step.fill(0.0);
        stage.p_step = 0.0;

        if let (Some(l1), Some(coupling)) = (lambda_k1, stage.coupling.as_ref()) {
            // q_step += Cᵀ λ_{k}, p_step = cᵀ λ_{k}
            for i in 0..l1.len() {
                for j in 0..stage.nv {
                    stage.q_step[j] += coupling.c_mat[(i, j)] * l1[i];
                }
                stage.p_step += coupling.c_vec[i] * l1[i];
            }
        }
        if let Some(l0) = lambda_k {
            // the incoming coupling enters the state part with a minus
            for (i, &v) in l0.iter().enumerate() {
                stage.q_step[i] -= v;
            }
        }
    }

    /// Commit a step of length `alpha`: advance the unconstrained
    /// minimizer, clip into `z`, derive the bound multipliers, and
    /// accumulate the effective linear and constant terms.
    pub fn commit_step(&self, stage: &mut Stage, alpha: f64) {
        for i in 0..stage.nv {
            stage.z_unconstrained[i] += alpha * stage.dz[i];
            let zu = stage.z_unconstrained[i];
            let h = stage.hessian.diag_entry(i);
            stage.z[i] = zu.clamp(stage.z_low[i], stage.z_upp[i]);
            stage.y[2 * i] = (h * (stage.z_low[i] - zu)).max(0.0);
            stage.y[2 * i + 1] = (h * (zu - stage.z_upp[i])).max(0.0);
        }
        for i in 0..stage.nv {
            stage.q[i] += alpha * stage.q_step[i];
        }
        stage.p += alpha * stage.p_step;
    }

    /// Evaluate a trial step of length `alpha` without touching committed
    /// state: writes the clipped trial primal into `stage.z_trial` and
    /// returns the stage objective at that point.
    pub fn trial_step(&self, stage: &mut Stage, alpha: f64) -> f64 {
        for i in 0..stage.nv {
            let zu = stage.z_unconstrained[i] + alpha * stage.dz[i];
            stage.z_trial[i] = zu.clamp(stage.z_low[i], stage.z_upp[i]);
        }
        let mut obj = 0.5 * stage.hessian.quad_form(&stage.z_trial);
        for i in 0..stage.nv {
            obj += (stage.q[i] + alpha * stage.q_step[i]) * stage.z_trial[i];
        }
        obj + stage.p + alpha * stage.p_step
    }

    /// Write the clipped trial primal for step length `alpha` into
    /// `stage.z_trial` without evaluating the objective (slope probes).
    pub fn trial_point(&self, stage: &mut Stage, alpha: f64) {
        for i in 0..stage.nv {
            let zu = stage.z_unconstrained[i] + alpha * stage.dz[i];
            stage.z_trial[i] = zu.clamp(stage.z_low[i], stage.z_upp[i]);
        }
    }

    /// Stage objective at the committed primal iterate.
    pub fn committed_objective(&self, stage: &Stage) -> f64 {
        0.5 * stage.hessian.quad_form(&stage.z) + stage.q.dot(&stage.z) + stage.p
    }

}

impl StageSolver for ClippingSolver {
    fn solve_direction(&self, stage: &mut Stage) -> Result<(), QpError> {
        // dz = −H⁻¹ q_step; H is validated invertible at setup
        let Stage {
            hessian,
            dz,
            q_step,
            ..
        } = stage;
        hessian.apply_inverse(dz, q_step);
        dz.neg_mut();
        Ok(())
    }

    fn min_step_size(&self, stage: &Stage, zero: f64, infinity: f64) -> f64 {
        let mut a_min = f64::INFINITY;
        for i in 0..stage.nv {
            let d = stage.dz[i];
            if d.abs() <= zero {
                continue;
            }
            for bound in [stage.z_low[i], stage.z_upp[i]] {
                if bound.abs() >= infinity {
                    continue;
                }
                let a = (bound - stage.z_unconstrained[i]) / d;
                if (0.0..a_min).contains(&a) {
                    a_min = a;
                }
            }
        }
        a_min
    }
}
