//! Per-iteration solve record.

use std::fmt;

/// Snapshot of one completed dual Newton iteration.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    /// 1-based iteration number.
    pub iteration: usize,
    /// Euclidean norm of the dual gradient at the start of the iteration.
    pub gradient_norm: f64,
    /// Euclidean norm of the step direction Δλ.
    pub step_norm: f64,
    /// Accepted step size α.
    pub step_size: f64,
    /// Euclidean norm of λ after the step.
    pub lambda_norm: f64,
    /// Incumbent dual objective after the step.
    pub objective: f64,
    /// Number of active bound constraints across all stages.
    pub n_active_constraints: usize,
    /// Number of activity changes against the previous iteration.
    pub n_changed_constraints: usize,
    /// Largest stage index whose active set changed, if any.
    pub last_act_set_change: Option<usize>,
    /// Whether the Newton Hessian was regularized this iteration.
    pub hessian_regularized: bool,
    /// Objective / slope evaluations spent by the line search.
    pub line_search_iterations: usize,
}

impl fmt::Display for IterationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "it {:>3}  |grad| {:>10.4e}  |dLambda| {:>10.4e}  alpha {:>8.4}  obj {:>12.6e}  act {:>4}  chgd {:>4}{}",
            self.iteration,
            self.gradient_norm,
            self.step_norm,
            self.step_size,
            self.objective,
            self.n_active_constraints,
            self.n_changed_constraints,
            if self.hessian_regularized { "  reg" } else { "" },
        )
    }
}
