//! Error and status types for setup and solve calls.
//!
//! A solve that runs to a defined end returns a [`SolveStatus`]; everything
//! that aborts the solve (or rejects problem data) is a [`QpError`]. After a
//! failed solve the last consistent primal/dual iterate remains readable
//! through the solver accessors.

use thiserror::Error;

/// Terminal outcome of a completed [`solve`](crate::solver::DualQp::solve).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// The dual gradient norm fell below the stationarity tolerance.
    Optimal,
    /// `max_iter` Newton iterations were performed without reaching
    /// stationarity.
    IterationLimit,
}

impl SolveStatus {
    /// Whether the returned iterate is a certified optimum.
    pub fn is_optimal(self) -> bool {
        matches!(self, SolveStatus::Optimal)
    }
}

/// Outcome of one step-length determination.
///
/// `MaxIterations` and `MaxStepSize` are soft exits: the step found so far
/// is committed and the Newton iteration continues. `MinStepSize` means the
/// search direction yields no ascent and terminates the solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSearchStatus {
    /// A step satisfying the acceptance rule was found.
    Accepted,
    /// The search hit its iteration cap; the current step is used as is.
    MaxIterations,
    /// Interval growth reached `line_search_max_step_size`.
    MaxStepSize,
    /// The step shrank below the minimum resolvable size.
    MinStepSize,
}

/// Failures raised during problem setup or by a solve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QpError {
    /// Rejected option, dimension, or stage data.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A stage QP could not be solved for the current multipliers.
    #[error("stage QP {0} is infeasible")]
    StageInfeasible(usize),

    /// The Newton direction has non-positive directional derivative and the
    /// line search could not make progress along it.
    #[error("Newton system yields no ascent direction")]
    NoAscentDirection,

    /// A Newton Hessian pivot fell below tolerance and the configured
    /// regularization could not repair it.
    #[error("singular Newton Hessian block (division by zero)")]
    DivisionByZero,
}
