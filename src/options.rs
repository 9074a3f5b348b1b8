//! Solver options: iteration caps, numerical thresholds, and the strategy
//! selectors for regularization, factorization order, and line search.
//!
//! Defaults follow the tuning the solver was developed with; they are meant
//! for double precision and horizon lengths typical of embedded MPC.

/// Regularization strategy applied when the Newton Hessian factorization
/// encounters a deficient pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegType {
    /// Add `reg_param` to every diagonal entry and refactorize.
    LevenbergMarquardt,
    /// Reserved; rejected when a regularization pass would need it.
    NormalizedLevenbergMarquardt,
    /// Lift deficient pivots past the infinity sentinel inside the
    /// factorization; the back-substitution zeroes those directions.
    SingularDirections,
    /// Fall back to a plain gradient step for this iteration.
    GradientStep,
    /// Reserved; rejected when a regularization pass would need it.
    UnconstrainedHessian,
}

/// Elimination order of the band Cholesky factorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorizationOrder {
    /// Top-down over block columns.
    BandForward,
    /// Bottom-up over block columns; enables partial refactorization from
    /// the last block whose active set changed.
    BandReverse,
}

/// Step-length determination strategy on the piecewise-quadratic concave
/// dual objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSearchKind {
    /// Shrink from the full step until the objective improves.
    Backtracking,
    /// Backtracking, then force at least the first active-set change.
    BacktrackingWithActiveSetChange,
    /// Recognized but not implemented.
    GoldenSection,
    /// Bisect on the directional derivative sign.
    GradientBisection,
    /// Backtracking pass to narrow the interval, then bisection.
    AcceleratedGradientBisection,
    /// Evaluate the objective on an equidistant grid.
    Grid,
    /// Backtracking pass to narrow the interval, then grid.
    AcceleratedGrid,
}

/// The full recognized option set.
#[derive(Debug, Clone)]
pub struct QpOptions {
    /// Cap on outer dual Newton iterations.
    pub max_iter: usize,
    /// Cap on objective evaluations in the backtracking searches.
    pub max_num_line_search_iterations: usize,
    /// Cap on derivative evaluations in the bisection refinement.
    pub max_num_line_search_refinement_iterations: usize,

    /// Dual gradient norm below which the solve is optimal.
    pub stationarity_tolerance: f64,
    /// Tolerance for equality comparisons and multiplier activity.
    pub equality_tolerance: f64,
    /// Minimum acceptable Newton Hessian Cholesky pivot.
    pub newton_hess_diag_reg_tolerance: f64,
    /// Activity tolerance reserved for general-constraint stage solvers.
    pub activeness_tolerance: f64,
    /// Curvature threshold reserved for ascent verification.
    pub ascent_curvature_tolerance: f64,

    /// Magnitudes below this count as zero.
    pub zero: f64,
    /// Magnitudes above this count as infinite (also the default bound).
    pub infinity: f64,

    /// Number of iterations after the first that take a plain gradient step.
    pub nbr_initial_gradient_steps: usize,

    /// Regularization strategy for deficient Newton Hessians.
    pub reg_type: RegType,
    /// Diagonal shift used by [`RegType::LevenbergMarquardt`].
    pub reg_param: f64,

    /// Elimination order of the band Cholesky.
    pub factorization_order: FactorizationOrder,

    /// Step-length strategy.
    pub line_search_kind: LineSearchKind,
    /// Multiplicative shrink factor, in (0, 1).
    pub line_search_reduction_factor: f64,
    /// Multiplicative growth factor, greater than 1.
    pub line_search_increase_factor: f64,
    /// Absolute objective progress demanded per accepted step.
    pub line_search_min_abs_progress: f64,
    /// Relative objective progress demanded per accepted step.
    pub line_search_min_rel_progress: f64,
    /// Normalized slope magnitude accepted as stationary by the bisection.
    pub line_search_stationarity_tolerance: f64,
    /// Largest step size the bisection interval may grow to.
    pub line_search_max_step_size: f64,
    /// Number of evaluation points of the grid search.
    pub line_search_nbr_grid_points: usize,
}

impl Default for QpOptions {
    fn default() -> Self {
        let equality_tolerance = 2.221e-16;
        Self {
            max_iter: 100,
            // 0.3^19 ~ 1e-10
            max_num_line_search_iterations: 19,
            // 0.62^40 ~ 1e-10
            max_num_line_search_refinement_iterations: 40,

            stationarity_tolerance: 1e-6,
            equality_tolerance,
            newton_hess_diag_reg_tolerance: 1e-10,
            activeness_tolerance: 1e4 * equality_tolerance,
            ascent_curvature_tolerance: 1e-6,

            zero: 1e-20,
            infinity: 1e12,

            nbr_initial_gradient_steps: 0,

            reg_type: RegType::LevenbergMarquardt,
            // should sit well above the pivot tolerance: a deficient pivot
            // means a near-singular direction where mostly gradient
            // information is usable
            reg_param: 1e-6,

            factorization_order: FactorizationOrder::BandReverse,

            line_search_kind: LineSearchKind::AcceleratedGradientBisection,
            line_search_reduction_factor: 0.1,
            line_search_increase_factor: 1.5,
            line_search_min_abs_progress: equality_tolerance,
            line_search_min_rel_progress: 1e-14,
            line_search_stationarity_tolerance: 1e-3,
            line_search_max_step_size: 1.0,
            line_search_nbr_grid_points: 5,
        }
    }
}

impl QpOptions {
    /// Minimum objective progress an accepted line-search step must make on
    /// top of the incumbent value.
    pub(crate) fn minimum_progress(&self, incumbent: f64) -> f64 {
        self.line_search_min_rel_progress * incumbent.abs() + self.line_search_min_abs_progress
    }
}
