//! Per-interval data of the multi-stage QP.
//!
//! A stage owns its cost and bound data, the coupling to the next stage (if
//! any), the clipping solver state, and its active-set bookkeeping. All
//! buffers are sized once at construction and mutated in place; nothing is
//! allocated during a solve.

use nalgebra::{DMatrix, DVector};

use crate::stage_hessian::StageHessian;

/// Ternary activity status of one variable: lower bound tight, inactive,
/// or upper bound tight.
pub(crate) const ACT_LOWER: i8 = -1;
pub(crate) const ACT_FREE: i8 = 0;
pub(crate) const ACT_UPPER: i8 = 1;
/// Placeholder that compares unequal to every valid status, used to force a
/// full refactorization after data updates.
pub(crate) const ACT_UNKNOWN: i8 = i8::MIN;

/// Affine coupling `x_{k+1} = C z_k + c` carried by every stage but the
/// last.
#[derive(Debug, Clone)]
pub(crate) struct Coupling {
    /// `n_x × n_v` transition matrix (dense).
    pub c_mat: DMatrix<f64>,
    /// Affine offset, length `n_x`.
    pub c_vec: DVector<f64>,
}

#[derive(Debug, Clone)]
pub(crate) struct Stage {
    /// Horizon index of this stage.
    pub id: usize,
    /// Primal dimension: `n_x + n_u` for interior stages, `n_x` for the
    /// last.
    pub nv: usize,

    pub hessian: StageHessian,
    /// Linear cost term, length `nv`.
    pub g: DVector<f64>,
    /// Coupling to the next stage; `None` on the last stage.
    pub coupling: Option<Coupling>,
    pub z_low: DVector<f64>,
    pub z_upp: DVector<f64>,

    /// Current (clipped) primal iterate.
    pub z: DVector<f64>,
    /// Bound multipliers in `(lower, upper)` pairs, length `2 · nv`.
    pub y: DVector<f64>,

    /// Unclipped stage minimizer tracked by the clipping homotopy.
    pub z_unconstrained: DVector<f64>,
    /// Primal direction induced by the current Δλ.
    pub dz: DVector<f64>,
    /// Effective linear term accumulated over accepted steps.
    pub q: DVector<f64>,
    /// Effective constant term accumulated over accepted steps.
    pub p: f64,
    /// Linear-term increment for the current Δλ.
    pub q_step: DVector<f64>,
    /// Constant-term increment for the current Δλ.
    pub p_step: f64,

    pub act_set: Vec<i8>,
    pub prev_act_set: Vec<i8>,
    /// Whether the last active-set comparison found a change on this stage.
    pub act_set_changed: bool,

    /// Trial primal buffer loaned to the line search.
    pub z_trial: DVector<f64>,
}

impl Stage {
    /// A stage with identity cost, zero linear terms, and bounds at
    /// `∓infinity`. Setup replaces the pieces it is given.
    pub fn new(id: usize, nv: usize, infinity: f64) -> Self {
        Self {
            id,
            nv,
            hessian: StageHessian::identity(nv),
            g: DVector::zeros(nv),
            coupling: None,
            z_low: DVector::from_element(nv, -infinity),
            z_upp: DVector::from_element(nv, infinity),
            z: DVector::zeros(nv),
            y: DVector::zeros(2 * nv),
            z_unconstrained: DVector::zeros(nv),
            dz: DVector::zeros(nv),
            q: DVector::zeros(nv),
            p: 0.0,
            q_step: DVector::zeros(nv),
            p_step: 0.0,
            act_set: vec![ACT_UNKNOWN; nv],
            prev_act_set: vec![ACT_UNKNOWN; nv],
            act_set_changed: false,
            z_trial: DVector::zeros(nv),
        }
    }

    /// Re-derive the ternary activity vector from the bound multipliers,
    /// keeping the previous vector for comparison. Returns the number of
    /// active constraints.
    pub fn record_active_set(&mut self, equality_tolerance: f64) -> usize {
        std::mem::swap(&mut self.act_set, &mut self.prev_act_set);
        let mut n_active = 0;
        for i in 0..self.nv {
            self.act_set[i] = if self.y[2 * i] > equality_tolerance {
                n_active += 1;
                ACT_LOWER
            } else if self.y[2 * i + 1] > equality_tolerance {
                n_active += 1;
                ACT_UPPER
            } else {
                ACT_FREE
            };
        }
        n_active
    }

    /// Compare the current activity vector against the previous one,
    /// updating `act_set_changed`. Returns the number of changed entries.
    pub fn active_set_changes(&mut self) -> usize {
        let changed = self
            .act_set
            .iter()
            .zip(self.prev_act_set.iter())
            .filter(|(a, b)| a != b)
            .count();
        self.act_set_changed = changed > 0;
        changed
    }

    /// Poison the stored activity history so the next comparison reports
    /// every entry as changed (full refactorization).
    pub fn invalidate_active_set_history(&mut self) {
        self.prev_act_set.fill(ACT_UNKNOWN);
        self.act_set.fill(ACT_UNKNOWN);
    }

    /// Whether variable `i` has an active bound in the sense of the Newton
    /// Hessian projection (weakly active counts as active).
    pub fn bound_active(&self, i: usize, equality_tolerance: f64) -> bool {
        self.y[2 * i] >= equality_tolerance || self.y[2 * i + 1] >= equality_tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_set_tracking() {
        let mut s = Stage::new(0, 2, 1e12);
        let tol = 1e-12;

        // lower bound active on variable 0
        s.y[0] = 1.0;
        assert_eq!(s.record_active_set(tol), 1);
        // first comparison against the unknown placeholder flags changes
        assert_eq!(s.active_set_changes(), 2);
        assert!(s.act_set_changed);

        // unchanged second round
        assert_eq!(s.record_active_set(tol), 1);
        assert_eq!(s.active_set_changes(), 0);
        assert!(!s.act_set_changed);

        // variable 0 releases, variable 1 hits its upper bound
        s.y[0] = 0.0;
        s.y[3] = 2.0;
        assert_eq!(s.record_active_set(tol), 1);
        assert_eq!(s.active_set_changes(), 2);
        assert_eq!(s.act_set[0], ACT_FREE);
        assert_eq!(s.act_set[1], ACT_UPPER);
    }

    #[test]
    fn invalidation_forces_change() {
        let mut s = Stage::new(0, 1, 1e12);
        s.record_active_set(1e-12);
        s.active_set_changes();
        s.record_active_set(1e-12);
        assert_eq!(s.active_set_changes(), 0);

        s.invalidate_active_set_history();
        s.record_active_set(1e-12);
        assert_eq!(s.active_set_changes(), 1);
    }
}
