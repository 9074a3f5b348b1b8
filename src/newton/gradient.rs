//! Reduced dual gradient.
//!
//! Block `k` of the gradient is the coupling residual
//! `C_k z_k + c_k − x_{k+1}` at the stage minimizers; at dual optimality
//! every block vanishes and the primal trajectory is dynamically feasible.

use nalgebra::DVector;

use crate::stage::Stage;

fn assemble<'a>(
    stages: &'a [Stage],
    nx: usize,
    gradient: &mut DVector<f64>,
    primal: impl Fn(&'a Stage) -> &'a DVector<f64>,
) {
    let n = stages.len() - 1;
    for k in 0..n {
        let coupling = stages[k]
            .coupling
            .as_ref()
            .expect("interior stage carries a coupling");
        let z_k = primal(&stages[k]);
        let z_next = primal(&stages[k + 1]);
        for i in 0..nx {
            let mut r = coupling.c_vec[i] - z_next[i];
            for j in 0..stages[k].nv {
                r += coupling.c_mat[(i, j)] * z_k[j];
            }
            gradient[k * nx + i] = r;
        }
    }
}

/// Gradient at the committed stage iterates.
pub(crate) fn compute_gradient(stages: &[Stage], nx: usize, gradient: &mut DVector<f64>) {
    assemble(stages, nx, gradient, |s| &s.z);
}

/// Gradient at the trial points written by the line search.
pub(crate) fn compute_trial_gradient(stages: &[Stage], nx: usize, gradient: &mut DVector<f64>) {
    assemble(stages, nx, gradient, |s| &s.z_trial);
}
