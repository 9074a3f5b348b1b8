//! Block-tridiagonal reduced Hessian: storage and assembly.
//!
//! The reduced Hessian has `n_x × n_x` blocks on the diagonal and first
//! sub-diagonal; the upper half is implicit by symmetry. Per block row `k`
//! the storage keeps the sub-diagonal block (coupling to row `k−1`) and the
//! diagonal block, matching the order in which the band factorizations walk
//! the matrix.
//!
//! Assembly projects the inverse stage Hessians onto the inactive
//! variables: rows and columns belonging to variables with an active bound
//! are annihilated, which is what turns active-set changes into Hessian
//! changes and enables the warm-start recomputation policy.

use nalgebra::DMatrix;

use crate::stage::Stage;

/// Symmetric block-tridiagonal matrix (or its band Cholesky factor) with
/// square blocks of fixed size.
#[derive(Debug, Clone)]
pub(crate) struct BlockTridiag {
    nx: usize,
    /// Diagonal blocks, one per block row.
    diag: Vec<DMatrix<f64>>,
    /// Sub-diagonal blocks; entry `k ≥ 1` couples block row `k` to `k−1`,
    /// entry 0 is kept zero.
    sub: Vec<DMatrix<f64>>,
}

impl BlockTridiag {
    pub fn new(n_blocks: usize, nx: usize) -> Self {
        Self {
            nx,
            diag: vec![DMatrix::zeros(nx, nx); n_blocks],
            sub: vec![DMatrix::zeros(nx, nx); n_blocks],
        }
    }

    pub fn n_blocks(&self) -> usize {
        self.diag.len()
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn d(&self, k: usize) -> &DMatrix<f64> {
        &self.diag[k]
    }

    pub fn d_mut(&mut self, k: usize) -> &mut DMatrix<f64> {
        &mut self.diag[k]
    }

    pub fn s(&self, k: usize) -> &DMatrix<f64> {
        &self.sub[k]
    }

    pub fn s_mut(&mut self, k: usize) -> &mut DMatrix<f64> {
        &mut self.sub[k]
    }

    /// Smallest diagonal entry across all diagonal blocks.
    pub fn min_diag(&self) -> f64 {
        let mut m = f64::INFINITY;
        for block in &self.diag {
            for i in 0..self.nx {
                m = m.min(block[(i, i)]);
            }
        }
        m
    }

    /// Add `shift` to every diagonal entry of every diagonal block.
    pub fn shift_diagonal(&mut self, shift: f64) {
        for block in &mut self.diag {
            for i in 0..self.nx {
                block[(i, i)] += shift;
            }
        }
    }

    /// Densify into a full matrix; test support.
    #[cfg(test)]
    pub fn to_dense(&self) -> DMatrix<f64> {
        let n = self.n_blocks() * self.nx;
        let mut m = DMatrix::zeros(n, n);
        for k in 0..self.n_blocks() {
            for i in 0..self.nx {
                for j in 0..self.nx {
                    m[(k * self.nx + i, k * self.nx + j)] = self.diag[k][(i, j)];
                    if k > 0 {
                        m[(k * self.nx + i, (k - 1) * self.nx + j)] = self.sub[k][(i, j)];
                        m[((k - 1) * self.nx + j, k * self.nx + i)] = self.sub[k][(i, j)];
                    }
                }
            }
        }
        m
    }
}

/// Assemble the reduced Hessian from the stage solutions.
///
/// Block row `k` is touched only when the active set of stage `k` or
/// `k+1` changed since the last assembly; untouched blocks keep their
/// previous values (warm start across Newton iterations).
pub(crate) fn assemble_newton_hessian(
    stages: &[Stage],
    hessian: &mut BlockTridiag,
    equality_tolerance: f64,
) {
    let n = hessian.n_blocks();
    let nx = hessian.nx();

    // diagonal blocks: E P_{k+1} Eᵀ + C P_k Cᵀ
    for k in 0..n {
        if !(stages[k].act_set_changed || stages[k + 1].act_set_changed) {
            continue;
        }
        let block = hessian.d_mut(k);
        block.fill(0.0);

        // state part of the next stage's projected inverse Hessian
        let next = &stages[k + 1];
        for i in 0..nx {
            if !next.bound_active(i, equality_tolerance) {
                block[(i, i)] = next.hessian.inv_diag_entry(i);
            }
        }

        // C P Cᵀ over the inactive variables of stage k
        let stage = &stages[k];
        let coupling = stage.coupling.as_ref().expect("interior stage");
        for l in 0..stage.nv {
            if stage.bound_active(l, equality_tolerance) {
                continue;
            }
            let w = stage.hessian.inv_diag_entry(l);
            for i in 0..nx {
                let ci = coupling.c_mat[(i, l)] * w;
                for j in 0..nx {
                    block[(i, j)] += ci * coupling.c_mat[(j, l)];
                }
            }
        }
    }

    // sub-diagonal blocks: −C P_k E with active columns annihilated
    for k in 1..n {
        if !stages[k].act_set_changed {
            continue;
        }
        let stage = &stages[k];
        let coupling = stage.coupling.as_ref().expect("interior stage");
        let block = hessian.s_mut(k);
        for j in 0..nx {
            if stage.bound_active(j, equality_tolerance) {
                for i in 0..nx {
                    block[(i, j)] = 0.0;
                }
            } else {
                let w = stage.hessian.inv_diag_entry(j);
                for i in 0..nx {
                    block[(i, j)] = -coupling.c_mat[(i, j)] * w;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Coupling;
    use nalgebra::DVector;

    fn chain(n: usize, nx: usize, nu: usize) -> Vec<Stage> {
        let nz = nx + nu;
        let mut stages = Vec::new();
        for k in 0..n {
            let mut s = Stage::new(k, nz, 1e12);
            let mut c = DMatrix::zeros(nx, nz);
            for i in 0..nx {
                c[(i, i)] = 1.0;
                c[(i, nx + i.min(nu - 1))] = 1.0;
            }
            s.coupling = Some(Coupling {
                c_mat: c,
                c_vec: DVector::zeros(nx),
            });
            s.act_set_changed = true;
            stages.push(s);
        }
        let mut last = Stage::new(n, nx, 1e12);
        last.act_set_changed = true;
        stages.push(last);
        stages
    }

    #[test]
    fn identity_chain_blocks() {
        // nx = nu = 1, H = I, C = [1 1]: diagonal block = 1 + C Cᵀ = 3,
        // sub-diagonal = −C·E = −1
        let stages = chain(3, 1, 1);
        let mut h = BlockTridiag::new(3, 1);
        assemble_newton_hessian(&stages, &mut h, 1e-12);
        for k in 0..3 {
            assert!((h.d(k)[(0, 0)] - 3.0).abs() < 1e-15);
        }
        for k in 1..3 {
            assert!((h.s(k)[(0, 0)] + 1.0).abs() < 1e-15);
        }
    }

    #[test]
    fn active_bound_annihilates() {
        let mut stages = chain(2, 1, 1);
        // activate the state bound of stage 1
        stages[1].y[0] = 1.0;
        let mut h = BlockTridiag::new(2, 1);
        assemble_newton_hessian(&stages, &mut h, 1e-12);
        // block 0 loses the E P E part (state of stage 1 active) but keeps
        // C P₀ Cᵀ = 2
        assert!((h.d(0)[(0, 0)] - 2.0).abs() < 1e-15);
        // sub-diagonal block 1 annihilates its state column: only the
        // input column of C P₁ survives in the diagonal block 1
        assert_eq!(h.s(1)[(0, 0)], 0.0);
        assert!((h.d(1)[(0, 0)] - 2.0).abs() < 1e-15);
    }

    #[test]
    fn unchanged_stage_keeps_block() {
        let mut stages = chain(2, 1, 1);
        let mut h = BlockTridiag::new(2, 1);
        assemble_newton_hessian(&stages, &mut h, 1e-12);

        // no stage reports a change: poke a value and verify it survives
        for s in &mut stages {
            s.act_set_changed = false;
        }
        h.d_mut(0)[(0, 0)] = 42.0;
        assemble_newton_hessian(&stages, &mut h, 1e-12);
        assert_eq!(h.d(0)[(0, 0)], 42.0);

        // flagging stage 1 refreshes block 0 and 1 and the sub block
        stages[1].act_set_changed = true;
        assemble_newton_hessian(&stages, &mut h, 1e-12);
        assert!((h.d(0)[(0, 0)] - 3.0).abs() < 1e-15);
    }
}
