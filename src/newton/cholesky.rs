//! Band Cholesky factorizations of the block-tridiagonal Newton Hessian
//! and their matching back-substitutions.
//!
//! Two elimination orders are provided. The forward variant produces a
//! lower factor `L` with `M = L·Lᵀ`; the reverse variant eliminates from
//! the last variable upwards and produces a lower factor with `M = Lᵀ·L`.
//! The reverse order admits partial refactorization: when only block rows
//! `≤ s` of `M` changed, rows `> s` of the factor are still valid and the
//! elimination restarts at `s`.
//!
//! Deficient pivots are either reported as [`QpError::DivisionByZero`] or,
//! under the singular-direction policy, lifted past the infinity sentinel;
//! the back-substitutions zero every coordinate whose pivot exceeds the
//! sentinel (a zero-curvature direction of the dual).

use nalgebra::DVector;

use crate::error::QpError;
use crate::newton::hessian::BlockTridiag;

/// Pivot handling shared by both elimination orders.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PivotPolicy {
    /// Lift deficient pivots instead of failing.
    pub singular_directions: bool,
    /// Minimum acceptable pivot value.
    pub tolerance: f64,
    /// The sentinel magnitude; lifted pivots become `infinity² + 1`.
    pub infinity: f64,
}

impl PivotPolicy {
    /// Apply the policy to a computed pivot. Returns the possibly lifted
    /// pivot and whether a lift happened.
    fn apply(&self, pivot: f64) -> Result<(f64, bool), QpError> {
        if pivot < self.tolerance {
            if self.singular_directions {
                Ok((pivot + self.infinity * self.infinity + 1.0, true))
            } else {
                Err(QpError::DivisionByZero)
            }
        } else {
            Ok((pivot, false))
        }
    }
}

/// Top-down factorization: `M = L·Lᵀ`, `L` stored in `chol` in the band
/// layout of `M`. Always factors the full band. Returns whether any pivot
/// was lifted.
pub(crate) fn factorize_forward(
    chol: &mut BlockTridiag,
    hessian: &BlockTridiag,
    policy: PivotPolicy,
) -> Result<bool, QpError> {
    let n = hessian.n_blocks();
    let nx = hessian.nx();
    let mut regularized = false;

    for k in 0..n {
        for j in 0..nx {
            // pivot: diagonal entry minus the squared forepart of its row
            let mut sum = hessian.d(k)[(j, j)];
            for l in 0..j {
                sum -= chol.d(k)[(j, l)] * chol.d(k)[(j, l)];
            }
            if k > 0 {
                for l in 0..nx {
                    sum -= chol.s(k)[(j, l)] * chol.s(k)[(j, l)];
                }
            }
            let (pivot, lifted) = policy.apply(sum)?;
            regularized |= lifted;
            let piv = pivot.sqrt();
            chol.d_mut(k)[(j, j)] = piv;

            // remainder of column j within the diagonal block
            for i in (j + 1)..nx {
                let mut sum = hessian.d(k)[(i, j)];
                for l in 0..j {
                    sum -= chol.d(k)[(i, l)] * chol.d(k)[(j, l)];
                }
                if k > 0 {
                    for l in 0..nx {
                        sum -= chol.s(k)[(i, l)] * chol.s(k)[(j, l)];
                    }
                }
                chol.d_mut(k)[(i, j)] = sum / piv;
            }

            // the next block row's sub-diagonal block
            if k < n - 1 {
                for i in 0..nx {
                    let mut sum = hessian.s(k + 1)[(i, j)];
                    for l in 0..j {
                        sum -= chol.s(k + 1)[(i, l)] * chol.d(k)[(j, l)];
                    }
                    chol.s_mut(k + 1)[(i, j)] = sum / piv;
                }
            }
        }
    }

    Ok(regularized)
}

/// Bottom-up factorization: `M = Lᵀ·L`, `L` stored lower-triangular in the
/// band layout. `start_block` is the highest block row to re-eliminate;
/// rows above it must hold a valid factor from a previous call. Returns
/// whether any pivot was lifted.
pub(crate) fn factorize_reverse(
    chol: &mut BlockTridiag,
    hessian: &BlockTridiag,
    start_block: usize,
    policy: PivotPolicy,
) -> Result<bool, QpError> {
    let n = hessian.n_blocks();
    let nx = hessian.nx();
    let mut regularized = false;

    for k in (0..=start_block.min(n - 1)).rev() {
        for j in (0..nx).rev() {
            // pivot: diagonal entry minus the squared rear part of its
            // column (stored transposed below the diagonal)
            let mut sum = hessian.d(k)[(j, j)];
            for l in (j + 1)..nx {
                sum -= chol.d(k)[(l, j)] * chol.d(k)[(l, j)];
            }
            if k < n - 1 {
                for l in 0..nx {
                    sum -= chol.s(k + 1)[(l, j)] * chol.s(k + 1)[(l, j)];
                }
            }
            let (pivot, lifted) = policy.apply(sum)?;
            regularized |= lifted;
            let piv = pivot.sqrt();
            chol.d_mut(k)[(j, j)] = piv;

            // remainder of column j, walking upwards; stored transposed to
            // keep the factor lower-triangular
            for i in (0..j).rev() {
                let mut sum = hessian.d(k)[(j, i)];
                for l in (j + 1)..nx {
                    sum -= chol.d(k)[(l, i)] * chol.d(k)[(l, j)];
                }
                if k < n - 1 {
                    for l in 0..nx {
                        sum -= chol.s(k + 1)[(l, i)] * chol.s(k + 1)[(l, j)];
                    }
                }
                chol.d_mut(k)[(j, i)] = sum / piv;
            }

            // this block row's sub-diagonal block
            if k > 0 {
                for i in (0..nx).rev() {
                    let mut sum = hessian.s(k)[(j, i)];
                    for l in (j + 1)..nx {
                        sum -= chol.s(k)[(l, i)] * chol.d(k)[(l, j)];
                    }
                    chol.s_mut(k)[(j, i)] = sum / piv;
                }
            }
        }
    }

    Ok(regularized)
}

/// Solve `L·Lᵀ x = b` for a forward factor: lower solve, then upper.
pub(crate) fn solve_forward(
    chol: &BlockTridiag,
    x: &mut DVector<f64>,
    b: &DVector<f64>,
    infinity: f64,
) {
    let n = chol.n_blocks();
    let nx = chol.nx();

    // L y = b, top down; zero-curvature coordinates are pinned to zero
    for k in 0..n {
        for i in 0..nx {
            let mut sum = b[k * nx + i];
            if k > 0 {
                for j in 0..nx {
                    sum -= chol.s(k)[(i, j)] * x[(k - 1) * nx + j];
                }
            }
            for j in 0..i {
                sum -= chol.d(k)[(i, j)] * x[k * nx + j];
            }
            x[k * nx + i] = if chol.d(k)[(i, i)] > infinity {
                0.0
            } else {
                sum / chol.d(k)[(i, i)]
            };
        }
    }

    // Lᵀ x = y, bottom up
    for k in (0..n).rev() {
        for i in (0..nx).rev() {
            let mut sum = x[k * nx + i];
            for j in (i + 1)..nx {
                sum -= chol.d(k)[(j, i)] * x[k * nx + j];
            }
            if k < n - 1 {
                for j in 0..nx {
                    sum -= chol.s(k + 1)[(j, i)] * x[(k + 1) * nx + j];
                }
            }
            x[k * nx + i] = sum / chol.d(k)[(i, i)];
        }
    }
}

/// Solve `Lᵀ·L x = b` for a reverse factor: upper solve bottom-up, then
/// lower solve top-down.
pub(crate) fn solve_reverse(
    chol: &BlockTridiag,
    x: &mut DVector<f64>,
    b: &DVector<f64>,
    infinity: f64,
) {
    let n = chol.n_blocks();
    let nx = chol.nx();

    // Lᵀ y = b, bottom up; zero-curvature coordinates are pinned to zero
    for k in (0..n).rev() {
        for i in (0..nx).rev() {
            let mut sum = b[k * nx + i];
            for j in (i + 1)..nx {
                sum -= chol.d(k)[(j, i)] * x[k * nx + j];
            }
            if k < n - 1 {
                for j in 0..nx {
                    sum -= chol.s(k + 1)[(j, i)] * x[(k + 1) * nx + j];
                }
            }
            x[k * nx + i] = if chol.d(k)[(i, i)] > infinity {
                0.0
            } else {
                sum / chol.d(k)[(i, i)]
            };
        }
    }

    // L x = y, top down
    for k in 0..n {
        for i in 0..nx {
            let mut sum = x[k * nx + i];
            if k > 0 {
                for j in 0..nx {
                    sum -= chol.s(k)[(i, j)] * x[(k - 1) * nx + j];
                }
            }
            for j in 0..i {
                sum -= chol.d(k)[(i, j)] * x[k * nx + j];
            }
            x[k * nx + i] = sum / chol.d(k)[(i, i)];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: PivotPolicy = PivotPolicy {
        singular_directions: false,
        tolerance: 1e-10,
        infinity: 1e12,
    };

    /// A well-conditioned SPD block-tridiagonal test matrix with dense
    /// blocks and deterministic entries.
    fn spd_band(n: usize, nx: usize) -> BlockTridiag {
        let mut m = BlockTridiag::new(n, nx);
        for k in 0..n {
            for i in 0..nx {
                for j in 0..nx {
                    let v = 0.1 * (((k * nx + i) as f64).sin() * ((j + 1) as f64).cos());
                    m.d_mut(k)[(i, j)] = v;
                    if k > 0 {
                        m.s_mut(k)[(i, j)] =
                            0.05 * (((k + i) as f64).cos() + 0.3 * (j as f64));
                    }
                }
            }
            // symmetrize and make diagonally dominant
            for i in 0..nx {
                for j in 0..i {
                    let v = 0.5 * (m.d(k)[(i, j)] + m.d(k)[(j, i)]);
                    m.d_mut(k)[(i, j)] = v;
                    m.d_mut(k)[(j, i)] = v;
                }
                m.d_mut(k)[(i, i)] = 4.0 + 0.5 * (i as f64) + 0.1 * (k as f64);
            }
        }
        m
    }

    fn rhs(n: usize) -> DVector<f64> {
        DVector::from_fn(n, |i, _| 1.0 + ((i as f64) * 0.7).sin())
    }

    #[test]
    fn forward_factor_reconstructs() {
        let m = spd_band(4, 3);
        let mut l = BlockTridiag::new(4, 3);
        let reg = factorize_forward(&mut l, &m, POLICY).unwrap();
        assert!(!reg);

        let dense = m.to_dense();
        let l_dense = l.to_dense().lower_triangle();
        let reconstructed = &l_dense * l_dense.transpose();
        let err = (&reconstructed - &dense).norm();
        assert!(err < 1e-12 * dense.norm(), "L·Lᵀ mismatch: {err}");
    }

    #[test]
    fn reverse_factor_reconstructs() {
        let m = spd_band(4, 3);
        let mut l = BlockTridiag::new(4, 3);
        let reg = factorize_reverse(&mut l, &m, 3, POLICY).unwrap();
        assert!(!reg);

        let dense = m.to_dense();
        let l_dense = l.to_dense().lower_triangle();
        let reconstructed = l_dense.transpose() * &l_dense;
        let err = (&reconstructed - &dense).norm();
        assert!(err < 1e-12 * dense.norm(), "Lᵀ·L mismatch: {err}");
    }

    #[test]
    fn both_solvers_match_dense_solution() {
        let m = spd_band(5, 2);
        let dense = m.to_dense();
        let b = rhs(10);
        let x_ref = dense
            .clone()
            .cholesky()
            .expect("test matrix is SPD")
            .solve(&b);

        let mut lf = BlockTridiag::new(5, 2);
        factorize_forward(&mut lf, &m, POLICY).unwrap();
        let mut xf = DVector::zeros(10);
        solve_forward(&lf, &mut xf, &b, POLICY.infinity);
        assert!((&xf - &x_ref).norm() < 1e-10 * x_ref.norm());

        let mut lr = BlockTridiag::new(5, 2);
        factorize_reverse(&mut lr, &m, 4, POLICY).unwrap();
        let mut xr = DVector::zeros(10);
        solve_reverse(&lr, &mut xr, &b, POLICY.infinity);
        assert!((&xr - &x_ref).norm() < 1e-10 * x_ref.norm());
    }

    #[test]
    fn partial_refactorization_matches_full() {
        let mut m = spd_band(5, 2);
        let mut l = BlockTridiag::new(5, 2);
        factorize_reverse(&mut l, &m, 4, POLICY).unwrap();

        // perturb block rows 0..=1 only, keeping symmetry
        m.d_mut(1)[(0, 0)] += 0.5;
        m.d_mut(0)[(1, 1)] += 0.25;
        m.s_mut(1)[(0, 1)] += 0.1;

        // partial restart at block 1 against a fresh full factorization
        factorize_reverse(&mut l, &m, 1, POLICY).unwrap();
        let mut l_full = BlockTridiag::new(5, 2);
        factorize_reverse(&mut l_full, &m, 4, POLICY).unwrap();

        let diff = (l.to_dense().lower_triangle() - l_full.to_dense().lower_triangle()).norm();
        assert!(diff < 1e-13, "partial refactorization drifted: {diff}");
    }

    #[test]
    fn deficient_pivot_fails_without_policy() {
        let mut m = spd_band(2, 2);
        // zero out the last row/column: the final pivot collapses
        m.d_mut(1)[(1, 1)] = 0.0;
        m.d_mut(1)[(0, 1)] = 0.0;
        m.d_mut(1)[(1, 0)] = 0.0;
        m.s_mut(1)[(1, 0)] = 0.0;
        m.s_mut(1)[(1, 1)] = 0.0;

        let mut l = BlockTridiag::new(2, 2);
        assert_eq!(
            factorize_forward(&mut l, &m, POLICY),
            Err(QpError::DivisionByZero)
        );
        assert_eq!(
            factorize_reverse(&mut l, &m, 1, POLICY),
            Err(QpError::DivisionByZero)
        );
    }

    #[test]
    fn singular_direction_is_lifted_and_zeroed() {
        let policy = PivotPolicy {
            singular_directions: true,
            ..POLICY
        };
        let mut m = spd_band(2, 2);
        m.d_mut(1)[(1, 1)] = 0.0;
        m.d_mut(1)[(0, 1)] = 0.0;
        m.d_mut(1)[(1, 0)] = 0.0;
        m.s_mut(1)[(1, 0)] = 0.0;
        m.s_mut(1)[(1, 1)] = 0.0;

        let mut l = BlockTridiag::new(2, 2);
        let reg = factorize_forward(&mut l, &m, policy).unwrap();
        assert!(reg);
        assert!(l.d(1)[(1, 1)] > policy.infinity);

        let b = rhs(4);
        let mut x = DVector::zeros(4);
        solve_forward(&l, &mut x, &b, policy.infinity);
        // the singular coordinate is pinned to (numerically) zero
        assert!(x[3].abs() < 1e-10, "zero-curvature coordinate: {}", x[3]);
        assert!(x.iter().all(|v| v.is_finite()));
    }
}
