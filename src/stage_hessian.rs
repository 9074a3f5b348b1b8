//! Stage Hessian representation for the clipping solver.
//!
//! Clipping exploits that the stage Hessians are diagonal (or identity), so
//! the stage QP inverse is an elementwise divide. The diagonal variant
//! caches the reciprocals once at construction; every hot-path operation
//! specializes on the variant by branch.

use nalgebra::{DMatrix, DVector};

use crate::error::QpError;

/// Sparsity classes recognized when a stage Hessian is handed in as a dense
/// matrix. Only `Identity` and `Diagonal` are admissible for clipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sparsity {
    Identity,
    Diagonal,
    Dense,
    AllZeros,
}

/// Classify a square matrix by inspecting its off-diagonal and diagonal
/// entries. Exact zero tests: data is expected to be constructed, not
/// computed.
pub fn detect_sparsity(m: &DMatrix<f64>) -> Sparsity {
    let n = m.nrows();
    let mut all_zero = true;
    for j in 0..n {
        for i in 0..n {
            if i != j && m[(i, j)] != 0.0 {
                return Sparsity::Dense;
            }
        }
        if m[(j, j)] != 0.0 {
            all_zero = false;
        }
    }
    if all_zero {
        return Sparsity::AllZeros;
    }
    if (0..n).all(|j| m[(j, j)] == 1.0) {
        Sparsity::Identity
    } else {
        Sparsity::Diagonal
    }
}

/// Diagonal or identity stage Hessian of one stage QP.
#[derive(Debug, Clone)]
pub enum StageHessian {
    /// Strictly positive diagonal, stored together with its elementwise
    /// reciprocal.
    Diagonal { diag: DVector<f64>, inv: DVector<f64> },
    /// The identity of the given dimension.
    Identity(usize),
}

impl StageHessian {
    /// Build from a diagonal. Every entry must be strictly positive, since
    /// the clipping solver inverts the Hessian.
    pub fn diagonal(diag: DVector<f64>) -> Result<Self, QpError> {
        if diag.iter().any(|&h| h <= 0.0) {
            return Err(QpError::InvalidArgument(
                "stage Hessian diagonal must be strictly positive",
            ));
        }
        let inv = diag.map(f64::recip);
        Ok(StageHessian::Diagonal { diag, inv })
    }

    /// The identity Hessian of dimension `n`.
    pub fn identity(n: usize) -> Self {
        StageHessian::Identity(n)
    }

    /// Build from a dense matrix, auto-detecting its sparsity. Anything
    /// that is not numerically diagonal or identity is rejected.
    pub fn from_dense(m: &DMatrix<f64>) -> Result<Self, QpError> {
        if m.nrows() != m.ncols() {
            return Err(QpError::InvalidArgument("stage Hessian must be square"));
        }
        match detect_sparsity(m) {
            Sparsity::Identity => Ok(StageHessian::Identity(m.nrows())),
            Sparsity::Diagonal => StageHessian::diagonal(m.diagonal()),
            Sparsity::Dense | Sparsity::AllZeros => Err(QpError::InvalidArgument(
                "stage Hessian must be diagonal or identity for the clipping solver",
            )),
        }
    }

    /// Dimension of the stage Hessian.
    pub fn dim(&self) -> usize {
        match self {
            StageHessian::Diagonal { diag, .. } => diag.len(),
            StageHessian::Identity(n) => *n,
        }
    }

    /// Diagonal entry `H_ii`.
    pub fn diag_entry(&self, i: usize) -> f64 {
        match self {
            StageHessian::Diagonal { diag, .. } => diag[i],
            StageHessian::Identity(_) => 1.0,
        }
    }

    /// Reciprocal diagonal entry `1 / H_ii`.
    pub fn inv_diag_entry(&self, i: usize) -> f64 {
        match self {
            StageHessian::Diagonal { inv, .. } => inv[i],
            StageHessian::Identity(_) => 1.0,
        }
    }

    /// `res = H^{-1} x`.
    pub fn apply_inverse(&self, res: &mut DVector<f64>, x: &DVector<f64>) {
        match self {
            StageHessian::Diagonal { inv, .. } => {
                for i in 0..inv.len() {
                    res[i] = inv[i] * x[i];
                }
            }
            StageHessian::Identity(n) => {
                for i in 0..*n {
                    res[i] = x[i];
                }
            }
        }
    }

    /// Quadratic form `xᵀ H x`.
    pub fn quad_form(&self, x: &DVector<f64>) -> f64 {
        match self {
            StageHessian::Diagonal { diag, .. } => {
                (0..diag.len()).map(|i| diag[i] * x[i] * x[i]).sum()
            }
            StageHessian::Identity(_) => x.dot(x),
        }
    }
}
