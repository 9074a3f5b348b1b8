//! dualqp — dual Newton strategy solver for the structured convex QPs of
//! direct multiple-shooting model predictive control.
//!
//! The problem is a chain of stage QPs with diagonal Hessians and simple
//! bounds, coupled by affine dynamics. The solver dualizes the couplings,
//! solves the stage QPs in closed form by clipping, and drives the stacked
//! costate multiplier to optimality with a non-smooth Newton iteration on
//! the block-tridiagonal reduced Hessian, globalized by line search.
//!
//! # Quick Start
//!
//! ```
//! use dualqp::{DualQp, DynamicsInput, QpOptions, StageCost};
//! use nalgebra::{DMatrix, DVector};
//!
//! // double integrator, horizon of 8 couplings
//! let mut qp = DualQp::new(2, 1, 8, QpOptions::default()).unwrap();
//! let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]);
//! let b = DMatrix::from_row_slice(2, 1, &[0.005, 0.1]);
//! let x0 = DVector::from_vec(vec![1.0, 0.0]);
//!
//! for k in 0..8 {
//!     let (mut lo, mut up) = (
//!         DVector::from_element(3, -1e12),
//!         DVector::from_element(3, 1e12),
//!     );
//!     if k == 0 {
//!         // pin the initial state by equal bounds
//!         lo.rows_mut(0, 2).copy_from(&x0);
//!         up.rows_mut(0, 2).copy_from(&x0);
//!     }
//!     lo[2] = -0.5;
//!     up[2] = 0.5;
//!     qp.setup_regular_stage(
//!         k,
//!         StageCost::Identity,
//!         None,
//!         DynamicsInput::StateInput { a: a.clone(), b: b.clone() },
//!         None,
//!         Some(lo),
//!         Some(up),
//!     )
//!     .unwrap();
//! }
//! qp.setup_final_stage(Some(StageCost::Identity), None, None, None)
//!     .unwrap();
//!
//! let status = qp.solve().unwrap();
//! assert!(status.is_optimal());
//! ```

pub mod error;
pub mod iter_log;
pub mod options;
pub mod setup;
pub mod solver;
pub mod stage_hessian;

mod clipping;
mod linesearch;
mod newton;
mod stage;

// Re-exports for convenience
pub use error::{LineSearchStatus, QpError, SolveStatus};
pub use iter_log::IterationRecord;
pub use options::{FactorizationOrder, LineSearchKind, QpOptions, RegType};
pub use setup::{DynamicsInput, StageCost, StageUpdate};
pub use solver::DualQp;
pub use stage_hessian::{Sparsity, StageHessian, detect_sparsity};
