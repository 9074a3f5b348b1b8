//! Problem data installation: stage setup, partial data updates, and the
//! receding-horizon shift operations.

use nalgebra::{DMatrix, DVector};

use crate::error::QpError;
use crate::solver::DualQp;
use crate::stage::Coupling;
use crate::stage_hessian::StageHessian;

/// Quadratic stage cost input. Dense input is accepted only when it is
/// numerically diagonal or identity; anything else is rejected because the
/// clipping stage solver needs a trivially invertible Hessian.
#[derive(Debug, Clone)]
pub enum StageCost {
    /// The identity weight.
    Identity,
    /// Full diagonal of the stage Hessian (length `nv`).
    Diagonal(DVector<f64>),
    /// Separate state and input weight diagonals.
    StateInput {
        q: DVector<f64>,
        r: DVector<f64>,
    },
    /// Dense Hessian, auto-classified by sparsity.
    Dense(DMatrix<f64>),
}

impl StageCost {
    fn into_hessian(self, nx: usize, nu: usize, nv: usize) -> Result<StageHessian, QpError> {
        match self {
            StageCost::Identity => Ok(StageHessian::identity(nv)),
            StageCost::Diagonal(d) => {
                if d.len() != nv {
                    return Err(QpError::InvalidArgument(
                        "stage cost diagonal has the wrong length",
                    ));
                }
                StageHessian::diagonal(d)
            }
            StageCost::StateInput { q, r } => {
                if q.len() != nx || r.len() != nu {
                    return Err(QpError::InvalidArgument(
                        "state/input weight diagonals have the wrong length",
                    ));
                }
                let mut d = DVector::zeros(nv);
                d.rows_mut(0, nx).copy_from(&q);
                d.rows_mut(nx, nu).copy_from(&r);
                StageHessian::diagonal(d)
            }
            StageCost::Dense(m) => {
                if m.nrows() != nv {
                    return Err(QpError::InvalidArgument(
                        "dense stage cost has the wrong dimension",
                    ));
                }
                StageHessian::from_dense(&m)
            }
        }
    }
}

/// Coupling dynamics input for an interior stage.
#[derive(Debug, Clone)]
pub enum DynamicsInput {
    /// The full `n_x × n_v` coupling matrix.
    Coupling(DMatrix<f64>),
    /// State and input transition blocks, concatenated into the coupling
    /// matrix.
    StateInput {
        a: DMatrix<f64>,
        b: DMatrix<f64>,
    },
}

impl DynamicsInput {
    fn into_matrix(self, nx: usize, nu: usize) -> Result<DMatrix<f64>, QpError> {
        match self {
            DynamicsInput::Coupling(c) => {
                if c.nrows() != nx || c.ncols() != nx + nu {
                    return Err(QpError::InvalidArgument(
                        "coupling matrix has the wrong shape",
                    ));
                }
                Ok(c)
            }
            DynamicsInput::StateInput { a, b } => {
                if a.nrows() != nx || a.ncols() != nx || b.nrows() != nx || b.ncols() != nu {
                    return Err(QpError::InvalidArgument(
                        "transition blocks have the wrong shape",
                    ));
                }
                let mut c = DMatrix::zeros(nx, nx + nu);
                c.view_mut((0, 0), (nx, nx)).copy_from(&a);
                c.view_mut((0, nx), (nx, nu)).copy_from(&b);
                Ok(c)
            }
        }
    }
}

/// Partial replacement of a stage's data. Fields left as `None` keep their
/// current values.
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    pub cost: Option<StageCost>,
    pub g: Option<DVector<f64>>,
    pub dynamics: Option<DynamicsInput>,
    pub c: Option<DVector<f64>>,
    pub z_low: Option<DVector<f64>>,
    pub z_upp: Option<DVector<f64>>,
}

impl StageUpdate {
    fn touches_matrices(&self) -> bool {
        self.cost.is_some() || self.dynamics.is_some()
    }
}

impl DualQp {
    /// Install the data of interior stage `k`. Missing pieces default to a
    /// zero linear term, zero offset, and open bounds.
    #[allow(clippy::too_many_arguments)]
    pub fn setup_regular_stage(
        &mut self,
        k: usize,
        cost: StageCost,
        g: Option<DVector<f64>>,
        dynamics: DynamicsInput,
        c: Option<DVector<f64>>,
        z_low: Option<DVector<f64>>,
        z_upp: Option<DVector<f64>>,
    ) -> Result<(), QpError> {
        if k >= self.n_intervals {
            return Err(QpError::InvalidArgument(
                "regular stage index out of range",
            ));
        }
        let (nx, nu) = (self.nx, self.nu);
        let nv = nx + nu;

        let hessian = cost.into_hessian(nx, nu, nv)?;
        let c_mat = dynamics.into_matrix(nx, nu)?;
        let c_vec = match c {
            Some(v) if v.len() == nx => v,
            Some(_) => return Err(QpError::InvalidArgument("offset c has the wrong length")),
            None => DVector::zeros(nx),
        };

        let infinity = self.options.infinity;
        let stage = &mut self.stages[k];
        stage.hessian = hessian;
        stage.g = Self::vector_or(g, nv, 0.0)?;
        stage.coupling = Some(Coupling { c_mat, c_vec });
        stage.z_low = Self::vector_or(z_low, nv, -infinity)?;
        stage.z_upp = Self::vector_or(z_upp, nv, infinity)?;
        stage.invalidate_active_set_history();
        self.pending_refactor = Some(self.n_intervals);
        Ok(())
    }

    /// Install the data of the last stage. A missing cost defaults to
    /// `reg_param · I`.
    pub fn setup_final_stage(
        &mut self,
        cost: Option<StageCost>,
        g: Option<DVector<f64>>,
        z_low: Option<DVector<f64>>,
        z_upp: Option<DVector<f64>>,
    ) -> Result<(), QpError> {
        let nx = self.nx;
        let hessian = match cost {
            Some(cost) => cost.into_hessian(nx, 0, nx)?,
            None => StageHessian::diagonal(DVector::from_element(nx, self.options.reg_param))?,
        };

        let infinity = self.options.infinity;
        let stage = self
            .stages
            .last_mut()
            .expect("solver always owns its stages");
        stage.hessian = hessian;
        stage.g = Self::vector_or(g, nx, 0.0)?;
        stage.z_low = Self::vector_or(z_low, nx, -infinity)?;
        stage.z_upp = Self::vector_or(z_upp, nx, infinity)?;
        stage.invalidate_active_set_history();
        self.pending_refactor = Some(self.n_intervals);
        Ok(())
    }

    /// Replace a subset of stage `k`'s data. If any matrix data changes,
    /// the stored active-set history of every stage is invalidated so the
    /// next factorization is full.
    pub fn update_stage_data(&mut self, k: usize, update: StageUpdate) -> Result<(), QpError> {
        if k > self.n_intervals {
            return Err(QpError::InvalidArgument("stage index out of range"));
        }
        let is_last = k == self.n_intervals;
        let (nx, nu) = (self.nx, self.nu);
        let nv = self.stages[k].nv;
        let touches_matrices = update.touches_matrices();

        if let Some(cost) = update.cost {
            self.stages[k].hessian = cost.into_hessian(nx, if is_last { 0 } else { nu }, nv)?;
        }
        if let Some(dynamics) = update.dynamics {
            if is_last {
                return Err(QpError::InvalidArgument(
                    "the last stage carries no coupling",
                ));
            }
            let c_mat = dynamics.into_matrix(nx, nu)?;
            match &mut self.stages[k].coupling {
                Some(coupling) => coupling.c_mat = c_mat,
                None => {
                    self.stages[k].coupling = Some(Coupling {
                        c_mat,
                        c_vec: DVector::zeros(nx),
                    })
                }
            }
        }
        if let Some(c) = update.c {
            if c.len() != nx {
                return Err(QpError::InvalidArgument("offset c has the wrong length"));
            }
            match &mut self.stages[k].coupling {
                Some(coupling) => coupling.c_vec = c,
                None => {
                    return Err(QpError::InvalidArgument(
                        "the last stage carries no coupling",
                    ));
                }
            }
        }
        if let Some(g) = update.g {
            if g.len() != nv {
                return Err(QpError::InvalidArgument("g has the wrong length"));
            }
            self.stages[k].g = g;
        }
        if let Some(lo) = update.z_low {
            if lo.len() != nv {
                return Err(QpError::InvalidArgument("z_low has the wrong length"));
            }
            self.stages[k].z_low = lo;
        }
        if let Some(up) = update.z_upp {
            if up.len() != nv {
                return Err(QpError::InvalidArgument("z_upp has the wrong length"));
            }
            self.stages[k].z_upp = up;
        }

        if touches_matrices {
            for stage in &mut self.stages {
                stage.invalidate_active_set_history();
            }
            self.pending_refactor = Some(self.n_intervals);
        }
        Ok(())
    }

    /// Rotate the interior stages left by one. The previous first stage
    /// becomes the vacated slot at `n_intervals − 1` and must be
    /// re-populated before the next solve; the last stage stays in place.
    pub fn shift_intervals(&mut self) {
        let n = self.n_intervals;
        self.stages[0..n].rotate_left(1);
        for (k, stage) in self.stages.iter_mut().enumerate() {
            stage.id = k;
        }
    }

    /// Shift the costate multiplier blocks left by one; the last block
    /// keeps its previous value as the guess for the new interval.
    pub fn shift_lambda(&mut self) {
        let nx = self.nx;
        for k in 0..self.n_intervals.saturating_sub(1) {
            for i in 0..nx {
                self.lambda[k * nx + i] = self.lambda[(k + 1) * nx + i];
            }
        }
    }

    fn vector_or(
        v: Option<DVector<f64>>,
        len: usize,
        default: f64,
    ) -> Result<DVector<f64>, QpError> {
        match v {
            Some(v) if v.len() == len => Ok(v),
            Some(_) => Err(QpError::InvalidArgument("vector has the wrong length")),
            None => Ok(DVector::from_element(len, default)),
        }
    }
}
