// src/linear/mod.rs
//
// Linear solver stack: operator / preconditioner traits, PCG with a CGNR fallback, and the
// Jacobi, SSOR and geometric multigrid preconditioners for `A = I - factor·L`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PdeError, Result};
use crate::grid::Grid2D;
use crate::parallel::ParallelExecutor;
use crate::stencil::Diffusivity;

pub mod cgnr;
pub mod implicit;
pub mod jacobi;
pub mod multigrid;
pub mod pcg;
pub mod ssor;

pub use cgnr::Cgnr;
pub use implicit::ImplicitMatrix;
pub use jacobi::JacobiPreconditioner;
pub use multigrid::MultigridPreconditioner;
pub use pcg::Pcg;
pub use ssor::SsorPreconditioner;

/// Linear operator `y = A x` on interior-sized vectors.
pub trait MatrixOperator {
    fn multiply(&mut self, x: &[f64], y: &mut [f64]);
}

/// Approximate inverse: `apply` solves `M z = r`.
pub trait Preconditioner {
    fn apply(&mut self, r: &[f64], z: &mut [f64]);

    /// Recompute internal state after the implicit factor changed.
    fn update_factor(&mut self, _factor: f64) {}

    fn name(&self) -> &'static str;
}

/// `z = r`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl Preconditioner for IdentityPreconditioner {
    fn apply(&mut self, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// Outcome of one linear solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Converged,
    MaxIters,
    /// Non-positive curvature `pᵀAp <= 0`: the operator is not SPD.
    FailNonSpd,
    /// NaN or Inf in the right-hand side or the running residual.
    FailNumeric,
}

impl SolveStatus {
    /// Converged, or at least a best-effort iterate the caller may keep.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Converged | Self::MaxIters)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Converged => "CONVERGED",
            Self::MaxIters => "MAX_ITERS",
            Self::FailNonSpd => "FAIL_NON_SPD",
            Self::FailNumeric => "FAIL_NUMERIC",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub iterations: usize,
    pub abs_residual: f64,
    pub rel_residual: f64,
}

impl SolveResult {
    pub fn new(status: SolveStatus, iterations: usize, abs_residual: f64, rel_residual: f64) -> Self {
        Self {
            status,
            iterations,
            abs_residual,
            rel_residual,
        }
    }

    pub(crate) fn numeric_failure(iterations: usize) -> Self {
        Self::new(SolveStatus::FailNumeric, iterations, f64::NAN, f64::NAN)
    }
}

pub trait LinearSolver {
    /// Solve `A x = b` starting from the contents of `x`.
    fn solve(
        &mut self,
        a: &mut dyn MatrixOperator,
        m: &mut dyn Preconditioner,
        b: &[f64],
        x: &mut [f64],
    ) -> SolveResult;
}

/// Preconditioner selector used by the time stepper and the run config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PreconditionerKind {
    #[default]
    #[serde(rename = "JACOBI")]
    Jacobi,
    #[serde(rename = "SSOR")]
    Ssor,
    #[serde(rename = "MG")]
    Multigrid,
}

impl std::str::FromStr for PreconditionerKind {
    type Err = PdeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jacobi" => Ok(Self::Jacobi),
            "ssor" => Ok(Self::Ssor),
            "mg" | "multigrid" => Ok(Self::Multigrid),
            _ => Err(PdeError::invalid_config(format!("unknown preconditioner: '{s}'"))),
        }
    }
}

/// Build the selected preconditioner for `I - factor·L` on `grid`.
pub fn build_preconditioner(
    kind: PreconditionerKind,
    exec: &Arc<ParallelExecutor>,
    grid: &Grid2D,
    factor: f64,
    kappa: Option<Arc<Diffusivity>>,
    ssor_omega: f64,
) -> Box<dyn Preconditioner> {
    match kind {
        PreconditionerKind::Jacobi => Box::new(JacobiPreconditioner::new(
            Arc::clone(exec),
            grid.clone(),
            factor,
            kappa,
        )),
        PreconditionerKind::Ssor => {
            Box::new(SsorPreconditioner::new(grid.clone(), factor, ssor_omega, kappa))
        }
        PreconditionerKind::Multigrid => Box::new(MultigridPreconditioner::new(
            Arc::clone(exec),
            grid,
            factor,
            kappa,
        )),
    }
}
