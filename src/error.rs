// src/error.rs

use thiserror::Error;

use crate::linear::SolveStatus;

/// Fatal conditions raised by the time-stepping core and the run driver.
///
/// Linear solvers never return this type: they report a [`SolveStatus`] and the caller
/// decides whether that is recoverable.
#[derive(Debug, Error)]
pub enum PdeError {
    /// Configuration rejected before any computation starts.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Explicit convection step exceeds the stable limit.
    #[error("CFL violation: dt = {dt:e} exceeds stable limit {limit:e}")]
    CflViolation { dt: f64, limit: f64 },

    /// The implicit solve ended in a status other than converged / max-iters,
    /// including after the fallback solver was tried.
    #[error("Solver failure at t = {t:e}: {status}")]
    SolverFailure { t: f64, status: SolveStatus },

    /// Array lengths do not match the grid they are used with.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PdeError>;

impl PdeError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
