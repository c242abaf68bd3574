// src/linear/jacobi.rs

use std::sync::Arc;

use crate::grid::Grid2D;
use crate::linear::Preconditioner;
use crate::parallel::ParallelExecutor;
use crate::stencil::Diffusivity;

#[derive(Debug, Clone)]
enum InverseDiagonal {
    /// Constant coefficients: one value for every node.
    Scalar(f64),
    /// Per interior node.
    Nodes(Vec<f64>),
}

/// Inverse of the diagonal of `I - factor·L`.
pub struct JacobiPreconditioner {
    exec: Arc<ParallelExecutor>,
    grid: Grid2D,
    kappa: Option<Arc<Diffusivity>>,
    inv_diag: InverseDiagonal,
}

impl JacobiPreconditioner {
    pub fn new(
        exec: Arc<ParallelExecutor>,
        grid: Grid2D,
        factor: f64,
        kappa: Option<Arc<Diffusivity>>,
    ) -> Self {
        let mut pc = Self {
            exec,
            grid,
            kappa,
            inv_diag: InverseDiagonal::Scalar(1.0),
        };
        pc.update_factor(factor);
        pc
    }
}

/// Diagonal of `I - factor·L` for the interior rows starting at `row0`, row-major interior
/// layout. `out` holds whole rows.
pub(crate) fn diagonal_rows(
    grid: &Grid2D,
    factor: f64,
    kappa: Option<&Diffusivity>,
    row0: usize,
    out: &mut [f64],
) {
    let in_x = grid.in_x();
    let nx = grid.nx;
    match kappa {
        Some(k) => {
            for (r, row) in out.chunks_exact_mut(in_x).enumerate() {
                let jj = row0 + r;
                for (ii, d) in row.iter_mut().enumerate() {
                    let g = (jj + 1) * nx + ii + 1;
                    *d = 1.0 + factor * k.center_weight(grid, g);
                }
            }
        }
        None => out.fill(1.0 + factor * 2.0 * (grid.ihx2 + grid.ihy2)),
    }
}

/// [`diagonal_rows`] over the whole interior, dispatched by rows on `exec`.
pub(crate) fn implicit_diagonal(
    exec: &ParallelExecutor,
    grid: &Grid2D,
    factor: f64,
    kappa: Option<&Diffusivity>,
    out: &mut [f64],
) {
    debug_assert_eq!(out.len(), grid.num_interior());
    exec.execute_split_mut(out, grid.in_x(), &|row0, rows: &mut [f64]| {
        diagonal_rows(grid, factor, kappa, row0, rows);
    });
}

impl Preconditioner for JacobiPreconditioner {
    fn apply(&mut self, r: &[f64], z: &mut [f64]) {
        match &self.inv_diag {
            InverseDiagonal::Scalar(s) => {
                let s = *s;
                self.exec.execute_split_mut(z, 1, &|start, zs: &mut [f64]| {
                    for (k, zi) in zs.iter_mut().enumerate() {
                        *zi = r[start + k] * s;
                    }
                });
            }
            InverseDiagonal::Nodes(inv) => {
                self.exec.execute_split_mut(z, 1, &|start, zs: &mut [f64]| {
                    for (k, zi) in zs.iter_mut().enumerate() {
                        *zi = r[start + k] * inv[start + k];
                    }
                });
            }
        }
    }

    fn update_factor(&mut self, factor: f64) {
        self.inv_diag = match self.kappa.as_deref() {
            None => InverseDiagonal::Scalar(1.0 / (1.0 + factor * 2.0 * (self.grid.ihx2 + self.grid.ihy2))),
            Some(k) => {
                let mut inv = match std::mem::replace(&mut self.inv_diag, InverseDiagonal::Scalar(1.0)) {
                    InverseDiagonal::Nodes(v) => v,
                    InverseDiagonal::Scalar(_) => vec![0.0; self.grid.num_interior()],
                };
                implicit_diagonal(&self.exec, &self.grid, factor, Some(k), &mut inv);
                self.exec.execute_split_mut(&mut inv, 1, &|_, ds: &mut [f64]| {
                    for d in ds {
                        *d = 1.0 / *d;
                    }
                });
                InverseDiagonal::Nodes(inv)
            }
        };
    }

    fn name(&self) -> &'static str {
        "jacobi"
    }
}
