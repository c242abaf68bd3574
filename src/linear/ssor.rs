// src/linear/ssor.rs

use std::sync::Arc;

use crate::grid::Grid2D;
use crate::linear::jacobi::diagonal_rows;
use crate::linear::Preconditioner;
use crate::stencil::Diffusivity;

/// Symmetric SOR: a forward then a backward Gauss-Seidel sweep over `I - factor·L`,
/// starting from `z = 0`.
///
/// Off-diagonal couplings are `factor·k_face/h²` (unit `k` without a diffusivity). The sweeps
/// are inherently sequential and run in the calling thread.
pub struct SsorPreconditioner {
    grid: Grid2D,
    factor: f64,
    omega: f64,
    kappa: Option<Arc<Diffusivity>>,
    inv_diag: Vec<f64>,
}

impl SsorPreconditioner {
    pub fn new(grid: Grid2D, factor: f64, omega: f64, kappa: Option<Arc<Diffusivity>>) -> Self {
        debug_assert!(omega > 0.0 && omega < 2.0, "SSOR needs 0 < omega < 2");
        let n = grid.num_interior();
        let mut pc = Self {
            grid,
            factor,
            omega,
            kappa,
            inv_diag: vec![0.0; n],
        };
        pc.update_factor(factor);
        pc
    }

    pub fn omega(&self) -> f64 {
        self.omega
    }

    /// (west, east, south, north) couplings of full index `g`, without the factor.
    #[inline]
    fn couplings(&self, g: usize) -> (f64, f64, f64, f64) {
        let (ihx2, ihy2, nx) = (self.grid.ihx2, self.grid.ihy2, self.grid.nx);
        match self.kappa.as_deref() {
            Some(k) => (
                k.kx[g - 1] * ihx2,
                k.kx[g] * ihx2,
                k.ky[g - nx] * ihy2,
                k.ky[g] * ihy2,
            ),
            None => (ihx2, ihx2, ihy2, ihy2),
        }
    }
}

impl Preconditioner for SsorPreconditioner {
    fn apply(&mut self, r: &[f64], z: &mut [f64]) {
        let (in_x, in_y, nx) = (self.grid.in_x(), self.grid.in_y(), self.grid.nx);
        let (f, w) = (self.factor, self.omega);
        z.fill(0.0);

        // forward
        for jj in 0..in_y {
            for ii in 0..in_x {
                let k = jj * in_x + ii;
                let (cw, _, cs, _) = self.couplings((jj + 1) * nx + ii + 1);
                let west = if ii > 0 { z[k - 1] } else { 0.0 };
                let south = if jj > 0 { z[k - in_x] } else { 0.0 };
                z[k] = w * self.inv_diag[k] * (r[k] + f * (cw * west + cs * south));
            }
        }

        // backward
        for jj in (0..in_y).rev() {
            for ii in (0..in_x).rev() {
                let k = jj * in_x + ii;
                let (cw, ce, cs, cn) = self.couplings((jj + 1) * nx + ii + 1);
                let west = if ii > 0 { z[k - 1] } else { 0.0 };
                let east = if ii + 1 < in_x { z[k + 1] } else { 0.0 };
                let south = if jj > 0 { z[k - in_x] } else { 0.0 };
                let north = if jj + 1 < in_y { z[k + in_x] } else { 0.0 };
                let a_kk = 1.0 / self.inv_diag[k];
                let res = r[k] + f * (cw * west + ce * east + cs * south + cn * north) - a_kk * z[k];
                z[k] += w * self.inv_diag[k] * res;
            }
        }
    }

    fn update_factor(&mut self, factor: f64) {
        self.factor = factor;
        diagonal_rows(&self.grid, factor, self.kappa.as_deref(), 0, &mut self.inv_diag);
        for d in &mut self.inv_diag {
            *d = 1.0 / *d;
        }
    }

    fn name(&self) -> &'static str {
        "ssor"
    }
}
