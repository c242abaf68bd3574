// src/linear/multigrid.rs
//
// Geometric multigrid V-cycle used as a preconditioner for `A = I - factor·L`.
//
// Node-centred hierarchy: a level with N nodes per direction coarsens to (N-1)/2 + 1, so
// every coarse node coincides with an even fine node. Each level owns its grid, its own
// `ImplicitMatrix` (rediscretised operator), the operator diagonal and the work vectors,
// all allocated once here.
//
// Transfer operators:
//   restriction  : full weighting (1/4 centre, 1/8 edges, 1/16 corners)
//   prolongation : bilinear (exact at coincident nodes, 2- or 4-point averages elsewhere)
// Restriction is a scaled transpose of prolongation, and pre/post smoothing use the same
// weighted-Jacobi sweep count, so the V-cycle is a symmetric preconditioner for PCG.

use std::sync::Arc;

use rayon::prelude::*;

use crate::grid::Grid2D;
use crate::linear::jacobi::implicit_diagonal;
use crate::linear::{ImplicitMatrix, MatrixOperator, Preconditioner};
use crate::parallel::ParallelExecutor;
use crate::stencil::{Diffusivity, KappaAveraging};

/// Hierarchy depth cap.
pub const MAX_LEVELS: usize = 5;
/// Weighted-Jacobi damping.
pub const OMEGA: f64 = 0.8;
pub const PRE_SMOOTH: usize = 2;
pub const POST_SMOOTH: usize = 2;
/// Sweeps on the coarsest level in place of a direct solve.
pub const COARSE_SWEEPS: usize = 50;
/// Smallest interior extent a coarse level may have.
const MIN_COARSE_INTERIOR: usize = 3;

struct MgLevel {
    grid: Grid2D,
    a: ImplicitMatrix,
    kappa: Option<Arc<Diffusivity>>,
    diag: Vec<f64>,
    /// right-hand side
    r: Vec<f64>,
    /// iterate / correction
    z: Vec<f64>,
    /// residual, then prolongated correction
    res: Vec<f64>,
    /// A·z
    tmp: Vec<f64>,
}

impl MgLevel {
    fn new(exec: &Arc<ParallelExecutor>, grid: Grid2D, factor: f64, kappa: Option<Arc<Diffusivity>>) -> Self {
        let n = grid.num_interior();
        let a = ImplicitMatrix::new(Arc::clone(exec), grid.clone(), factor, kappa.clone());
        let mut diag = vec![0.0; n];
        implicit_diagonal(exec, &grid, factor, kappa.as_deref(), &mut diag);
        Self {
            grid,
            a,
            kappa,
            diag,
            r: vec![0.0; n],
            z: vec![0.0; n],
            res: vec![0.0; n],
            tmp: vec![0.0; n],
        }
    }

    fn update_factor(&mut self, exec: &ParallelExecutor, factor: f64) {
        self.a.update_factor(factor);
        implicit_diagonal(exec, &self.grid, factor, self.kappa.as_deref(), &mut self.diag);
    }
}

/// Coarse node count for `n` fine nodes, if the level may be coarsened.
fn coarsen(n: usize) -> Option<usize> {
    if (n - 1) % 2 != 0 {
        return None;
    }
    let nc = (n - 1) / 2 + 1;
    (nc >= MIN_COARSE_INTERIOR + 2).then_some(nc)
}

/// Inject a node field onto the coarse grid: `k_c(i, j) = k_f(2i, 2j)`.
fn inject_nodes(fine: &Grid2D, coarse: &Grid2D, k_fine: &[f64]) -> Vec<f64> {
    let mut k = vec![0.0; coarse.size()];
    k.par_chunks_mut(coarse.nx)
        .enumerate()
        .for_each(|(jc, row)| {
            for (ic, v) in row.iter_mut().enumerate() {
                *v = k_fine[fine.idx(2 * ic, 2 * jc)];
            }
        });
    k
}

pub struct MultigridPreconditioner {
    exec: Arc<ParallelExecutor>,
    levels: Vec<MgLevel>,
}

impl MultigridPreconditioner {
    pub fn new(
        exec: Arc<ParallelExecutor>,
        grid: &Grid2D,
        factor: f64,
        kappa: Option<Arc<Diffusivity>>,
    ) -> Self {
        let mut levels = vec![MgLevel::new(&exec, grid.clone(), factor, kappa)];

        while levels.len() < MAX_LEVELS {
            let fine = &levels[levels.len() - 1];
            let (Some(nxc), Some(nyc)) = (coarsen(fine.grid.nx), coarsen(fine.grid.ny)) else {
                break;
            };
            let coarse_grid = Grid2D::new(nxc, nyc, fine.grid.lx, fine.grid.ly);
            // coarse diffusivity: injected nodes, harmonic faces
            let coarse_kappa = fine.kappa.as_deref().map(|k| {
                let nodes = inject_nodes(&fine.grid, &coarse_grid, &k.k_nodes);
                Arc::new(Diffusivity::new(&coarse_grid, nodes, KappaAveraging::Harmonic))
            });
            levels.push(MgLevel::new(&exec, coarse_grid, factor, coarse_kappa));
        }

        if levels.len() == 1 {
            log::warn!(
                "multigrid: {}x{} grid cannot be coarsened; falling back to Jacobi smoothing",
                grid.nx,
                grid.ny
            );
        } else {
            log::debug!(
                "multigrid: {} levels, coarsest {}x{}",
                levels.len(),
                levels[levels.len() - 1].grid.nx,
                levels[levels.len() - 1].grid.ny
            );
        }

        Self { exec, levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Node counts per level, finest first.
    pub fn level_sizes(&self) -> Vec<(usize, usize)> {
        self.levels.iter().map(|l| (l.grid.nx, l.grid.ny)).collect()
    }

    /// `z += ω·(r - A z)/diag(A)`, `iters` times.
    fn smooth_weighted_jacobi(exec: &ParallelExecutor, level: &mut MgLevel, iters: usize) {
        for _ in 0..iters {
            level.a.multiply(&level.z, &mut level.tmp);
            let (r, az, diag) = (&level.r, &level.tmp, &level.diag);
            exec.execute_split_mut(&mut level.z, 1, &|start, zs: &mut [f64]| {
                for (k, z) in zs.iter_mut().enumerate() {
                    let m = start + k;
                    *z += OMEGA * (r[m] - az[m]) / diag[m];
                }
            });
        }
    }

    fn compute_residual(exec: &ParallelExecutor, level: &mut MgLevel) {
        level.a.multiply(&level.z, &mut level.tmp);
        let (r, az) = (&level.r, &level.tmp);
        exec.execute_split_mut(&mut level.res, 1, &|start, out: &mut [f64]| {
            for (k, o) in out.iter_mut().enumerate() {
                *o = r[start + k] - az[start + k];
            }
        });
    }

    fn restrict_residual(exec: &ParallelExecutor, fine: &MgLevel, coarse: &mut MgLevel) {
        let in_xf = fine.grid.in_x() as isize;
        let in_yf = fine.grid.in_y() as isize;
        let in_xc = coarse.grid.in_x();
        let res = &fine.res;

        let at = |fi: isize, fj: isize| -> f64 {
            if fi < 0 || fj < 0 || fi >= in_xf || fj >= in_yf {
                0.0
            } else {
                res[(fj * in_xf + fi) as usize]
            }
        };

        exec.execute_split_mut(&mut coarse.r, in_xc, &|row0, rows: &mut [f64]| {
            for (r, row) in rows.chunks_exact_mut(in_xc).enumerate() {
                // coarse interior node (ci, cj) sits on fine interior node (2ci+1, 2cj+1)
                let fj = 2 * (row0 + r) as isize + 1;
                for (ci, v) in row.iter_mut().enumerate() {
                    let fi = 2 * ci as isize + 1;
                    let center = at(fi, fj);
                    let edges = at(fi - 1, fj) + at(fi + 1, fj) + at(fi, fj - 1) + at(fi, fj + 1);
                    let corners = at(fi - 1, fj - 1)
                        + at(fi + 1, fj - 1)
                        + at(fi - 1, fj + 1)
                        + at(fi + 1, fj + 1);
                    *v = 0.25 * center + 0.125 * edges + 0.0625 * corners;
                }
            }
        });
    }

    /// Bilinear interpolation of `coarse.z` into `fine.res`.
    fn prolongate(exec: &ParallelExecutor, coarse: &MgLevel, fine: &mut MgLevel) {
        let in_xc = coarse.grid.in_x();
        let in_yc = coarse.grid.in_y();
        let in_xf = fine.grid.in_x();
        let zc = &coarse.z;

        // coarse value at global coarse node (gi, gj); boundary nodes carry zero correction
        let at = |gi: usize, gj: usize| -> f64 {
            if gi >= 1 && gi <= in_xc && gj >= 1 && gj <= in_yc {
                zc[(gj - 1) * in_xc + (gi - 1)]
            } else {
                0.0
            }
        };
        // coarse nodes bracketing fine global index g
        let span = |g: usize| -> (usize, usize) {
            if g % 2 == 0 {
                (g / 2, g / 2)
            } else {
                ((g - 1) / 2, (g + 1) / 2)
            }
        };

        exec.execute_split_mut(&mut fine.res, in_xf, &|row0, rows: &mut [f64]| {
            for (r, row) in rows.chunks_exact_mut(in_xf).enumerate() {
                let (j0, j1) = span(row0 + r + 1);
                for (fi, e) in row.iter_mut().enumerate() {
                    let (i0, i1) = span(fi + 1);
                    *e = match (i0 == i1, j0 == j1) {
                        (true, true) => at(i0, j0),
                        (true, false) => 0.5 * (at(i0, j0) + at(i0, j1)),
                        (false, true) => 0.5 * (at(i0, j0) + at(i1, j0)),
                        (false, false) => {
                            0.25 * (at(i0, j0) + at(i1, j0) + at(i0, j1) + at(i1, j1))
                        }
                    };
                }
            }
        });
    }

    fn v_cycle(&mut self, l: usize) {
        let exec = Arc::clone(&self.exec);
        let exec = &*exec;

        if l == self.levels.len() - 1 {
            let coarsest = &mut self.levels[l];
            coarsest.z.fill(0.0);
            Self::smooth_weighted_jacobi(exec, coarsest, COARSE_SWEEPS);
            return;
        }

        Self::smooth_weighted_jacobi(exec, &mut self.levels[l], PRE_SMOOTH);
        Self::compute_residual(exec, &mut self.levels[l]);

        {
            let (a, b) = self.levels.split_at_mut(l + 1);
            Self::restrict_residual(exec, &a[l], &mut b[0]);
            b[0].z.fill(0.0);
        }

        self.v_cycle(l + 1);

        {
            let (a, b) = self.levels.split_at_mut(l + 1);
            let fine = &mut a[l];
            Self::prolongate(exec, &b[0], fine);
            let e = &fine.res;
            exec.execute_split_mut(&mut fine.z, 1, &|start, zs: &mut [f64]| {
                for (k, z) in zs.iter_mut().enumerate() {
                    *z += e[start + k];
                }
            });
        }

        Self::smooth_weighted_jacobi(exec, &mut self.levels[l], POST_SMOOTH);
    }
}

impl Preconditioner for MultigridPreconditioner {
    fn apply(&mut self, r: &[f64], z: &mut [f64]) {
        {
            let top = &mut self.levels[0];
            top.r.copy_from_slice(r);
            top.z.fill(0.0);
        }
        if self.levels.len() == 1 {
            Self::smooth_weighted_jacobi(&self.exec, &mut self.levels[0], 1);
        } else {
            self.v_cycle(0);
        }
        z.copy_from_slice(&self.levels[0].z);
    }

    fn update_factor(&mut self, factor: f64) {
        for level in &mut self.levels {
            level.update_factor(&self.exec, factor);
        }
    }

    fn name(&self) -> &'static str {
        "multigrid"
    }
}
