// src/stencil.rs
//
// Spatial operators on interior arrays.
//
// Every operator reads neighbour values from the interior array and, at the domain edge,
// from an optional full-grid array. With no full array the boundary counts as exactly zero,
// which is how the implicit matrix sees only interior coupling.
//
// Work is dispatched over interior rows.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PdeError, Result};
use crate::grid::Grid2D;
use crate::parallel::ParallelExecutor;

// ---------------------------
// Field sampling
// ---------------------------

#[derive(Clone, Copy)]
struct Field<'a> {
    grid: &'a Grid2D,
    int: &'a [f64],
    full: Option<&'a [f64]>,
}

impl<'a> Field<'a> {
    fn new(grid: &'a Grid2D, int: &'a [f64], full: Option<&'a [f64]>) -> Self {
        debug_assert_eq!(int.len(), grid.num_interior());
        debug_assert!(full.map_or(true, |f| f.len() == grid.size()));
        Self { grid, int, full }
    }

    /// Value at global node (gi, gj); nodes outside the grid read as zero.
    #[inline]
    fn at(&self, gi: isize, gj: isize) -> f64 {
        let nx = self.grid.nx as isize;
        let ny = self.grid.ny as isize;
        if gi >= 1 && gi <= nx - 2 && gj >= 1 && gj <= ny - 2 {
            self.int[((gj - 1) * (nx - 2) + (gi - 1)) as usize]
        } else if gi >= 0 && gi < nx && gj >= 0 && gj < ny {
            self.full.map_or(0.0, |f| f[(gj * nx + gi) as usize])
        } else {
            0.0
        }
    }
}

/// Second difference on a possibly non-uniform three-point line.
#[inline]
fn second_difference(l: f64, c: f64, r: f64, xl: f64, xc: f64, xr: f64) -> f64 {
    let dx_avg = 0.5 * (xr - xl);
    (r - c) / (dx_avg * (xr - xc)) - (c - l) / (dx_avg * (xc - xl))
}

// ---------------------------
// Laplacian
// ---------------------------

/// `out = Δu` on the interior (five-point stencil). Overwrites `out`.
pub fn laplacian(
    exec: &ParallelExecutor,
    grid: &Grid2D,
    u_int: &[f64],
    u_full: Option<&[f64]>,
    out: &mut [f64],
) {
    let field = Field::new(grid, u_int, u_full);
    let in_x = grid.in_x();
    exec.execute_split_mut(out, in_x, &|row0, rows: &mut [f64]| {
        for (r, row) in rows.chunks_exact_mut(in_x).enumerate() {
            let gj = row0 + r + 1;
            let (yd, yc, yu) = (grid.y[gj - 1], grid.y[gj], grid.y[gj + 1]);
            for (ii, o) in row.iter_mut().enumerate() {
                let gi = ii + 1;
                let (i, j) = (gi as isize, gj as isize);
                let c = field.at(i, j);
                let d2x = second_difference(
                    field.at(i - 1, j),
                    c,
                    field.at(i + 1, j),
                    grid.x[gi - 1],
                    grid.x[gi],
                    grid.x[gi + 1],
                );
                let d2y = second_difference(field.at(i, j - 1), c, field.at(i, j + 1), yd, yc, yu);
                *o = d2x + d2y;
            }
        }
    });
}

// ---------------------------
// Variable diffusivity
// ---------------------------

/// Face averaging of a node-centred diffusivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum KappaAveraging {
    #[default]
    Arithmetic,
    Harmonic,
}

impl std::str::FromStr for KappaAveraging {
    type Err = PdeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "arithmetic" | "arith" => Ok(Self::Arithmetic),
            "harmonic" | "harm" => Ok(Self::Harmonic),
            _ => Err(PdeError::invalid_config(format!("unknown kappa averaging: '{s}'"))),
        }
    }
}

impl KappaAveraging {
    #[inline]
    pub fn average(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Arithmetic => 0.5 * (a + b),
            Self::Harmonic => {
                if a > 0.0 && b > 0.0 {
                    2.0 * a * b / (a + b)
                } else {
                    0.0
                }
            }
        }
    }
}

/// Node diffusivity plus its face coefficients, full layout.
///
/// `kx[idx(i,j)]` sits on the face between `(i,j)` and `(i+1,j)`, `ky[idx(i,j)]` on the face
/// between `(i,j)` and `(i,j+1)`. On the last column/row the node value is used.
#[derive(Debug, Clone)]
pub struct Diffusivity {
    pub averaging: KappaAveraging,
    pub k_nodes: Vec<f64>,
    pub kx: Vec<f64>,
    pub ky: Vec<f64>,
}

impl Diffusivity {
    pub fn new(grid: &Grid2D, k_nodes: Vec<f64>, averaging: KappaAveraging) -> Self {
        assert_eq!(k_nodes.len(), grid.size(), "diffusivity must be full-grid sized");
        let (nx, ny) = (grid.nx, grid.ny);
        let mut kx = vec![0.0; grid.size()];
        let mut ky = vec![0.0; grid.size()];
        let k: &[f64] = &k_nodes;

        kx.par_chunks_mut(nx)
            .zip(ky.par_chunks_mut(nx))
            .enumerate()
            .for_each(|(j, (kx_row, ky_row))| {
                for i in 0..nx {
                    let g = j * nx + i;
                    kx_row[i] = if i + 1 < nx {
                        averaging.average(k[g], k[g + 1])
                    } else {
                        k[g]
                    };
                    ky_row[i] = if j + 1 < ny {
                        averaging.average(k[g], k[g + nx])
                    } else {
                        k[g]
                    };
                }
            });

        Self {
            averaging,
            k_nodes,
            kx,
            ky,
        }
    }

    /// Uniform diffusivity `k` (face values equal `k` for either averaging when `k > 0`).
    pub fn uniform(grid: &Grid2D, k: f64, averaging: KappaAveraging) -> Self {
        Self::new(grid, vec![k; grid.size()], averaging)
    }

    /// Magnitude of the centre weight of `∇·(κ∇)` at full index `g` on a uniform grid.
    #[inline]
    pub fn center_weight(&self, grid: &Grid2D, g: usize) -> f64 {
        (self.kx[g] + self.kx[g - 1]) * grid.ihx2 + (self.ky[g] + self.ky[g - grid.nx]) * grid.ihy2
    }
}

/// `out = ∇·(κ∇u)` on the interior using precomputed face coefficients. Overwrites `out`.
pub fn div_k_grad(
    exec: &ParallelExecutor,
    grid: &Grid2D,
    kappa: &Diffusivity,
    u_int: &[f64],
    u_full: Option<&[f64]>,
    out: &mut [f64],
) {
    let field = Field::new(grid, u_int, u_full);
    let (nx, in_x) = (grid.nx, grid.in_x());
    let (kx, ky) = (&kappa.kx, &kappa.ky);
    exec.execute_split_mut(out, in_x, &|row0, rows: &mut [f64]| {
        for (r, row) in rows.chunks_exact_mut(in_x).enumerate() {
            let gj = row0 + r + 1;
            let (yd, yc, yu) = (grid.y[gj - 1], grid.y[gj], grid.y[gj + 1]);
            let dy_avg = 0.5 * (yu - yd);
            for (ii, o) in row.iter_mut().enumerate() {
                let gi = ii + 1;
                let g = gj * nx + gi;
                let (i, j) = (gi as isize, gj as isize);
                let c = field.at(i, j);
                let (xl, xc, xr) = (grid.x[gi - 1], grid.x[gi], grid.x[gi + 1]);
                let dx_avg = 0.5 * (xr - xl);

                let d2x = (kx[g] * (field.at(i + 1, j) - c) / (xr - xc)
                    - kx[g - 1] * (c - field.at(i - 1, j)) / (xc - xl))
                    / dx_avg;
                let d2y = (ky[g] * (field.at(i, j + 1) - c) / (yu - yc)
                    - ky[g - nx] * (c - field.at(i, j - 1)) / (yc - yd))
                    / dy_avg;
                *o = d2x + d2y;
            }
        }
    });
}

/// Diffusion operator: Laplacian, or `∇·(κ∇)` when a diffusivity is supplied.
pub fn diffusion(
    exec: &ParallelExecutor,
    grid: &Grid2D,
    kappa: Option<&Diffusivity>,
    u_int: &[f64],
    u_full: Option<&[f64]>,
    out: &mut [f64],
) {
    match kappa {
        Some(k) => div_k_grad(exec, grid, k, u_int, u_full, out),
        None => laplacian(exec, grid, u_int, u_full, out),
    }
}

// ---------------------------
// Upwind convection (MUSCL / minmod)
// ---------------------------

/// Velocity components evaluated pointwise.
pub trait ConvectionField: Send + Sync {
    fn bx(&self, x: f64, y: f64) -> f64;
    fn by(&self, x: f64, y: f64) -> f64;
}

/// Velocity sampled once per node, full layout.
#[derive(Debug, Clone)]
pub struct VelocityField {
    pub bx: Vec<f64>,
    pub by: Vec<f64>,
}

impl VelocityField {
    pub fn sample(grid: &Grid2D, field: &dyn ConvectionField) -> Self {
        let nx = grid.nx;
        let mut bx = vec![0.0; grid.size()];
        let mut by = vec![0.0; grid.size()];
        bx.par_chunks_mut(nx)
            .zip(by.par_chunks_mut(nx))
            .enumerate()
            .for_each(|(j, (bx_row, by_row))| {
                let y = grid.y[j];
                for i in 0..nx {
                    bx_row[i] = field.bx(grid.x[i], y);
                    by_row[i] = field.by(grid.x[i], y);
                }
            });
        Self { bx, by }
    }

    /// Largest |bx| and |by| over the grid.
    pub fn max_abs(&self) -> (f64, f64) {
        let m = |v: &[f64]| v.iter().fold(0.0f64, |a, b| a.max(b.abs()));
        (m(&self.bx), m(&self.by))
    }
}

/// Minmod limiter in ratio form, bounded to [0, 1].
#[inline]
pub fn minmod(r: f64) -> f64 {
    r.min(1.0).max(0.0)
}

#[inline]
fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Limited upwind derivative along one axis.
///
/// `k` is the node's position among the `n_in` interior nodes of the line, `g` its global
/// index into `coord`, and `at(d)` samples the value `d` nodes away along the axis.
#[inline]
fn upwind_derivative<S: Fn(isize) -> f64>(
    b: f64,
    k: usize,
    n_in: usize,
    coord: &[f64],
    g: usize,
    at: S,
) -> f64 {
    let (l, c, r) = (at(-1), at(0), at(1));
    let (xl, xc, xr) = (coord[g - 1], coord[g], coord[g + 1]);
    let dx_lc = xc - xl;
    let dx_cr = xr - xc;
    let dx_avg = 0.5 * (xr - xl);

    if b > 0.0 {
        if k == 0 {
            return (c - l) / dx_lc;
        }
        let ll = at(-2);
        let dx_ll = xl - coord[g - 2];
        let grad_bw = (c - l) / dx_lc;
        let grad_fw = (r - c) / dx_cr;
        let grad_bbw = (l - ll) / dx_ll;

        let r_i = ratio(grad_fw, grad_bw);
        let r_im1 = ratio(grad_bw, grad_bbw);
        let flux_right = c + 0.5 * minmod(r_i) * (c - l) * (dx_cr / dx_lc);
        let flux_left = l + 0.5 * minmod(r_im1) * (l - ll) * (dx_lc / dx_ll);
        (flux_right - flux_left) / dx_avg
    } else {
        if k + 1 == n_in {
            return (r - c) / dx_cr;
        }
        let rr = at(2);
        let dx_rr = coord[g + 2] - xr;
        let grad_bw = (c - l) / dx_lc;
        let grad_fw = (r - c) / dx_cr;
        let grad_ffw = (rr - r) / dx_rr;

        let r_i = ratio(grad_bw, grad_fw);
        let r_ip1 = ratio(grad_fw, grad_ffw);
        let flux_left = c - 0.5 * minmod(r_i) * (r - c) * (dx_lc / dx_cr);
        let flux_right = r - 0.5 * minmod(r_ip1) * (rr - r) * (dx_cr / dx_rr);
        (flux_right - flux_left) / dx_avg
    }
}

/// `out += bx·∂u/∂x + by·∂u/∂y` with limited upwind reconstruction. Accumulates into `out`.
pub fn convection(
    exec: &ParallelExecutor,
    grid: &Grid2D,
    velocity: &VelocityField,
    u_int: &[f64],
    u_full: Option<&[f64]>,
    out: &mut [f64],
) {
    let field = Field::new(grid, u_int, u_full);
    let (nx, in_x, in_y) = (grid.nx, grid.in_x(), grid.in_y());
    exec.execute_split_mut(out, in_x, &|row0, rows: &mut [f64]| {
        for (r, row) in rows.chunks_exact_mut(in_x).enumerate() {
            let jj = row0 + r;
            let gj = jj + 1;
            let j = gj as isize;
            for (ii, o) in row.iter_mut().enumerate() {
                let gi = ii + 1;
                let i = gi as isize;
                let g = gj * nx + gi;
                let (bx, by) = (velocity.bx[g], velocity.by[g]);

                let mut acc = 0.0;
                if bx != 0.0 {
                    acc += bx * upwind_derivative(bx, ii, in_x, &grid.x, gi, |d| field.at(i + d, j));
                }
                if by != 0.0 {
                    acc += by * upwind_derivative(by, jj, in_y, &grid.y, gj, |d| field.at(i, j + d));
                }
                *o += acc;
            }
        }
    });
}
