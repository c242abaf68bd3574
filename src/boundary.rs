// src/boundary.rs
//
// Boundary conditions applied in place to the edge nodes of a full-grid array.
// Bottom and top rows include the corners; the side columns skip them so that no node is
// assigned twice.

use crate::grid::Grid2D;

/// Overwrites the four edges of `u` (full layout) for time `t`.
pub trait BoundaryOperator: Send + Sync {
    fn apply(&self, grid: &Grid2D, u: &mut [f64], t: f64);
}

// ---------------------------
// Dirichlet
// ---------------------------

/// Edge value taken from a prescribed function `g(x, y, t)`.
pub struct DirichletBoundary<F> {
    value: F,
}

impl<F> DirichletBoundary<F>
where
    F: Fn(f64, f64, f64) -> f64 + Send + Sync,
{
    pub fn new(value: F) -> Self {
        Self { value }
    }
}

/// Homogeneous Dirichlet boundary.
pub fn zero_dirichlet() -> DirichletBoundary<fn(f64, f64, f64) -> f64> {
    fn zero(_: f64, _: f64, _: f64) -> f64 {
        0.0
    }
    DirichletBoundary::new(zero as fn(f64, f64, f64) -> f64)
}

impl<F> BoundaryOperator for DirichletBoundary<F>
where
    F: Fn(f64, f64, f64) -> f64 + Send + Sync,
{
    fn apply(&self, grid: &Grid2D, u: &mut [f64], t: f64) {
        let (nx, ny) = (grid.nx, grid.ny);
        let y_top = grid.y[ny - 1];
        for i in 0..nx {
            let x = grid.x[i];
            u[grid.idx(i, 0)] = (self.value)(x, 0.0, t);
            u[grid.idx(i, ny - 1)] = (self.value)(x, y_top, t);
        }
        let x_right = grid.x[nx - 1];
        for j in 1..ny - 1 {
            let y = grid.y[j];
            u[grid.idx(0, j)] = (self.value)(0.0, y, t);
            u[grid.idx(nx - 1, j)] = (self.value)(x_right, y, t);
        }
    }
}

// ---------------------------
// Neumann
// ---------------------------

/// Prescribed outward normal flux on each side, enforced with a one-sided difference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeumannBoundary {
    pub g_left: f64,
    pub g_right: f64,
    pub g_bottom: f64,
    pub g_top: f64,
}

impl NeumannBoundary {
    pub fn new(g_left: f64, g_right: f64, g_bottom: f64, g_top: f64) -> Self {
        Self {
            g_left,
            g_right,
            g_bottom,
            g_top,
        }
    }

    /// Zero flux on every side.
    pub fn insulated() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

impl BoundaryOperator for NeumannBoundary {
    fn apply(&self, grid: &Grid2D, u: &mut [f64], _t: f64) {
        let (nx, ny) = (grid.nx, grid.ny);
        for i in 0..nx {
            u[grid.idx(i, 0)] = u[grid.idx(i, 1)] - grid.hy * self.g_bottom;
            u[grid.idx(i, ny - 1)] = u[grid.idx(i, ny - 2)] + grid.hy * self.g_top;
        }
        for j in 1..ny - 1 {
            u[grid.idx(0, j)] = u[grid.idx(1, j)] - grid.hx * self.g_left;
            u[grid.idx(nx - 1, j)] = u[grid.idx(nx - 2, j)] + grid.hx * self.g_right;
        }
    }
}

// ---------------------------
// Robin
// ---------------------------

const ROBIN_EPS: f64 = 1e-14;

/// `a·u + b·∂u/∂n = g` with `n` the outward normal, one `g` per side.
///
/// The normal points out of the domain on every side, so the edge value is always
/// `(g + (b/h)·u_adj) / (a + b/h)`. Conventions that differentiate along `+x`/`+y` instead
/// flip the sign of `b` on the left and bottom edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobinBoundary {
    pub a: f64,
    pub b: f64,
    pub g_left: f64,
    pub g_right: f64,
    pub g_bottom: f64,
    pub g_top: f64,
}

impl RobinBoundary {
    pub fn new(a: f64, b: f64, g_left: f64, g_right: f64, g_bottom: f64, g_top: f64) -> Self {
        Self {
            a,
            b,
            g_left,
            g_right,
            g_bottom,
            g_top,
        }
    }

    /// Solve `a·u_e + b·(u_e − u_adj)/h = g` for the edge value.
    #[inline]
    fn edge_value(&self, g: f64, u_adj: f64, h: f64) -> f64 {
        let bh = self.b / h;
        (g + bh * u_adj) / (self.a + bh)
    }
}

impl BoundaryOperator for RobinBoundary {
    fn apply(&self, grid: &Grid2D, u: &mut [f64], _t: f64) {
        if self.a.abs() < ROBIN_EPS && self.b.abs() < ROBIN_EPS {
            return;
        }
        let (nx, ny) = (grid.nx, grid.ny);
        for i in 0..nx {
            u[grid.idx(i, 0)] = self.edge_value(self.g_bottom, u[grid.idx(i, 1)], grid.hy);
            u[grid.idx(i, ny - 1)] = self.edge_value(self.g_top, u[grid.idx(i, ny - 2)], grid.hy);
        }
        for j in 1..ny - 1 {
            u[grid.idx(0, j)] = self.edge_value(self.g_left, u[grid.idx(1, j)], grid.hx);
            u[grid.idx(nx - 1, j)] = self.edge_value(self.g_right, u[grid.idx(nx - 2, j)], grid.hx);
        }
    }
}
