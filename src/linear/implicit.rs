// src/linear/implicit.rs

use std::sync::Arc;

use crate::grid::Grid2D;
use crate::linear::MatrixOperator;
use crate::parallel::ParallelExecutor;
use crate::stencil::{self, Diffusivity};
use crate::vector_ops;

/// `A = I - factor·L`, with `L` the Laplacian or `∇·(κ∇)` applied with a zero boundary.
///
/// Boundary data never enters `multiply`; the time stepper folds it into the right-hand side.
pub struct ImplicitMatrix {
    exec: Arc<ParallelExecutor>,
    grid: Grid2D,
    factor: f64,
    kappa: Option<Arc<Diffusivity>>,
    temp_lx: Vec<f64>,
}

impl ImplicitMatrix {
    pub fn new(
        exec: Arc<ParallelExecutor>,
        grid: Grid2D,
        factor: f64,
        kappa: Option<Arc<Diffusivity>>,
    ) -> Self {
        let n = grid.num_interior();
        Self {
            exec,
            grid,
            factor,
            kappa,
            temp_lx: vec![0.0; n],
        }
    }

    pub fn update_factor(&mut self, factor: f64) {
        self.factor = factor;
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn grid(&self) -> &Grid2D {
        &self.grid
    }

    pub fn size(&self) -> usize {
        self.temp_lx.len()
    }
}

impl MatrixOperator for ImplicitMatrix {
    fn multiply(&mut self, x: &[f64], y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.temp_lx.len());
        stencil::diffusion(
            &self.exec,
            &self.grid,
            self.kappa.as_deref(),
            x,
            None,
            &mut self.temp_lx,
        );
        vector_ops::par_add_scaled(&self.exec, x, -self.factor, &self.temp_lx, y);
    }
}
