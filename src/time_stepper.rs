// src/time_stepper.rs
//
// One implicit (or implicit-explicit) time advance of
//
//     u_t = α ∇·(κ∇u) - b·∇u + f
//
// Diffusion is treated with Crank-Nicolson or backward Euler through `A = I - factor·L`;
// convection, when present, is always explicit (IMEX). Boundary data at the new time enters
// the right-hand side through `factor·L(0; u_next)` so the matrix only couples interior
// nodes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::boundary::BoundaryOperator;
use crate::error::{PdeError, Result};
use crate::grid::Grid2D;
use crate::linear::{
    build_preconditioner, Cgnr, ImplicitMatrix, LinearSolver, Pcg, Preconditioner,
    PreconditionerKind, SolveResult, SolveStatus,
};
use crate::parallel::ParallelExecutor;
use crate::stencil::{self, ConvectionField, Diffusivity, KappaAveraging, VelocityField};
use crate::vector_ops::{par_add_scaled, par_axpy};

/// Supplies forcing, exact solution and diffusivity on the full grid.
pub trait ForcingProvider: Send + Sync {
    fn evaluate_forcing(&self, grid: &Grid2D, t: f64, f_full: &mut [f64]);

    fn evaluate_exact(&self, grid: &Grid2D, t: f64, u_full: &mut [f64]);

    fn evaluate_kappa(&self, _grid: &Grid2D, k_full: &mut [f64]) {
        k_full.fill(1.0);
    }
}

/// Zero forcing, zero exact solution.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoForcing;

impl ForcingProvider for NoForcing {
    fn evaluate_forcing(&self, _grid: &Grid2D, _t: f64, f_full: &mut [f64]) {
        f_full.fill(0.0);
    }

    fn evaluate_exact(&self, _grid: &Grid2D, _t: f64, u_full: &mut [f64]) {
        u_full.fill(0.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Scheme {
    #[default]
    #[serde(rename = "CN")]
    CrankNicolson,
    #[serde(rename = "BE")]
    BackwardEuler,
    /// Backward-Euler diffusion with explicit convection.
    #[serde(rename = "IMEX")]
    Imex,
}

impl std::str::FromStr for Scheme {
    type Err = PdeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cn" | "crank-nicolson" | "crank_nicolson" => Ok(Self::CrankNicolson),
            "be" | "backward-euler" | "backward_euler" => Ok(Self::BackwardEuler),
            "imex" => Ok(Self::Imex),
            _ => Err(PdeError::invalid_config(format!("unknown scheme: '{s}'"))),
        }
    }
}

impl Scheme {
    /// Temporal order used by step-doubling error estimates.
    pub fn order(self) -> u32 {
        match self {
            Self::CrankNicolson => 2,
            Self::BackwardEuler | Self::Imex => 1,
        }
    }

    /// Implicit factor multiplying `L` in `A = I - factor·L`.
    pub fn implicit_factor(self, dt: f64, alpha: f64) -> f64 {
        match self {
            Self::CrankNicolson => 0.5 * dt * alpha,
            Self::BackwardEuler | Self::Imex => dt * alpha,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepperSettings {
    pub scheme: Scheme,
    pub alpha: f64,
    pub dt: f64,
    pub max_iters: usize,
    pub tol: f64,
    pub preconditioner: PreconditionerKind,
    pub kappa_averaging: KappaAveraging,
    pub ssor_omega: f64,
}

impl Default for StepperSettings {
    fn default() -> Self {
        Self {
            scheme: Scheme::CrankNicolson,
            alpha: 1.0,
            dt: 1e-3,
            max_iters: 1000,
            tol: 1e-8,
            preconditioner: PreconditionerKind::Jacobi,
            kappa_averaging: KappaAveraging::Arithmetic,
            ssor_omega: 1.5,
        }
    }
}

pub struct TimeStepper {
    exec: Arc<ParallelExecutor>,
    grid: Grid2D,
    settings: StepperSettings,
    factor: f64,

    boundary: Box<dyn BoundaryOperator>,
    kappa: Option<Arc<Diffusivity>>,
    velocity: Option<VelocityField>,

    matrix: ImplicitMatrix,
    precond: Box<dyn Preconditioner>,
    pcg: Pcg,
    fallback: Cgnr,

    // full layout
    u: Vec<f64>,
    u_next: Vec<f64>,
    f_full: Vec<f64>,
    // interior layout
    u_int: Vec<f64>,
    u_next_int: Vec<f64>,
    f_int: Vec<f64>,
    rhs: Vec<f64>,
    temp_lx: Vec<f64>,

    total_iterations: usize,
    max_abs_residual: f64,
    max_rel_residual: f64,
    steps_taken: usize,
    fallback_solves: usize,
}

/// Largest stable explicit step for the sampled velocity (infinite without convection).
fn cfl_limit(grid: &Grid2D, velocity: &VelocityField) -> f64 {
    let (max_bx, max_by) = velocity.max_abs();
    let lx = if max_bx > 0.0 { grid.hx / max_bx } else { f64::INFINITY };
    let ly = if max_by > 0.0 { grid.hy / max_by } else { f64::INFINITY };
    lx.min(ly)
}

impl TimeStepper {
    /// `kappa` is a full-grid node diffusivity (constant 1 when `None`); `convection`, when
    /// given, is sampled once here and checked against the CFL limit.
    pub fn new(
        exec: Arc<ParallelExecutor>,
        grid: Grid2D,
        settings: StepperSettings,
        boundary: Box<dyn BoundaryOperator>,
        kappa: Option<&[f64]>,
        convection: Option<&dyn ConvectionField>,
    ) -> Result<Self> {
        let size = grid.size();
        let n = grid.num_interior();

        let kappa = match kappa {
            Some(k) if k.len() != size => {
                return Err(PdeError::DimensionMismatch {
                    expected: size,
                    actual: k.len(),
                })
            }
            Some(k) => Some(Arc::new(Diffusivity::new(&grid, k.to_vec(), settings.kappa_averaging))),
            None => None,
        };

        let velocity = convection.map(|c| VelocityField::sample(&grid, c));
        if let Some(v) = &velocity {
            let limit = cfl_limit(&grid, v);
            if settings.dt > limit {
                return Err(PdeError::CflViolation {
                    dt: settings.dt,
                    limit,
                });
            }
            log::info!("CFL check passed: dt = {:e}, limit = {:e}", settings.dt, limit);
        }

        let factor = settings.scheme.implicit_factor(settings.dt, settings.alpha);
        let matrix = ImplicitMatrix::new(Arc::clone(&exec), grid.clone(), factor, kappa.clone());
        let precond = build_preconditioner(
            settings.preconditioner,
            &exec,
            &grid,
            factor,
            kappa.clone(),
            settings.ssor_omega,
        );
        let pcg = Pcg::new(Arc::clone(&exec), n, settings.max_iters, settings.tol);
        let fallback = Cgnr::new(Arc::clone(&exec), n, settings.max_iters, settings.tol);

        log::debug!(
            "time stepper: {:?}, dt = {:e}, alpha = {}, preconditioner = {}, {}x{} grid",
            settings.scheme,
            settings.dt,
            settings.alpha,
            precond.name(),
            grid.nx,
            grid.ny
        );

        Ok(Self {
            exec,
            grid,
            settings,
            factor,
            boundary,
            kappa,
            velocity,
            matrix,
            precond,
            pcg,
            fallback,
            u: vec![0.0; size],
            u_next: vec![0.0; size],
            f_full: vec![0.0; size],
            u_int: vec![0.0; n],
            u_next_int: vec![0.0; n],
            f_int: vec![0.0; n],
            rhs: vec![0.0; n],
            temp_lx: vec![0.0; n],
            total_iterations: 0,
            max_abs_residual: 0.0,
            max_rel_residual: 0.0,
            steps_taken: 0,
            fallback_solves: 0,
        })
    }

    /// Advance the state from `t` to `t + dt`.
    pub fn step(&mut self, t: f64, forcing: &dyn ForcingProvider) -> Result<SolveResult> {
        let exec = &*self.exec;
        let grid = &self.grid;
        let kappa = self.kappa.as_deref();
        let dt = self.settings.dt;
        let alpha = self.settings.alpha;

        // 1. forcing
        let t_force = match self.settings.scheme {
            Scheme::CrankNicolson => t + 0.5 * dt,
            Scheme::BackwardEuler | Scheme::Imex => t + dt,
        };
        forcing.evaluate_forcing(grid, t_force, &mut self.f_full);
        grid.extract_interior(&self.f_full, &mut self.f_int);

        // 2. current boundary
        self.boundary.apply(grid, &mut self.u, t);
        grid.extract_interior(&self.u, &mut self.u_int);

        // 3. explicit part
        match self.settings.scheme {
            Scheme::CrankNicolson => {
                stencil::diffusion(exec, grid, kappa, &self.u_int, Some(&self.u), &mut self.temp_lx);
                par_add_scaled(exec, &self.u_int, 0.5 * dt * alpha, &self.temp_lx, &mut self.rhs);
                par_axpy(exec, dt, &self.f_int, &mut self.rhs);
            }
            Scheme::BackwardEuler | Scheme::Imex => {
                par_add_scaled(exec, &self.u_int, dt, &self.f_int, &mut self.rhs);
            }
        }

        // 4. explicit convection
        if let Some(velocity) = &self.velocity {
            self.temp_lx.fill(0.0);
            stencil::convection(exec, grid, velocity, &self.u_int, Some(&self.u), &mut self.temp_lx);
            par_axpy(exec, -dt, &self.temp_lx, &mut self.rhs);
        }

        // 5. future boundary
        self.boundary.apply(grid, &mut self.u_next, t + dt);
        self.u_next_int.fill(0.0);
        stencil::diffusion(exec, grid, kappa, &self.u_next_int, Some(&self.u_next), &mut self.temp_lx);
        par_axpy(exec, self.factor, &self.temp_lx, &mut self.rhs);

        // 6. initial guess
        self.u_next_int.copy_from_slice(&self.u_int);

        // 7. implicit solve
        let mut result = self.pcg.solve(
            &mut self.matrix,
            self.precond.as_mut(),
            &self.rhs,
            &mut self.u_next_int,
        );
        if result.status == SolveStatus::FailNonSpd {
            log::warn!(
                "t = {t:e}: PCG reported a non-SPD operator after {} iterations; retrying with CGNR",
                result.iterations
            );
            self.fallback_solves += 1;
            result = self.fallback.solve(
                &mut self.matrix,
                self.precond.as_mut(),
                &self.rhs,
                &mut self.u_next_int,
            );
        }
        if !result.status.is_usable() {
            return Err(PdeError::SolverFailure {
                t,
                status: result.status,
            });
        }
        if result.status == SolveStatus::MaxIters {
            log::debug!("t = {t:e}: iteration cap reached, rel = {:e}", result.rel_residual);
        }

        // 8. totals and state update
        self.total_iterations += result.iterations;
        self.max_abs_residual = self.max_abs_residual.max(result.abs_residual.abs());
        self.max_rel_residual = self.max_rel_residual.max(result.rel_residual.abs());
        self.steps_taken += 1;

        self.grid.inject_interior(&self.u_next_int, &mut self.u_next);
        self.u.copy_from_slice(&self.u_next);

        Ok(result)
    }

    /// Change the step size; the implicit factor follows and is pushed to the matrix and the
    /// preconditioner. With convection the new step must respect the CFL limit.
    pub fn set_dt(&mut self, dt: f64) -> Result<()> {
        if let Some(v) = &self.velocity {
            let limit = cfl_limit(&self.grid, v);
            if dt > limit {
                return Err(PdeError::CflViolation { dt, limit });
            }
        }
        self.settings.dt = dt;
        self.factor = self.settings.scheme.implicit_factor(dt, self.settings.alpha);
        self.matrix.update_factor(self.factor);
        self.precond.update_factor(self.factor);
        Ok(())
    }

    /// Copy the full current state into `dst`.
    pub fn copy_state(&self, dst: &mut [f64]) {
        dst.copy_from_slice(&self.u);
    }

    /// Roll the full state back to `src`.
    pub fn restore_state(&mut self, src: &[f64]) {
        self.u.copy_from_slice(src);
        self.u_next.copy_from_slice(src);
    }

    /// Set the state to the exact solution at time `t`.
    pub fn init_exact(&mut self, t: f64, provider: &dyn ForcingProvider) {
        provider.evaluate_exact(&self.grid, t, &mut self.u);
        self.u_next.copy_from_slice(&self.u);
    }

    /// Full-grid state.
    pub fn state(&self) -> &[f64] {
        &self.u
    }

    pub fn grid(&self) -> &Grid2D {
        &self.grid
    }

    pub fn settings(&self) -> &StepperSettings {
        &self.settings
    }

    pub fn dt(&self) -> f64 {
        self.settings.dt
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Largest step `set_dt` accepts, or `None` without convection.
    pub fn cfl_limit(&self) -> Option<f64> {
        self.velocity.as_ref().map(|v| cfl_limit(&self.grid, v))
    }

    pub fn preconditioner_name(&self) -> &'static str {
        self.precond.name()
    }

    pub fn total_iterations(&self) -> usize {
        self.total_iterations
    }

    pub fn max_abs_residual(&self) -> f64 {
        self.max_abs_residual
    }

    pub fn max_rel_residual(&self) -> f64 {
        self.max_rel_residual
    }

    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    /// Solves that went through the CGNR fallback.
    pub fn fallback_solves(&self) -> usize {
        self.fallback_solves
    }
}
