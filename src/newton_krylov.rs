// src/newton_krylov.rs
//
// Jacobian-free Newton-Krylov for steady residual equations F(u) = 0.
//
// The Jacobian is never formed: its action is the one-sided difference
//     J v ≈ (F(u + ε v) - F(u)) / ε,   ε = sqrt(eps_mach) (1 + |u|) / |v|
// and each Newton correction comes from the inner PCG with an identity preconditioner,
// followed by Armijo backtracking on |F|.

use std::sync::Arc;

use crate::linear::{IdentityPreconditioner, LinearSolver, MatrixOperator, Pcg};
use crate::parallel::ParallelExecutor;
use crate::vector_ops::{par_add_scaled, par_axpy, par_norm_l2};

const ARMIJO_C: f64 = 1e-4;
const BACKTRACK: f64 = 0.5;
const LINE_SEARCH_TRIALS: usize = 10;

/// Finite-difference Jacobian action around a fixed `u`.
struct JacobianFree<'a, F> {
    exec: &'a ParallelExecutor,
    residual: &'a mut F,
    u: &'a [f64],
    u_norm: f64,
    f_u: &'a [f64],
    u_pert: &'a mut [f64],
    f_pert: &'a mut [f64],
}

impl<F> MatrixOperator for JacobianFree<'_, F>
where
    F: FnMut(&[f64], &mut [f64]),
{
    fn multiply(&mut self, v: &[f64], out: &mut [f64]) {
        let v_norm = par_norm_l2(self.exec, v);
        if v_norm == 0.0 {
            out.fill(0.0);
            return;
        }
        let eps = f64::EPSILON.sqrt() * (1.0 + self.u_norm) / v_norm;

        par_add_scaled(self.exec, self.u, eps, v, &mut *self.u_pert);
        (self.residual)(&*self.u_pert, &mut *self.f_pert);

        let inv_eps = 1.0 / eps;
        let (f_pert, f_u) = (&*self.f_pert, self.f_u);
        self.exec.execute_split_mut(out, 1, &|start, os: &mut [f64]| {
            for (k, o) in os.iter_mut().enumerate() {
                *o = (f_pert[start + k] - f_u[start + k]) * inv_eps;
            }
        });
    }
}

pub struct NewtonKrylov {
    exec: Arc<ParallelExecutor>,
    max_newton: usize,
    newton_tol: f64,
    krylov: Pcg,
    f_u: Vec<f64>,
    delta: Vec<f64>,
    rhs: Vec<f64>,
    u_pert: Vec<f64>,
    f_pert: Vec<f64>,
    u_cand: Vec<f64>,
    f_cand: Vec<f64>,
    last_residual: f64,
    krylov_iterations: usize,
}

impl NewtonKrylov {
    /// `n` is the unknown count (interior size for grid problems).
    pub fn new(
        exec: Arc<ParallelExecutor>,
        n: usize,
        max_newton: usize,
        newton_tol: f64,
        max_krylov: usize,
        krylov_tol: f64,
    ) -> Self {
        let krylov = Pcg::new(Arc::clone(&exec), n, max_krylov, krylov_tol);
        Self {
            exec,
            max_newton,
            newton_tol,
            krylov,
            f_u: vec![0.0; n],
            delta: vec![0.0; n],
            rhs: vec![0.0; n],
            u_pert: vec![0.0; n],
            f_pert: vec![0.0; n],
            u_cand: vec![0.0; n],
            f_cand: vec![0.0; n],
            last_residual: f64::NAN,
            krylov_iterations: 0,
        }
    }

    /// `|F(u)|` at the last evaluation of the most recent solve.
    pub fn last_residual_norm(&self) -> f64 {
        self.last_residual
    }

    /// Inner PCG iterations summed over the most recent solve.
    pub fn krylov_iterations(&self) -> usize {
        self.krylov_iterations
    }

    /// Drive `residual(u, F_u)` to zero starting from `u`; returns the Newton iterations used
    /// (`max_newton` if the tolerance was not reached).
    ///
    /// When backtracking finds no Armijo step the full Newton step is taken anyway, which
    /// may increase |F|.
    pub fn solve<F>(&mut self, mut residual: F, u: &mut [f64]) -> usize
    where
        F: FnMut(&[f64], &mut [f64]),
    {
        assert_eq!(u.len(), self.f_u.len(), "unknown count does not match solver size");
        self.krylov_iterations = 0;
        let exec = Arc::clone(&self.exec);
        let exec = &*exec;

        for iter in 0..self.max_newton {
            residual(&*u, &mut self.f_u);
            let f_norm = par_norm_l2(exec, &self.f_u);
            self.last_residual = f_norm;
            log::debug!("newton iter {iter}: |F(u)| = {f_norm:e}");
            if f_norm < self.newton_tol {
                log::info!("jfnk converged in {iter} iterations, |F(u)| = {f_norm:e}");
                return iter;
            }

            for (r, f) in self.rhs.iter_mut().zip(&self.f_u) {
                *r = -f;
            }
            self.delta.fill(0.0);

            let inner = {
                let mut jac = JacobianFree {
                    exec,
                    residual: &mut residual,
                    u: &*u,
                    u_norm: par_norm_l2(exec, &*u),
                    f_u: &self.f_u,
                    u_pert: &mut self.u_pert,
                    f_pert: &mut self.f_pert,
                };
                self.krylov
                    .solve(&mut jac, &mut IdentityPreconditioner, &self.rhs, &mut self.delta)
            };
            self.krylov_iterations += inner.iterations;
            log::debug!(
                "  inner pcg: {} iterations, {}, rel = {:e}",
                inner.iterations,
                inner.status,
                inner.rel_residual
            );

            let mut alpha = 1.0;
            let mut accepted = false;
            for _ in 0..LINE_SEARCH_TRIALS {
                par_add_scaled(exec, &*u, alpha, &self.delta, &mut self.u_cand);
                residual(&self.u_cand, &mut self.f_cand);
                let cand_norm = par_norm_l2(exec, &self.f_cand);
                if cand_norm <= (1.0 - alpha * ARMIJO_C) * f_norm {
                    u.copy_from_slice(&self.u_cand);
                    accepted = true;
                    log::debug!("  line search accepted alpha = {alpha}");
                    break;
                }
                alpha *= BACKTRACK;
            }

            if !accepted {
                log::warn!("line search found no sufficient decrease; taking the full Newton step");
                par_axpy(exec, 1.0, &self.delta, u);
            }
        }

        log::warn!(
            "jfnk hit max iterations ({}) without convergence, |F(u)| = {:e}",
            self.max_newton,
            self.last_residual
        );
        self.max_newton
    }
}
