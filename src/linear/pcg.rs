// src/linear/pcg.rs

use std::sync::Arc;

use crate::linear::{LinearSolver, MatrixOperator, Preconditioner, SolveResult, SolveStatus};
use crate::parallel::ParallelExecutor;
use crate::vector_ops::{par_add_scaled, par_axpby, par_axpy, par_dot, par_norm_l2};

/// Residual is recomputed from `b - A x` every this many iterations.
const RESIDUAL_REFRESH: usize = 50;

/// Preconditioned conjugate gradients with preallocated work vectors.
pub struct Pcg {
    exec: Arc<ParallelExecutor>,
    max_iters: usize,
    tol: f64,
    r: Vec<f64>,
    z: Vec<f64>,
    p: Vec<f64>,
    ap: Vec<f64>,
}

impl Pcg {
    pub fn new(exec: Arc<ParallelExecutor>, n: usize, max_iters: usize, tol: f64) -> Self {
        Self {
            exec,
            max_iters,
            tol,
            r: vec![0.0; n],
            z: vec![0.0; n],
            p: vec![0.0; n],
            ap: vec![0.0; n],
        }
    }

    pub fn max_iters(&self) -> usize {
        self.max_iters
    }

    pub fn tol(&self) -> f64 {
        self.tol
    }

    fn ensure_len(&mut self, n: usize) {
        if self.r.len() != n {
            for v in [&mut self.r, &mut self.z, &mut self.p, &mut self.ap] {
                v.resize(n, 0.0);
            }
        }
    }
}

impl LinearSolver for Pcg {
    fn solve(
        &mut self,
        a: &mut dyn MatrixOperator,
        m: &mut dyn Preconditioner,
        b: &[f64],
        x: &mut [f64],
    ) -> SolveResult {
        debug_assert_eq!(b.len(), x.len());
        self.ensure_len(b.len());
        let exec = &*self.exec;

        let norm_b = par_norm_l2(exec, b);
        if !norm_b.is_finite() {
            log::debug!("pcg: non-finite right-hand side");
            return SolveResult::numeric_failure(0);
        }
        let divisor = if norm_b == 0.0 { 1.0 } else { norm_b };

        // r = b - A x
        a.multiply(x, &mut self.ap);
        par_add_scaled(exec, b, -1.0, &self.ap, &mut self.r);
        let mut r_norm = par_norm_l2(exec, &self.r);
        if !r_norm.is_finite() {
            return SolveResult::numeric_failure(0);
        }
        if r_norm / divisor <= self.tol {
            return SolveResult::new(SolveStatus::Converged, 0, r_norm, r_norm / divisor);
        }

        m.apply(&self.r, &mut self.z);
        self.p.copy_from_slice(&self.z);
        let mut rz = par_dot(exec, &self.r, &self.z);

        for k in 1..=self.max_iters {
            a.multiply(&self.p, &mut self.ap);
            let p_ap = par_dot(exec, &self.p, &self.ap);
            if p_ap <= 0.0 {
                log::debug!("pcg: non-positive curvature {p_ap:e} at iteration {k} ({})", m.name());
                return SolveResult::new(SolveStatus::FailNonSpd, k, r_norm, r_norm / divisor);
            }
            let alpha = rz / p_ap;
            if !alpha.is_finite() {
                return SolveResult::numeric_failure(k);
            }

            par_axpy(exec, alpha, &self.p, x);
            if k % RESIDUAL_REFRESH == 0 {
                a.multiply(x, &mut self.ap);
                par_add_scaled(exec, b, -1.0, &self.ap, &mut self.r);
            } else {
                par_axpy(exec, -alpha, &self.ap, &mut self.r);
            }

            r_norm = par_norm_l2(exec, &self.r);
            if !r_norm.is_finite() {
                return SolveResult::numeric_failure(k);
            }
            let rel = r_norm / divisor;
            log::trace!("pcg iter {k}: |r| = {r_norm:e}, rel = {rel:e}");
            if rel <= self.tol {
                return SolveResult::new(SolveStatus::Converged, k, r_norm, rel);
            }

            m.apply(&self.r, &mut self.z);
            let rz_new = par_dot(exec, &self.r, &self.z);
            let beta = rz_new / rz;
            rz = rz_new;
            // p = z + beta·p
            par_axpby(exec, 1.0, &self.z, beta, &mut self.p);
        }

        SolveResult::new(SolveStatus::MaxIters, self.max_iters, r_norm, r_norm / divisor)
    }
}
