// src/linear/cgnr.rs

use std::sync::Arc;

use crate::linear::{LinearSolver, MatrixOperator, Preconditioner, SolveResult, SolveStatus};
use crate::parallel::ParallelExecutor;
use crate::vector_ops::{par_add_scaled, par_axpby, par_axpy, par_dot, par_norm_l2};

/// Conjugate gradients on the normal equations `AᵀA x = Aᵀb` for symmetric `A`.
///
/// Used as the recovery path when PCG hits an indefinite operator. Two operator products per
/// iteration; the preconditioner argument is ignored.
pub struct Cgnr {
    exec: Arc<ParallelExecutor>,
    max_iters: usize,
    tol: f64,
    r: Vec<f64>,
    z: Vec<f64>,
    p: Vec<f64>,
    w: Vec<f64>,
}

impl Cgnr {
    pub fn new(exec: Arc<ParallelExecutor>, n: usize, max_iters: usize, tol: f64) -> Self {
        Self {
            exec,
            max_iters,
            tol,
            r: vec![0.0; n],
            z: vec![0.0; n],
            p: vec![0.0; n],
            w: vec![0.0; n],
        }
    }

    fn ensure_len(&mut self, n: usize) {
        if self.r.len() != n {
            for v in [&mut self.r, &mut self.z, &mut self.p, &mut self.w] {
                v.resize(n, 0.0);
            }
        }
    }
}

impl LinearSolver for Cgnr {
    fn solve(
        &mut self,
        a: &mut dyn MatrixOperator,
        _m: &mut dyn Preconditioner,
        b: &[f64],
        x: &mut [f64],
    ) -> SolveResult {
        debug_assert_eq!(b.len(), x.len());
        self.ensure_len(b.len());
        let exec = &*self.exec;

        let norm_b = par_norm_l2(exec, b);
        if !norm_b.is_finite() {
            return SolveResult::numeric_failure(0);
        }
        let divisor = if norm_b == 0.0 { 1.0 } else { norm_b };

        a.multiply(x, &mut self.w);
        par_add_scaled(exec, b, -1.0, &self.w, &mut self.r);
        let mut r_norm = par_norm_l2(exec, &self.r);
        if !r_norm.is_finite() {
            return SolveResult::numeric_failure(0);
        }
        if r_norm / divisor <= self.tol {
            return SolveResult::new(SolveStatus::Converged, 0, r_norm, r_norm / divisor);
        }

        // z = Aᵀ r = A r
        a.multiply(&self.r, &mut self.z);
        self.p.copy_from_slice(&self.z);
        let mut zz = par_dot(exec, &self.z, &self.z);

        for k in 1..=self.max_iters {
            a.multiply(&self.p, &mut self.w);
            let ww = par_dot(exec, &self.w, &self.w);
            if ww <= 0.0 || !ww.is_finite() {
                return SolveResult::numeric_failure(k);
            }
            let alpha = zz / ww;

            par_axpy(exec, alpha, &self.p, x);
            par_axpy(exec, -alpha, &self.w, &mut self.r);

            r_norm = par_norm_l2(exec, &self.r);
            if !r_norm.is_finite() {
                return SolveResult::numeric_failure(k);
            }
            let rel = r_norm / divisor;
            log::trace!("cgnr iter {k}: rel = {rel:e}");
            if rel <= self.tol {
                return SolveResult::new(SolveStatus::Converged, k, r_norm, rel);
            }

            a.multiply(&self.r, &mut self.z);
            let zz_new = par_dot(exec, &self.z, &self.z);
            let beta = zz_new / zz;
            zz = zz_new;
            par_axpby(exec, 1.0, &self.z, beta, &mut self.p);
        }

        SolveResult::new(SolveStatus::MaxIters, self.max_iters, r_norm, r_norm / divisor)
    }
}
