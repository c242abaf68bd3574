// src/vector_ops.rs
//
// Dense vector kernels. The plain functions run in the caller; the `par_*` variants go
// through the executor and fall back to the plain path for short vectors.

use crate::parallel::ParallelExecutor;

// ---------------------------
// Sequential kernels
// ---------------------------

#[inline]
pub fn fill(x: &mut [f64], value: f64) {
    x.fill(value);
}

#[inline]
pub fn copy(src: &[f64], dst: &mut [f64]) {
    debug_assert_eq!(src.len(), dst.len());
    dst.copy_from_slice(src);
}

/// y += a·x
#[inline]
pub fn axpy(a: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += a * xi;
    }
}

/// y = a·x + b·y
#[inline]
pub fn axpby(a: f64, x: &[f64], b: f64, y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi = a * xi + b * *yi;
    }
}

/// res = x + a·y
#[inline]
pub fn add_scaled(x: &[f64], a: f64, y: &[f64], res: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    debug_assert_eq!(x.len(), res.len());
    for ((ri, &xi), &yi) in res.iter_mut().zip(x).zip(y) {
        *ri = xi + a * yi;
    }
}

#[inline]
pub fn dot(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

#[inline]
pub fn norm_l2(x: &[f64]) -> f64 {
    dot(x, x).sqrt()
}

#[inline]
pub fn norm_linf(x: &[f64]) -> f64 {
    x.iter().fold(0.0f64, |m, v| m.max(v.abs()))
}

// ---------------------------
// Executor-dispatched kernels
// ---------------------------

pub fn par_copy(exec: &ParallelExecutor, src: &[f64], dst: &mut [f64]) {
    debug_assert_eq!(src.len(), dst.len());
    exec.execute_split_mut(dst, 1, &|start, d: &mut [f64]| {
        d.copy_from_slice(&src[start..start + d.len()]);
    });
}

/// y += a·x
pub fn par_axpy(exec: &ParallelExecutor, a: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    exec.execute_split_mut(y, 1, &|start, ys: &mut [f64]| {
        axpy(a, &x[start..start + ys.len()], ys);
    });
}

/// y = a·x + b·y
pub fn par_axpby(exec: &ParallelExecutor, a: f64, x: &[f64], b: f64, y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    exec.execute_split_mut(y, 1, &|start, ys: &mut [f64]| {
        axpby(a, &x[start..start + ys.len()], b, ys);
    });
}

/// res = x + a·y
pub fn par_add_scaled(exec: &ParallelExecutor, x: &[f64], a: f64, y: &[f64], res: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    exec.execute_split_mut(res, 1, &|start, rs: &mut [f64]| {
        let end = start + rs.len();
        add_scaled(&x[start..end], a, &y[start..end], rs);
    });
}

pub fn par_dot(exec: &ParallelExecutor, x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    exec.reduce_contiguous(x.len(), &|a, b| dot(&x[a..b], &y[a..b]))
}

pub fn par_norm_l2(exec: &ParallelExecutor, x: &[f64]) -> f64 {
    par_dot(exec, x, x).sqrt()
}
