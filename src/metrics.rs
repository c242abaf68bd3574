// src/metrics.rs
//
// Discrete error norms over the interior nodes of a full-grid array, weighted by the cell
// area hx·hy, plus least-squares slopes for convergence studies.

use serde::Serialize;

use crate::grid::Grid2D;

fn interior_sum<F>(grid: &Grid2D, mut term: F) -> f64
where
    F: FnMut(usize) -> f64,
{
    let mut sum = 0.0;
    for j in 1..grid.ny - 1 {
        for i in 1..grid.nx - 1 {
            sum += term(grid.idx(i, j));
        }
    }
    sum
}

/// Area-weighted L2 norm of the interior.
pub fn l2_norm(grid: &Grid2D, u: &[f64]) -> f64 {
    (interior_sum(grid, |g| u[g] * u[g]) * grid.hx * grid.hy).sqrt()
}

pub fn l2_error(grid: &Grid2D, u_num: &[f64], u_exact: &[f64]) -> f64 {
    let sum = interior_sum(grid, |g| {
        let d = u_num[g] - u_exact[g];
        d * d
    });
    (sum * grid.hx * grid.hy).sqrt()
}

pub fn linf_error(grid: &Grid2D, u_num: &[f64], u_exact: &[f64]) -> f64 {
    let mut max = 0.0f64;
    for j in 1..grid.ny - 1 {
        for i in 1..grid.nx - 1 {
            let g = grid.idx(i, j);
            max = max.max((u_num[g] - u_exact[g]).abs());
        }
    }
    max
}

/// L2 error relative to the exact norm; absolute when the exact solution is (numerically) zero.
pub fn relative_l2_error(grid: &Grid2D, u_num: &[f64], u_exact: &[f64]) -> f64 {
    let err = l2_error(grid, u_num, u_exact);
    let norm = l2_norm(grid, u_exact);
    if norm < 1e-15 {
        err
    } else {
        err / norm
    }
}

/// Central-difference gradient of the error, interior nodes only.
pub fn h1_seminorm_error(grid: &Grid2D, u_num: &[f64], u_exact: &[f64]) -> f64 {
    let e = |g: usize| u_num[g] - u_exact[g];
    let (half_ihx, half_ihy) = (0.5 / grid.hx, 0.5 / grid.hy);
    let nx = grid.nx;
    let sum = interior_sum(grid, |g| {
        let dx = (e(g + 1) - e(g - 1)) * half_ihx;
        let dy = (e(g + nx) - e(g - nx)) * half_ihy;
        dx * dx + dy * dy
    });
    (sum * grid.hx * grid.hy).sqrt()
}

/// Least-squares fit of `log2 y = slope·log2 x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Fit a power law through `(xs, ys)`; `None` with fewer than two points, non-positive data
/// or identical abscissae.
pub fn log_log_regression(xs: &[f64], ys: &[f64]) -> Option<Regression> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    if xs.iter().chain(ys).any(|&v| !(v > 0.0) || !v.is_finite()) {
        return None;
    }
    let lx: Vec<f64> = xs.iter().map(|v| v.log2()).collect();
    let ly: Vec<f64> = ys.iter().map(|v| v.log2()).collect();
    let n = lx.len() as f64;
    let mean_x = lx.iter().sum::<f64>() / n;
    let mean_y = ly.iter().sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (x, y) in lx.iter().zip(&ly) {
        sxx += (x - mean_x) * (x - mean_x);
        sxy += (x - mean_x) * (y - mean_y);
        syy += (y - mean_y) * (y - mean_y);
    }
    if sxx == 0.0 {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let r_squared = if syy == 0.0 {
        1.0
    } else {
        (sxy * sxy / (sxx * syy)).min(1.0)
    };
    Some(Regression {
        slope,
        intercept,
        r_squared,
    })
}
