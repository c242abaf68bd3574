// src/mms.rs
//
// Manufactured solutions for verification runs.
//
// Each case fixes an exact u(x, y, t) and derives the forcing f so that
//     u_t = α ∇·(κ∇u) - b·∇u + f
// holds exactly. Grid evaluation is parallel over rows.

use std::f64::consts::PI;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PdeError, Result};
use crate::grid::Grid2D;
use crate::stencil::ConvectionField;
use crate::time_stepper::ForcingProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestCase {
    /// `u = sin πx sin πy e^{-t}`, zero on the unit square boundary.
    #[default]
    Homogeneous,
    /// `u = (1+x)(1+y) e^{-t}`, harmonic in space.
    #[serde(alias = "NON_TRIVIAL")]
    NonZeroDirichlet,
    /// Homogeneous solution under `κ = 1 + 0.1 sin 2πx sin 2πy`.
    VariableKappa,
    /// Homogeneous solution advected by `b = (1, 1)`.
    Convection,
    /// Gaussian hump centred at (½, ½); exact only at t = 0.
    RotatingHump,
}

impl std::str::FromStr for TestCase {
    type Err = PdeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HOMOGENEOUS" => Ok(Self::Homogeneous),
            "NON_ZERO_DIRICHLET" | "NON_TRIVIAL" => Ok(Self::NonZeroDirichlet),
            "VARIABLE_KAPPA" => Ok(Self::VariableKappa),
            "CONVECTION" => Ok(Self::Convection),
            "ROTATING_HUMP" => Ok(Self::RotatingHump),
            _ => Err(PdeError::invalid_config(format!("unknown test case: '{s}'"))),
        }
    }
}

impl TestCase {
    pub fn has_variable_kappa(self) -> bool {
        self == Self::VariableKappa
    }

    /// Velocity the forcing was derived for, if any.
    pub fn velocity(self) -> Option<ConstantConvection> {
        match self {
            Self::Convection => Some(ConstantConvection::new(1.0, 1.0)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ManufacturedSolution {
    pub case: TestCase,
    pub alpha: f64,
}

impl ManufacturedSolution {
    pub fn new(case: TestCase, alpha: f64) -> Self {
        Self { case, alpha }
    }

    pub fn kappa(&self, x: f64, y: f64) -> f64 {
        match self.case {
            TestCase::VariableKappa => 1.0 + 0.1 * (2.0 * PI * x).sin() * (2.0 * PI * y).sin(),
            _ => 1.0,
        }
    }

    pub fn exact(&self, x: f64, y: f64, t: f64) -> f64 {
        let decay = (-t).exp();
        match self.case {
            TestCase::Homogeneous | TestCase::VariableKappa | TestCase::Convection => {
                (PI * x).sin() * (PI * y).sin() * decay
            }
            TestCase::NonZeroDirichlet => (1.0 + x) * (1.0 + y) * decay,
            TestCase::RotatingHump => {
                let r2 = (x - 0.5).powi(2) + (y - 0.5).powi(2);
                (-100.0 * r2).exp() * decay
            }
        }
    }

    pub fn forcing(&self, x: f64, y: f64, t: f64) -> f64 {
        let alpha = self.alpha;
        let u = self.exact(x, y, t);
        match self.case {
            // u_t = -u, Δu = -2π²u
            TestCase::Homogeneous | TestCase::RotatingHump => (2.0 * alpha * PI * PI - 1.0) * u,
            TestCase::NonZeroDirichlet => -u,
            TestCase::VariableKappa => {
                let (ux, uy) = self.sine_gradient(x, y, t);
                let k = self.kappa(x, y);
                let kx = 0.2 * PI * (2.0 * PI * x).cos() * (2.0 * PI * y).sin();
                let ky = 0.2 * PI * (2.0 * PI * x).sin() * (2.0 * PI * y).cos();
                let lap = -2.0 * PI * PI * u;
                -u - alpha * (k * lap + kx * ux + ky * uy)
            }
            TestCase::Convection => {
                let (ux, uy) = self.sine_gradient(x, y, t);
                -u + 2.0 * alpha * PI * PI * u + ux + uy
            }
        }
    }

    fn sine_gradient(&self, x: f64, y: f64, t: f64) -> (f64, f64) {
        let decay = (-t).exp();
        (
            PI * (PI * x).cos() * (PI * y).sin() * decay,
            PI * (PI * x).sin() * (PI * y).cos() * decay,
        )
    }

    fn fill_grid<F>(grid: &Grid2D, out: &mut [f64], f: F)
    where
        F: Fn(f64, f64) -> f64 + Sync,
    {
        debug_assert_eq!(out.len(), grid.size());
        out.par_chunks_mut(grid.nx)
            .enumerate()
            .for_each(|(j, row)| {
                let y = grid.y[j];
                for (i, v) in row.iter_mut().enumerate() {
                    *v = f(grid.x[i], y);
                }
            });
    }
}

impl ForcingProvider for ManufacturedSolution {
    fn evaluate_forcing(&self, grid: &Grid2D, t: f64, f_full: &mut [f64]) {
        Self::fill_grid(grid, f_full, |x, y| self.forcing(x, y, t));
    }

    fn evaluate_exact(&self, grid: &Grid2D, t: f64, u_full: &mut [f64]) {
        Self::fill_grid(grid, u_full, |x, y| self.exact(x, y, t));
    }

    fn evaluate_kappa(&self, grid: &Grid2D, k_full: &mut [f64]) {
        Self::fill_grid(grid, k_full, |x, y| self.kappa(x, y));
    }
}

/// Spatially uniform velocity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantConvection {
    pub bx: f64,
    pub by: f64,
}

impl ConstantConvection {
    pub fn new(bx: f64, by: f64) -> Self {
        Self { bx, by }
    }
}

impl ConvectionField for ConstantConvection {
    fn bx(&self, _x: f64, _y: f64) -> f64 {
        self.bx
    }

    fn by(&self, _x: f64, _y: f64) -> f64 {
        self.by
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Central-difference check of `f = u_t - α∇·(κ∇u) + b·∇u` at one point.
    fn residual_at(m: &ManufacturedSolution, x: f64, y: f64, t: f64) -> f64 {
        let h = 1e-4;
        let u_t = (m.exact(x, y, t + h) - m.exact(x, y, t - h)) / (2.0 * h);
        let flux_x = |xa: f64, xb: f64| m.kappa(0.5 * (xa + xb), y) * (m.exact(xb, y, t) - m.exact(xa, y, t)) / h;
        let flux_y = |ya: f64, yb: f64| m.kappa(x, 0.5 * (ya + yb)) * (m.exact(x, yb, t) - m.exact(x, ya, t)) / h;
        let div = (flux_x(x, x + h) - flux_x(x - h, x)) / h + (flux_y(y, y + h) - flux_y(y - h, y)) / h;
        let (bx, by) = m.case.velocity().map_or((0.0, 0.0), |b| (b.bx, b.by));
        let ux = (m.exact(x + h, y, t) - m.exact(x - h, y, t)) / (2.0 * h);
        let uy = (m.exact(x, y + h, t) - m.exact(x, y - h, t)) / (2.0 * h);
        u_t - m.alpha * div + bx * ux + by * uy - m.forcing(x, y, t)
    }

    #[test]
    fn forcing_satisfies_the_pde() {
        for case in [
            TestCase::Homogeneous,
            TestCase::NonZeroDirichlet,
            TestCase::VariableKappa,
            TestCase::Convection,
        ] {
            let m = ManufacturedSolution::new(case, 0.7);
            for &(x, y, t) in &[(0.3, 0.6, 0.1), (0.71, 0.22, 0.5)] {
                let r = residual_at(&m, x, y, t);
                assert!(r.abs() < 1e-4, "{case:?} residual {r} at ({x}, {y}, {t})");
            }
        }
    }

    #[test]
    fn homogeneous_vanishes_on_boundary() {
        let m = ManufacturedSolution::new(TestCase::Homogeneous, 1.0);
        let g = Grid2D::new(9, 9, 1.0, 1.0);
        let mut u = vec![1.0; g.size()];
        m.evaluate_exact(&g, 0.3, &mut u);
        for i in 0..g.nx {
            assert!(u[g.idx(i, 0)].abs() < 1e-15);
            assert!(u[g.idx(i, g.ny - 1)].abs() < 1e-15);
        }
        assert_relative_eq!(u[g.idx(4, 4)], (-0.3f64).exp(), epsilon = 1e-14);
    }

    #[test]
    fn case_names_parse() {
        assert_eq!("non_trivial".parse::<TestCase>().unwrap(), TestCase::NonZeroDirichlet);
        assert_eq!("VARIABLE_KAPPA".parse::<TestCase>().unwrap(), TestCase::VariableKappa);
        assert!(matches!("sphere".parse::<TestCase>(), Err(PdeError::InvalidConfig(_))));
        let parsed: TestCase = serde_json::from_str("\"NON_TRIVIAL\"").unwrap();
        assert_eq!(parsed, TestCase::NonZeroDirichlet);
        assert_eq!(serde_json::to_string(&TestCase::RotatingHump).unwrap(), "\"ROTATING_HUMP\"");
    }

    #[test]
    fn kappa_is_unit_except_variable_case() {
        let g = Grid2D::new(5, 5, 1.0, 1.0);
        let mut k = vec![0.0; g.size()];
        ManufacturedSolution::new(TestCase::Convection, 1.0).evaluate_kappa(&g, &mut k);
        assert!(k.iter().all(|&v| v == 1.0));
        ManufacturedSolution::new(TestCase::VariableKappa, 1.0).evaluate_kappa(&g, &mut k);
        assert!(k.iter().all(|&v| (v - 1.0).abs() <= 0.1 + 1e-12));
        assert!(k.iter().any(|&v| v != 1.0));
    }
}
