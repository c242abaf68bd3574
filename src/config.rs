// src/config.rs
//
// Run configuration (JSON in, effective JSON out) and the metrics summary written at the end
// of a run.

use serde::{Deserialize, Serialize};
use serde_json;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{PdeError, Result};
use crate::linear::PreconditionerKind;
use crate::mms::TestCase;
use crate::parallel::resolve_threads;
use crate::stencil::KappaAveraging;
use crate::time_stepper::{Scheme, StepperSettings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub nx: usize,
    pub ny: usize,
    pub lx: f64,
    pub ly: f64,
    pub alpha: f64,
    /// Final time.
    #[serde(alias = "T")]
    pub t_final: f64,
    /// Fixed step, or the initial step when `adaptive` is set.
    pub dt: f64,
    pub scheme: Scheme,
    pub max_iters: usize,
    pub tol: f64,
    /// 0 = all available cores.
    pub threads: usize,
    pub out_dir: PathBuf,
    pub test_case: TestCase,
    pub preconditioner: PreconditionerKind,
    pub kappa_averaging: KappaAveraging,
    pub adaptive: bool,
    pub adaptive_tol: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            nx: 65,
            ny: 65,
            lx: 1.0,
            ly: 1.0,
            alpha: 1.0,
            t_final: 0.1,
            dt: 1e-3,
            scheme: Scheme::CrankNicolson,
            max_iters: 1000,
            tol: 1e-8,
            threads: 0,
            out_dir: PathBuf::from("artifacts"),
            test_case: TestCase::Homogeneous,
            preconditioner: PreconditionerKind::Jacobi,
            kappa_averaging: KappaAveraging::Arithmetic,
            adaptive: false,
            adaptive_tol: 1e-3,
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let cfg: Self = serde_json::from_reader(BufReader::new(file))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nx < 3 || self.ny < 3 {
            return Err(PdeError::invalid_config(format!(
                "grid must be at least 3x3 nodes, got {}x{}",
                self.nx, self.ny
            )));
        }
        if !(self.lx > 0.0) || !(self.ly > 0.0) {
            return Err(PdeError::invalid_config("domain lengths lx, ly must be > 0"));
        }
        if !(self.alpha > 0.0) {
            return Err(PdeError::invalid_config("alpha must be > 0"));
        }
        if !(self.t_final > 0.0) {
            return Err(PdeError::invalid_config("t_final must be > 0"));
        }
        if !(self.dt > 0.0) || self.dt > self.t_final {
            return Err(PdeError::invalid_config(format!(
                "dt must satisfy 0 < dt <= t_final, got dt = {}",
                self.dt
            )));
        }
        if self.max_iters == 0 {
            return Err(PdeError::invalid_config("max_iters must be > 0"));
        }
        if !(self.tol > 0.0) || !self.tol.is_finite() {
            return Err(PdeError::invalid_config("tol must be positive and finite"));
        }
        if self.adaptive && !(self.adaptive_tol > 0.0) {
            return Err(PdeError::invalid_config("adaptive_tol must be > 0"));
        }
        Ok(())
    }

    pub fn resolved_threads(&self) -> usize {
        resolve_threads(self.threads)
    }

    pub fn stepper_settings(&self) -> StepperSettings {
        StepperSettings {
            scheme: self.scheme,
            alpha: self.alpha,
            dt: self.dt,
            max_iters: self.max_iters,
            tol: self.tol,
            preconditioner: self.preconditioner,
            kappa_averaging: self.kappa_averaging,
            ..Default::default()
        }
    }

    /// Apply one `key=value` override from the command line.
    pub fn apply_override(&mut self, key: &str, value: &str) -> Result<()> {
        fn num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .parse::<T>()
                .map_err(|_| PdeError::invalid_config(format!("bad value for {key}: '{value}'")))
        }

        match key {
            "nx" => self.nx = num(key, value)?,
            "ny" => self.ny = num(key, value)?,
            "n" => {
                self.nx = num(key, value)?;
                self.ny = self.nx;
            }
            "lx" => self.lx = num(key, value)?,
            "ly" => self.ly = num(key, value)?,
            "alpha" => self.alpha = num(key, value)?,
            "t" | "t_final" => self.t_final = num(key, value)?,
            "dt" => self.dt = num(key, value)?,
            "scheme" => self.scheme = value.parse()?,
            "max_iters" => self.max_iters = num(key, value)?,
            "tol" => self.tol = num(key, value)?,
            "threads" => self.threads = num(key, value)?,
            "out" | "out_dir" => self.out_dir = PathBuf::from(value),
            "case" | "test_case" => self.test_case = value.parse()?,
            "pc" | "preconditioner" => self.preconditioner = value.parse()?,
            "kappa_averaging" => self.kappa_averaging = value.parse()?,
            "adaptive" => self.adaptive = num(key, value)?,
            "adaptive_tol" => self.adaptive_tol = num(key, value)?,
            _ => {
                return Err(PdeError::invalid_config(format!("unknown key '{key}'")));
            }
        }
        Ok(())
    }

    /// Write `effective_config.json` (with resolved thread count) into `out_dir`.
    pub fn write_to_dir(&self, out_dir: &Path) -> Result<()> {
        let effective = Self {
            threads: self.resolved_threads(),
            ..self.clone()
        };
        let file = File::create(out_dir.join("effective_config.json"))?;
        serde_json::to_writer_pretty(file, &effective)?;
        Ok(())
    }
}

/// End-of-run metrics.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub threads_requested: usize,
    pub threads_effective: usize,
    pub preconditioner: String,
    pub wall_time_seconds: f64,
    pub t_final: f64,
    pub steps: usize,
    pub rejected_steps: usize,
    pub fallback_solves: usize,
    pub total_pcg_iters: usize,
    pub max_abs_residual: f64,
    pub max_rel_residual: f64,
    pub error_l2: f64,
    pub error_linf: f64,
    pub error_rel_l2: f64,
    pub error_h1: f64,
}

impl RunSummary {
    pub fn write_to_dir(&self, out_dir: &Path) -> Result<()> {
        let file = File::create(out_dir.join("metrics.json"))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RunConfig::default().validate().unwrap();
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad = [
            RunConfig { nx: 2, ..Default::default() },
            RunConfig { ly: 0.0, ..Default::default() },
            RunConfig { alpha: -1.0, ..Default::default() },
            RunConfig { dt: 1.0, t_final: 0.5, ..Default::default() },
            RunConfig { max_iters: 0, ..Default::default() },
            RunConfig { tol: f64::NAN, ..Default::default() },
            RunConfig { adaptive: true, adaptive_tol: 0.0, ..Default::default() },
        ];
        for cfg in bad {
            let err = cfg.validate().unwrap_err();
            assert!(matches!(err, PdeError::InvalidConfig(_)), "{err}");
        }
    }

    #[test]
    fn json_uses_upper_case_names() {
        let json = r#"{
            "nx": 33, "ny": 17, "T": 0.5, "dt": 0.01,
            "scheme": "BE", "test_case": "NON_TRIVIAL",
            "preconditioner": "MG", "kappa_averaging": "HARMONIC"
        }"#;
        let cfg: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!((cfg.nx, cfg.ny), (33, 17));
        assert_eq!(cfg.t_final, 0.5);
        assert_eq!(cfg.scheme, Scheme::BackwardEuler);
        assert_eq!(cfg.test_case, TestCase::NonZeroDirichlet);
        assert_eq!(cfg.preconditioner, PreconditionerKind::Multigrid);
        assert_eq!(cfg.kappa_averaging, KappaAveraging::Harmonic);
        assert_eq!(cfg.alpha, 1.0);

        let out = serde_json::to_string(&cfg).unwrap();
        assert!(out.contains("\"scheme\":\"BE\""));
        assert!(out.contains("\"preconditioner\":\"MG\""));
    }

    #[test]
    fn overrides() {
        let mut cfg = RunConfig::default();
        cfg.apply_override("n", "17").unwrap();
        cfg.apply_override("scheme", "imex").unwrap();
        cfg.apply_override("pc", "ssor").unwrap();
        assert_eq!((cfg.nx, cfg.ny), (17, 17));
        assert_eq!(cfg.scheme, Scheme::Imex);
        assert_eq!(cfg.preconditioner, PreconditionerKind::Ssor);
        assert!(cfg.apply_override("nx", "many").is_err());
        assert!(cfg.apply_override("colour", "red").is_err());

        cfg.apply_override("kappa_averaging", "harm").unwrap();
        cfg.apply_override("case", "convection").unwrap();
        assert_eq!(cfg.kappa_averaging, KappaAveraging::Harmonic);
        assert_eq!(cfg.test_case, TestCase::Convection);
        assert!(matches!(
            cfg.apply_override("scheme", "rk4"),
            Err(PdeError::InvalidConfig(msg)) if msg.contains("unknown scheme")
        ));
        assert_eq!(cfg.scheme, Scheme::Imex);
    }

    #[test]
    fn writes_effective_config() {
        let dir = std::env::temp_dir().join(format!("pde_sim_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cfg = RunConfig { threads: 0, ..Default::default() };
        cfg.write_to_dir(&dir).unwrap();
        let back = RunConfig::load(&dir.join("effective_config.json")).unwrap();
        assert!(back.threads >= 1);
        assert_eq!(back.nx, cfg.nx);
        std::fs::remove_dir_all(&dir).ok();
    }
}
