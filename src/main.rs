// src/main.rs
//
// Run driver: verifies the solver against a manufactured solution.
//
// The configuration comes from an optional JSON file, then `key=value` overrides are applied
// on top. Outputs land in `out_dir` (default `artifacts/`).
//
// Examples:
//
//   cargo run --release -- n=129 dt=1e-3 t=0.1
//       -> Crank-Nicolson on the homogeneous case, Jacobi-preconditioned CG.
//
//   cargo run --release -- config=runs/kappa.json pc=mg kappa_averaging=harmonic
//       -> variable-diffusivity case from a config file, multigrid preconditioner.
//
//   cargo run --release -- case=convection scheme=imex n=65 dt=5e-3 adaptive adaptive_tol=1e-5
//       -> explicit convection with step-doubling control, logging every trial.
//
// Typical outputs:
//   artifacts/
//     ├── effective_config.json
//     ├── metrics.json
//     └── adaptive_log.csv        (adaptive runs only)

use std::env;
use std::fs::{self, create_dir_all};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use pde_sim::adaptive::StepDoubling;
use pde_sim::boundary::DirichletBoundary;
use pde_sim::config::{RunConfig, RunSummary};
use pde_sim::grid::Grid2D;
use pde_sim::logging::init_logging;
use pde_sim::metrics::{h1_seminorm_error, l2_error, linf_error, relative_l2_error};
use pde_sim::mms::ManufacturedSolution;
use pde_sim::parallel::ParallelExecutor;
use pde_sim::stencil::ConvectionField;
use pde_sim::time_stepper::{ForcingProvider, TimeStepper};
use pde_sim::{PdeError, Result};

fn print_usage() {
    eprintln!(
        r#"Usage:
  pde-sim [config=PATH.json] [adaptive] [log=error|warn|info|debug|trace]
          [n=N] [nx=N] [ny=N] [lx=VAL] [ly=VAL] [alpha=VAL] [t=VAL] [dt=VAL]
          [scheme=cn|be|imex] [case=homogeneous|non_zero_dirichlet|variable_kappa|convection|rotating_hump]
          [pc=jacobi|ssor|mg] [kappa_averaging=arithmetic|harmonic]
          [max_iters=N] [tol=VAL] [threads=N] [adaptive_tol=VAL] [out=DIR]

Notes:
  - Overrides are applied after the config file, in command-line order.
  - threads=0 uses every available core.
  - The boundary is Dirichlet data taken from the exact solution.
"#
    );
}

struct CliArgs {
    config_path: Option<PathBuf>,
    log_level: Option<String>,
    adaptive: bool,
    overrides: Vec<(String, String)>,
}

fn parse_args() -> Option<CliArgs> {
    let mut args = CliArgs {
        config_path: None,
        log_level: None,
        adaptive: false,
        overrides: Vec::new(),
    };

    for arg in env::args().skip(1) {
        if arg == "-h" || arg == "--help" || arg == "help" {
            return None;
        }
        if arg == "adaptive" {
            args.adaptive = true;
            continue;
        }
        if let Some(v) = arg.strip_prefix("config=") {
            args.config_path = Some(PathBuf::from(v));
            continue;
        }
        if let Some(v) = arg.strip_prefix("log=") {
            args.log_level = Some(v.to_string());
            continue;
        }
        match arg.split_once('=') {
            Some((k, v)) => args.overrides.push((k.trim().to_string(), v.trim().to_string())),
            None => eprintln!("Warning: ignoring unknown argument '{arg}'"),
        }
    }
    Some(args)
}

fn run(args: CliArgs) -> Result<()> {
    let mut cfg = match &args.config_path {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    for (k, v) in &args.overrides {
        cfg.apply_override(k, v)?;
    }
    if args.adaptive {
        cfg.adaptive = true;
    }
    cfg.validate()?;

    let threads = cfg.resolved_threads();
    let available = pde_sim::parallel::resolve_threads(0);
    if threads > available {
        log::warn!("{threads} threads requested but only {available} cores available");
    }
    log::info!("parallel executor on {threads} threads");
    let exec = Arc::new(ParallelExecutor::new(threads));

    create_dir_all(&cfg.out_dir)?;
    cfg.write_to_dir(&cfg.out_dir)?;

    let grid = Grid2D::new(cfg.nx, cfg.ny, cfg.lx, cfg.ly);
    let mms = ManufacturedSolution::new(cfg.test_case, cfg.alpha);

    let kappa = if cfg.test_case.has_variable_kappa() {
        let mut k = vec![0.0; grid.size()];
        mms.evaluate_kappa(&grid, &mut k);
        Some(k)
    } else {
        None
    };
    let velocity = cfg.test_case.velocity();
    let boundary = DirichletBoundary::new(move |x, y, t| mms.exact(x, y, t));

    let mut stepper = TimeStepper::new(
        Arc::clone(&exec),
        grid.clone(),
        cfg.stepper_settings(),
        Box::new(boundary),
        kappa.as_deref(),
        velocity.as_ref().map(|v| v as &dyn ConvectionField),
    )?;
    stepper.init_exact(0.0, &mms);

    log::info!(
        "running {:?} on {}x{} grid to t = {}, output in {}",
        cfg.test_case,
        cfg.nx,
        cfg.ny,
        cfg.t_final,
        cfg.out_dir.display()
    );

    let wall_start = Instant::now();
    let (t, steps, rejected) = if cfg.adaptive {
        let control = StepDoubling::for_scheme(cfg.adaptive_tol, cfg.scheme);
        log::info!("adaptive step doubling, tol = {:e}", control.tol);
        let report = control.integrate(&mut stepper, &mms, 0.0, cfg.t_final, cfg.dt)?;
        fs::write(cfg.out_dir.join("adaptive_log.csv"), report.to_csv())?;
        (report.t, report.accepted, report.rejected)
    } else {
        let steps = (cfg.t_final / cfg.dt).round() as usize;
        let report_every = steps / 10 + 1;
        let mut t = 0.0;
        for i in 0..steps {
            stepper.step(t, &mms)?;
            t += cfg.dt;
            if i % report_every == 0 {
                log::info!("progress: {:.1}% (t = {:.4})", 100.0 * i as f64 / steps as f64, t);
            }
        }
        (t, steps, 0)
    };
    let wall_time = wall_start.elapsed().as_secs_f64();

    let mut u_exact = vec![0.0; grid.size()];
    mms.evaluate_exact(&grid, t, &mut u_exact);
    let u = stepper.state();

    let summary = RunSummary {
        threads_requested: cfg.threads,
        threads_effective: threads,
        preconditioner: stepper.preconditioner_name().to_string(),
        wall_time_seconds: wall_time,
        t_final: t,
        steps,
        rejected_steps: rejected,
        fallback_solves: stepper.fallback_solves(),
        total_pcg_iters: stepper.total_iterations(),
        max_abs_residual: stepper.max_abs_residual(),
        max_rel_residual: stepper.max_rel_residual(),
        error_l2: l2_error(&grid, u, &u_exact),
        error_linf: linf_error(&grid, u, &u_exact),
        error_rel_l2: relative_l2_error(&grid, u, &u_exact),
        error_h1: h1_seminorm_error(&grid, u, &u_exact),
    };
    summary.write_to_dir(&cfg.out_dir)?;

    log::info!(
        "done in {:.3} s: {} steps, {} PCG iterations, L2 error {:e}",
        wall_time,
        steps,
        summary.total_pcg_iters,
        summary.error_l2
    );
    Ok(())
}

fn main() -> ExitCode {
    let Some(args) = parse_args() else {
        print_usage();
        return ExitCode::SUCCESS;
    };
    init_logging(args.log_level.as_deref());

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            if matches!(e, PdeError::InvalidConfig(_)) {
                print_usage();
            }
            ExitCode::FAILURE
        }
    }
}
