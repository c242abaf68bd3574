// tests/validation.rs
//
// Integration-style validation tests (physics sanity checks).
// Run with: cargo test
// Or only these tests: cargo test --test validation

use std::sync::Arc;

use pde_sim::adaptive::StepDoubling;
use pde_sim::boundary::{zero_dirichlet, DirichletBoundary};
use pde_sim::grid::Grid2D;
use pde_sim::linear::PreconditionerKind;
use pde_sim::metrics::{l2_error, log_log_regression, relative_l2_error};
use pde_sim::mms::{ConstantConvection, ManufacturedSolution, TestCase};
use pde_sim::newton_krylov::NewtonKrylov;
use pde_sim::parallel::ParallelExecutor;
use pde_sim::stencil::{self, KappaAveraging, VelocityField};
use pde_sim::time_stepper::{ForcingProvider, NoForcing, Scheme, StepperSettings, TimeStepper};

fn executor() -> Arc<ParallelExecutor> {
    Arc::new(ParallelExecutor::new(4))
}

fn energy(u: &[f64]) -> f64 {
    u.iter().map(|v| v * v).sum()
}

/// Run a manufactured case from its exact initial state to `t_final` in `steps` fixed steps;
/// returns the final L2 error.
fn run_case(
    case: TestCase,
    n: usize,
    scheme: Scheme,
    steps: usize,
    t_final: f64,
    preconditioner: PreconditionerKind,
    averaging: KappaAveraging,
) -> f64 {
    let grid = Grid2D::new(n, n, 1.0, 1.0);
    let mms = ManufacturedSolution::new(case, 1.0);
    let dt = t_final / steps as f64;

    let kappa = case.has_variable_kappa().then(|| {
        let mut k = vec![0.0; grid.size()];
        mms.evaluate_kappa(&grid, &mut k);
        k
    });
    let velocity = case.velocity();
    let settings = StepperSettings {
        scheme,
        alpha: 1.0,
        dt,
        max_iters: 2000,
        tol: 1e-11,
        preconditioner,
        kappa_averaging: averaging,
        ..Default::default()
    };
    let mut stepper = TimeStepper::new(
        executor(),
        grid.clone(),
        settings,
        Box::new(DirichletBoundary::new(move |x, y, t| mms.exact(x, y, t))),
        kappa.as_deref(),
        velocity.as_ref().map(|v| v as &dyn stencil::ConvectionField),
    )
    .unwrap();
    stepper.init_exact(0.0, &mms);

    for s in 0..steps {
        stepper.step(s as f64 * dt, &mms).unwrap();
    }

    let mut exact = vec![0.0; grid.size()];
    mms.evaluate_exact(&grid, t_final, &mut exact);
    l2_error(&grid, stepper.state(), &exact)
}

#[test]
fn backward_euler_energy_decays_without_forcing() {
    let grid = Grid2D::new(32, 32, 1.0, 1.0);
    let settings = StepperSettings {
        scheme: Scheme::BackwardEuler,
        dt: 0.05,
        max_iters: 1000,
        tol: 1e-10,
        ..Default::default()
    };
    let mut stepper =
        TimeStepper::new(executor(), grid.clone(), settings, Box::new(zero_dirichlet()), None, None)
            .unwrap();

    let mut u: Vec<f64> = (0..grid.size()).map(|i| (i as f64 * 0.1).sin()).collect();
    for i in 0..grid.nx {
        u[grid.idx(i, 0)] = 0.0;
        u[grid.idx(i, grid.ny - 1)] = 0.0;
    }
    for j in 0..grid.ny {
        u[grid.idx(0, j)] = 0.0;
        u[grid.idx(grid.nx - 1, j)] = 0.0;
    }
    stepper.restore_state(&u);

    let mut previous = energy(stepper.state());
    assert!(previous > 1.0, "initial energy should be substantial, got {previous}");

    for step in 0..10 {
        stepper.step(step as f64 * 0.05, &NoForcing).unwrap();
        let current = energy(stepper.state());
        assert!(
            current <= previous * (1.0 + 1e-9),
            "energy grew at step {step}: {previous} -> {current}"
        );
        previous = current;
    }
}

#[test]
fn crank_nicolson_energy_decays_without_forcing() {
    let grid = Grid2D::new(24, 24, 1.0, 1.0);
    let settings = StepperSettings {
        dt: 0.01,
        tol: 1e-10,
        ..Default::default()
    };
    let mut stepper =
        TimeStepper::new(executor(), grid, settings, Box::new(zero_dirichlet()), None, None).unwrap();
    stepper.init_exact(0.0, &ManufacturedSolution::new(TestCase::RotatingHump, 1.0));

    let mut previous = energy(stepper.state());
    for step in 0..20 {
        stepper.step(step as f64 * 0.01, &NoForcing).unwrap();
        let current = energy(stepper.state());
        assert!(current <= previous * (1.0 + 1e-9), "CN energy grew at step {step}");
        previous = current;
    }
}

#[test]
fn muscl_convection_of_a_step_is_tvd() {
    let exec = ParallelExecutor::new(4);
    let grid = Grid2D::new(100, 3, 10.0, 1.0);
    let mut u = vec![0.0; grid.size()];
    for j in 0..grid.ny {
        for i in 21..40 {
            u[grid.idx(i, j)] = 1.0;
        }
    }
    let mut u_int = vec![0.0; grid.num_interior()];
    grid.extract_interior(&u, &mut u_int);

    let velocity = VelocityField::sample(&grid, &ConstantConvection::new(1.0, 0.0));
    let mut conv = vec![0.0; grid.num_interior()];
    let dt = 0.01;

    for _ in 0..50 {
        conv.fill(0.0);
        stencil::convection(&exec, &grid, &velocity, &u_int, Some(&u), &mut conv);
        for (ui, ci) in u_int.iter_mut().zip(&conv) {
            *ui -= dt * ci;
        }
        grid.inject_interior(&u_int, &mut u);
    }

    let max = u_int.iter().cloned().fold(f64::MIN, f64::max);
    let min = u_int.iter().cloned().fold(f64::MAX, f64::min);
    assert!(max <= 1.0 + 1e-6, "limited scheme overshoots: max = {max}");
    assert!(min >= -1e-6, "limited scheme undershoots: min = {min}");
    // the step actually moved right
    assert!(u_int[grid.idx_interior(42, 1)] > 0.1);
}

#[test]
fn jfnk_solves_exponential_reaction_diffusion() {
    // -Δu - e^u = f with f manufactured from u = sin πx sin πy, homogeneous Dirichlet
    let exec = executor();
    let grid = Grid2D::new(32, 32, 1.0, 1.0);
    let n = grid.num_interior();

    let mut u_true = vec![0.0; grid.size()];
    for j in 0..grid.ny {
        for i in 0..grid.nx {
            u_true[grid.idx(i, j)] =
                (std::f64::consts::PI * grid.x[i]).sin() * (std::f64::consts::PI * grid.y[j]).sin();
        }
    }
    let mut u_true_int = vec![0.0; n];
    grid.extract_interior(&u_true, &mut u_true_int);

    let mut lap = vec![0.0; n];
    stencil::laplacian(&exec, &grid, &u_true_int, None, &mut lap);
    let f: Vec<f64> = lap.iter().zip(&u_true_int).map(|(l, u)| -l - u.exp()).collect();

    let residual = |u: &[f64], out: &mut [f64]| {
        stencil::laplacian(&exec, &grid, u, None, out);
        for ((o, ui), fi) in out.iter_mut().zip(u).zip(&f) {
            *o = -*o - ui.exp() - fi;
        }
    };

    let mut solver = NewtonKrylov::new(Arc::clone(&exec), n, 20, 1e-8, 1000, 1e-9);
    let mut u = vec![0.0; n];
    let iters = solver.solve(residual, &mut u);

    assert!(iters < 20, "JFNK did not converge: {iters} iterations, |F| = {:e}", solver.last_residual_norm());
    let max_err = u
        .iter()
        .zip(&u_true_int)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);
    assert!(max_err < 1e-6, "JFNK solution error {max_err:e}");
}

#[test]
fn crank_nicolson_is_second_order_in_space_and_time() {
    // dt ∝ h so both error sources shrink as h²
    let sizes = [17usize, 33, 65];
    let mut hs = Vec::new();
    let mut errs = Vec::new();
    for &n in &sizes {
        let err = run_case(
            TestCase::Homogeneous,
            n,
            Scheme::CrankNicolson,
            n - 1,
            0.1,
            PreconditionerKind::Jacobi,
            KappaAveraging::Arithmetic,
        );
        hs.push(1.0 / (n - 1) as f64);
        errs.push(err);
    }
    let fit = log_log_regression(&hs, &errs).unwrap();
    assert!(
        fit.slope > 1.7 && fit.slope < 2.3,
        "expected second order, got slope {} (errors {:?})",
        fit.slope,
        errs
    );
    assert!(fit.r_squared > 0.99, "poor fit: r² = {}", fit.r_squared);
}

#[test]
fn bilinear_solution_is_reproduced() {
    // Δu = 0 for u = (1+x)(1+y)e^{-t}; only the (tiny) time error remains
    let err = run_case(
        TestCase::NonZeroDirichlet,
        17,
        Scheme::CrankNicolson,
        50,
        0.05,
        PreconditionerKind::Ssor,
        KappaAveraging::Arithmetic,
    );
    assert!(err < 1e-6, "bilinear case error {err:e}");
}

#[test]
fn variable_kappa_converges_under_both_averagings() {
    for averaging in [KappaAveraging::Arithmetic, KappaAveraging::Harmonic] {
        let coarse = run_case(
            TestCase::VariableKappa,
            17,
            Scheme::CrankNicolson,
            16,
            0.1,
            PreconditionerKind::Multigrid,
            averaging,
        );
        let fine = run_case(
            TestCase::VariableKappa,
            33,
            Scheme::CrankNicolson,
            32,
            0.1,
            PreconditionerKind::Multigrid,
            averaging,
        );
        let ratio = coarse / fine;
        assert!(ratio > 3.0, "{averaging:?}: error ratio {ratio} ({coarse:e} -> {fine:e})");
    }
}

#[test]
fn preconditioners_agree_on_the_solution() {
    let errs: Vec<f64> = [
        PreconditionerKind::Jacobi,
        PreconditionerKind::Ssor,
        PreconditionerKind::Multigrid,
    ]
    .into_iter()
    .map(|pc| {
        run_case(
            TestCase::VariableKappa,
            33,
            Scheme::BackwardEuler,
            10,
            0.05,
            pc,
            KappaAveraging::Harmonic,
        )
    })
    .collect();
    for e in &errs[1..] {
        assert!((e - errs[0]).abs() < 1e-8, "preconditioned solutions differ: {errs:?}");
    }
}

#[test]
fn imex_convection_tracks_manufactured_solution() {
    // CFL limit h/|b| = 1/32 is well above dt
    let err = run_case(
        TestCase::Convection,
        33,
        Scheme::Imex,
        10,
        0.05,
        PreconditionerKind::Jacobi,
        KappaAveraging::Arithmetic,
    );
    assert!(err < 2e-2, "convection case error {err:e}");
}

#[test]
fn negative_diffusivity_falls_back_to_cgnr() {
    // alpha < 0 makes A = I - factor·L negative definite, which PCG rejects
    let grid = Grid2D::new(9, 9, 1.0, 1.0);
    let settings = StepperSettings {
        scheme: Scheme::BackwardEuler,
        alpha: -1000.0,
        dt: 0.01,
        max_iters: 500,
        tol: 1e-8,
        ..Default::default()
    };
    let mut stepper =
        TimeStepper::new(executor(), grid.clone(), settings, Box::new(zero_dirichlet()), None, None)
            .unwrap();
    stepper.init_exact(0.0, &ManufacturedSolution::new(TestCase::Homogeneous, 1.0));

    let result = stepper.step(0.0, &NoForcing).unwrap();
    assert_eq!(stepper.fallback_solves(), 1);
    assert!(result.status.is_usable(), "fallback status {}", result.status);
    assert!(stepper.state().iter().all(|v| v.is_finite()));
}

#[test]
fn adaptive_step_doubling_reaches_final_time() {
    let grid = Grid2D::new(17, 17, 1.0, 1.0);
    let mms = ManufacturedSolution::new(TestCase::Homogeneous, 1.0);
    let settings = StepperSettings {
        dt: 0.05,
        tol: 1e-10,
        ..Default::default()
    };
    let mut stepper =
        TimeStepper::new(executor(), grid.clone(), settings, Box::new(zero_dirichlet()), None, None)
            .unwrap();
    stepper.init_exact(0.0, &mms);

    let control = StepDoubling::for_scheme(1e-5, Scheme::CrankNicolson);
    let report = control.integrate(&mut stepper, &mms, 0.0, 0.1, 0.05).unwrap();

    assert!((report.t - 0.1).abs() < 1e-12, "stopped at t = {}", report.t);
    assert!(report.accepted >= 1);
    assert_eq!(report.trials.len(), report.accepted + report.rejected);
    for trial in report.trials.iter().filter(|t| t.accepted) {
        assert!(trial.error <= control.tol || trial.dt < control.min_dt);
    }

    let mut exact = vec![0.0; grid.size()];
    mms.evaluate_exact(&grid, report.t, &mut exact);
    let rel = relative_l2_error(&grid, stepper.state(), &exact);
    assert!(rel < 1e-2, "adaptive solution relative error {rel:e}");
}

#[test]
fn adaptive_convection_run_respects_cfl_limit() {
    let grid = Grid2D::new(17, 17, 1.0, 1.0);
    let mms = ManufacturedSolution::new(TestCase::Convection, 1.0);
    let velocity = ConstantConvection::new(1.0, 1.0);
    let settings = StepperSettings {
        scheme: Scheme::Imex,
        dt: 5e-3,
        tol: 1e-10,
        ..Default::default()
    };
    let mut stepper = TimeStepper::new(
        executor(),
        grid.clone(),
        settings,
        Box::new(DirichletBoundary::new(move |x, y, t| mms.exact(x, y, t))),
        None,
        Some(&velocity as &dyn stencil::ConvectionField),
    )
    .unwrap();
    stepper.init_exact(0.0, &mms);
    let limit = stepper.cfl_limit().unwrap();
    assert!((limit - grid.hx).abs() < 1e-15, "limit = {limit}");

    // loose enough that the error controller alone would grow dt past the limit
    let control = StepDoubling::for_scheme(1e-2, Scheme::Imex);
    let report = control.integrate(&mut stepper, &mms, 0.0, 0.5, 5e-3).unwrap();

    assert!((report.t - 0.5).abs() < 1e-12, "stopped at t = {}", report.t);
    assert!(report.trials.iter().all(|tr| tr.dt <= limit));
    assert!(
        report.trials.iter().any(|tr| tr.dt == limit),
        "step never reached the CFL cap: {:?}",
        report.trials.iter().map(|tr| tr.dt).collect::<Vec<_>>()
    );
    assert!(stepper.state().iter().all(|v| v.is_finite() && v.abs() < 2.0));
}
