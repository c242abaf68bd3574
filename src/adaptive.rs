// src/adaptive.rs
//
// Step-doubling time-step control.
//
// From a saved state, one step of dt and two steps of dt/2 are taken; the difference of the
// two results, scaled by 1/(2^p - 1), estimates the local error of the half-step pair. The
// half-step result is kept when accepted; otherwise the state is rolled back and the step
// is retried with a smaller dt.

use serde::Serialize;

use crate::error::Result;
use crate::metrics::l2_error;
use crate::time_stepper::{ForcingProvider, Scheme, TimeStepper};

/// Below this step size a trial is accepted regardless of its error.
pub const MIN_DT: f64 = 1e-7;

/// One attempted step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdaptiveTrial {
    /// Accepted steps so far, including this one if accepted.
    pub step: usize,
    /// Time after the trial (unchanged when rejected).
    pub t: f64,
    pub dt: f64,
    pub error: f64,
    pub accepted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AdaptiveReport {
    pub accepted: usize,
    pub rejected: usize,
    pub t: f64,
    /// Step size proposed after the last trial.
    pub final_dt: f64,
    pub trials: Vec<AdaptiveTrial>,
}

impl AdaptiveReport {
    /// `step,t,dt,error,accepted` rows with a header line.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("step,t,dt,error,accepted\n");
        for tr in &self.trials {
            out.push_str(&format!("{},{:.6},{:e},{:e},{}\n", tr.step, tr.t, tr.dt, tr.error, tr.accepted));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDoubling {
    pub tol: f64,
    /// Temporal order of the underlying scheme.
    pub order: u32,
    pub min_dt: f64,
}

impl StepDoubling {
    pub fn new(tol: f64, order: u32) -> Self {
        Self {
            tol,
            order,
            min_dt: MIN_DT,
        }
    }

    pub fn for_scheme(tol: f64, scheme: Scheme) -> Self {
        Self::new(tol, scheme.order())
    }

    /// Integrate from `t0` to `t_end` starting with step `dt0`. The stepper's step size is
    /// changed along the way and left at the last value used. With convection every trial
    /// step is capped at the stepper's CFL limit.
    pub fn integrate(
        &self,
        stepper: &mut TimeStepper,
        forcing: &dyn ForcingProvider,
        t0: f64,
        t_end: f64,
        dt0: f64,
    ) -> Result<AdaptiveReport> {
        let size = stepper.grid().size();
        let mut saved = vec![0.0; size];
        let mut u_full = vec![0.0; size];

        let p = self.order as f64;
        let err_scale = 1.0 / (2f64.powf(p) - 1.0);
        let exponent = 1.0 / (p + 1.0);

        let mut report = AdaptiveReport {
            t: t0,
            final_dt: dt0,
            ..Default::default()
        };
        let cfl = stepper.cfl_limit();
        let mut t = t0;
        let mut dt = dt0;

        while t < t_end - 1e-12 {
            if let Some(limit) = cfl {
                dt = dt.min(limit);
            }
            if t + dt > t_end {
                dt = t_end - t;
            }

            stepper.copy_state(&mut saved);

            stepper.set_dt(dt)?;
            stepper.step(t, forcing)?;
            stepper.copy_state(&mut u_full);

            stepper.restore_state(&saved);
            stepper.set_dt(0.5 * dt)?;
            stepper.step(t, forcing)?;
            stepper.step(t + 0.5 * dt, forcing)?;

            let error = l2_error(stepper.grid(), &u_full, stepper.state()) * err_scale;
            let accepted = error <= self.tol || dt < self.min_dt;
            if accepted {
                t += dt;
                report.accepted += 1;
            } else {
                stepper.restore_state(&saved);
                report.rejected += 1;
                log::debug!("rejected dt = {dt:e} at t = {t:e}, err = {error:e}");
            }
            report.trials.push(AdaptiveTrial {
                step: report.accepted,
                t,
                dt,
                error,
                accepted,
            });

            dt = if error > 0.0 {
                dt * (self.tol / error).powf(exponent)
            } else {
                dt * 2.0
            };
        }

        log::info!(
            "adaptive stepping finished at t = {t:.4}: {} accepted, {} rejected",
            report.accepted,
            report.rejected
        );
        report.t = t;
        report.final_dt = dt;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_follows_scheme() {
        assert_eq!(StepDoubling::for_scheme(1e-3, Scheme::CrankNicolson).order, 2);
        assert_eq!(StepDoubling::for_scheme(1e-3, Scheme::BackwardEuler).order, 1);
        assert_eq!(StepDoubling::new(1e-3, 1).min_dt, MIN_DT);
    }

    #[test]
    fn csv_has_header_and_rows() {
        let report = AdaptiveReport {
            accepted: 1,
            rejected: 1,
            t: 0.1,
            final_dt: 0.1,
            trials: vec![
                AdaptiveTrial { step: 0, t: 0.0, dt: 0.2, error: 1.0, accepted: false },
                AdaptiveTrial { step: 1, t: 0.1, dt: 0.1, error: 1e-4, accepted: true },
            ],
        };
        let csv = report.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "step,t,dt,error,accepted");
        assert!(lines[1].ends_with(",false"));
        assert!(lines[2].starts_with("1,0.100000,"));
    }
}
