// src/lib.rs

pub mod adaptive;
pub mod boundary;
pub mod config;
pub mod error;
pub mod grid;
pub mod linear;
pub mod logging;
pub mod metrics;
pub mod mms;
pub mod newton_krylov;
pub mod parallel;
pub mod stencil;
pub mod time_stepper;
pub mod vector_ops;

pub use error::{PdeError, Result};
