//! Circuit fitting.
//!
//! Responsibilities:
//!
//! - map parameters to and from the optimizer's scaled space
//! - build the Cole / Bode residuals, the Gaussian prior and the ordering penalty
//! - run the bounded least-squares solve and package the outcome

pub mod fitter;
pub mod residuals;
pub mod scaling;
pub mod solver;

pub use fitter::*;
pub use scaling::{descale, scale, scaled_bounds, wrap_pei};
pub use solver::{SolverOptions, SolverReport, SolverStatus, least_squares};
