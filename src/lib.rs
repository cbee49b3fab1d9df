//! `ip-circuits` library crate.
//!
//! The binary (`ipfit`) is a thin wrapper around this library so that:
//!
//! - the circuit model, fit engine and time-domain transform are testable
//!   without spawning processes
//! - file formats and the CLI stay outside the numerical core

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod transform;
