//! Data sources other than instrument files.
//!
//! - `synthetic`: spectra generated from the circuit model itself

pub mod synthetic;

pub use synthetic::*;
