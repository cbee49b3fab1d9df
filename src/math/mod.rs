//! Numerical utilities: least squares, inverse real FFT, filtering, grids.

pub mod fft;
pub mod filter;
pub mod interp;
pub mod ols;

pub use fft::*;
pub use filter::*;
pub use interp::*;
pub use ols::*;
