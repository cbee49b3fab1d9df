//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the parameter vocabulary and containers (`ParamKey`, `ParameterSet`)
//! - fit configuration inputs (`FitBounds`, `DisabledSet`, `FitMode`, `Topology`)
//! - measured data (`Spectrum`) and calculation outputs (`CalculationResult`)

pub mod types;

pub use types::*;
