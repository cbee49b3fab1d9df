//! Equivalent-circuit models.
//!
//! `elements` holds the primitive impedances; `circuit` composes them into the
//! series and parallel topologies.

pub mod circuit;
pub mod elements;

pub use circuit::*;
pub use elements::*;
