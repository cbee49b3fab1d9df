//! Time-domain view of the circuit response.
//!
//! `pulse` turns a frequency response into rising/falling voltage curves;
//! `metrics` reduces a falling curve to checkpoint values and chargeability.

pub mod metrics;
pub mod pulse;

pub use metrics::*;
pub use pulse::*;
