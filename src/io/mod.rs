//! Input/output helpers.
//!
//! - instrument spectrum ingest (`ingest`)
//! - results rows, time-domain and spectrum CSV exports (`export`)
//! - JSON session files (`session`)

pub mod export;
pub mod ingest;
pub mod session;

pub use export::*;
pub use ingest::*;
pub use session::*;
