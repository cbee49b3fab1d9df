//! Error types.
//!
//! Two layers:
//!
//! - `ModelError`: typed errors raised by the numerical core (circuit
//!   primitives, fit setup, time-domain transform).
//! - `AppError`: the application-level error carrying a process exit code.
//!
//! Core errors convert into `AppError` at the CLI boundary so the binary can
//! report a message and exit with a stable code.

use thiserror::Error;

use crate::domain::ParamKey;

/// Result type for core operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Coarse classification of a `ModelError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Zero/negative frequency, zero Q/R/L, non-positive resonant frequency.
    InvalidPhysicalInput,
    /// Mismatched array lengths, unknown keys, missing keys or bounds.
    ShapeMismatch,
    /// Settings that cannot be used (bad bounds, infeasible start, bad grid).
    InvalidConfig,
    /// Nothing to work on.
    EmptyData,
}

/// Errors raised by the circuit model, fit engine and time-domain transform.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Inductance cannot be zero.")]
    ZeroInductance,

    #[error("Frequency cannot be negative (got {freq}).")]
    NegativeFrequency { freq: f64 },

    #[error("CPE coefficient Q cannot be zero.")]
    ZeroCpeCoefficient,

    #[error("CPE is singular at f=0 with frequency exponent {pf}.")]
    CpeSingularAtZero { pf: f64 },

    #[error("Cannot take parallel of impedance 0 (infinite admittance).")]
    ParallelZeroImpedance,

    #[error("Resistance cannot be zero.")]
    ZeroResistance,

    #[error("Resonant frequency must be positive (got {f0}).")]
    NonPositiveResonance { f0: f64 },

    #[error("Model evaluation produced non-finite values.")]
    NonFiniteResidual,

    #[error("Shape mismatch for {what}: expected {expected}, got {actual}.")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown parameter key '{0}'.")]
    UnknownParameter(String),

    #[error("Missing parameter '{0}'.")]
    MissingParameter(ParamKey),

    #[error("Missing fit bounds for '{0}'.")]
    MissingBounds(ParamKey),

    #[error("Parameter {key} must be > 0 for log scaling; got {value}.")]
    NonPositiveScaled { key: ParamKey, value: f64 },

    #[error("Initial value of {key} ({value}) lies outside its bounds [{lower}, {upper}].")]
    InfeasibleStart {
        key: ParamKey,
        value: f64,
        lower: f64,
        upper: f64,
    },

    #[error("{0}")]
    InvalidConfig(String),

    #[error("Spectrum has no points.")]
    EmptySpectrum,
}

impl ModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::ZeroInductance
            | ModelError::NegativeFrequency { .. }
            | ModelError::ZeroCpeCoefficient
            | ModelError::CpeSingularAtZero { .. }
            | ModelError::ParallelZeroImpedance
            | ModelError::ZeroResistance
            | ModelError::NonPositiveResonance { .. }
            | ModelError::NonFiniteResidual => ErrorKind::InvalidPhysicalInput,
            ModelError::ShapeMismatch { .. }
            | ModelError::UnknownParameter(_)
            | ModelError::MissingParameter(_)
            | ModelError::MissingBounds(_) => ErrorKind::ShapeMismatch,
            ModelError::NonPositiveScaled { .. }
            | ModelError::InfeasibleStart { .. }
            | ModelError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            ModelError::EmptySpectrum => ErrorKind::EmptyData,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        let exit_code = match err.kind() {
            ErrorKind::ShapeMismatch | ErrorKind::InvalidConfig => 2,
            ErrorKind::EmptyData => 3,
            ErrorKind::InvalidPhysicalInput => 4,
        };
        AppError::new(exit_code, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_errors_map_to_exit_codes() {
        let app: AppError = ModelError::ZeroInductance.into();
        assert_eq!(app.exit_code(), 4);

        let app: AppError = ModelError::ShapeMismatch {
            what: "impedance",
            expected: 3,
            actual: 2,
        }
        .into();
        assert_eq!(app.exit_code(), 2);
        assert!(app.to_string().contains("expected 3"));

        let app: AppError = ModelError::EmptySpectrum.into();
        assert_eq!(app.exit_code(), 3);
    }
}
