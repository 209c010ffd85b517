//! Typed failure classes raised by the determinant engine.
//!
//! Public operations return `anyhow::Result`; the variants below are attached
//! as the root cause so callers can tell a bad configuration from a numeric
//! failure with [`DeterminantError::classify`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Configuration,
    NegativeResult,
    NumericFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum DeterminantError {
    /// Invalid input combination detected before any computation.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A quantity required to be positive came out negative.
    #[error("negative result: {0}")]
    NegativeResult(String),
    /// A solve did not converge.
    #[error("numeric failure: {0}")]
    NumericFailure(String),
}

impl DeterminantError {
    pub fn configuration(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self::Configuration(message.into()))
    }

    pub fn negative_result(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self::NegativeResult(message.into()))
    }

    pub fn numeric_failure(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self::NumericFailure(message.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::NegativeResult(_) => ErrorKind::NegativeResult,
            Self::NumericFailure(_) => ErrorKind::NumericFailure,
        }
    }

    /// Finds the typed cause anywhere in an error chain. Untyped errors
    /// (plain `bail!` validation messages) classify as configuration errors.
    pub fn classify(error: &anyhow::Error) -> ErrorKind {
        error
            .chain()
            .find_map(|cause| cause.downcast_ref::<DeterminantError>())
            .map(DeterminantError::kind)
            .unwrap_or(ErrorKind::Configuration)
    }
}

#[cfg(test)]
mod tests {
    use super::{DeterminantError, ErrorKind};
    use anyhow::Context;

    #[test]
    fn classify_sees_through_context() {
        let err: anyhow::Result<()> = Err(DeterminantError::numeric_failure("step size underflow"));
        let err = err.context("channel l = 7").expect_err("should fail");
        assert_eq!(DeterminantError::classify(&err), ErrorKind::NumericFailure);
        assert!(format!("{err:#}").contains("step size underflow"));
    }

    #[test]
    fn plain_validation_errors_are_configuration() {
        let err = anyhow::anyhow!("gy_tol must be positive.");
        assert_eq!(DeterminantError::classify(&err), ErrorKind::Configuration);
    }
}
