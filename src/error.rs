//! Crate-wide error taxonomy.
//!
//! Every public boundary check (malformed chromosome, index out of range,
//! size mismatch, unknown kernel name, unknown loss kind, non-positive
//! learning rate, …) returns [`DcgpError::InvalidArgument`]. Numerical
//! pathologies inside inner loops (protected-division triggers, non-finite
//! fitness, a singular/indefinite reduced Hessian) are never propagated as
//! errors — they are absorbed locally per spec (protected division returns
//! `1`, a non-finite candidate is discarded, a Newton step is skipped) — but
//! the [`DcgpError::NumericInstability`] and [`DcgpError::NotApplicable`]
//! variants exist so internal helpers and tests can name what happened
//! without reaching for a bare `bool`.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DcgpError {
    #[error("invalid argument: {what} (expected {expected}, got {got})")]
    InvalidArgument {
        what: String,
        expected: String,
        got: String,
    },

    #[error("numeric instability: {0}")]
    NumericInstability(String),

    #[error("not applicable: {0}")]
    NotApplicable(String),
}

impl DcgpError {
    pub fn invalid(what: impl Into<String>, expected: impl Into<String>, got: impl Into<String>) -> Self {
        DcgpError::InvalidArgument {
            what: what.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }
}

pub type DcgpResult<T> = Result<T, DcgpError>;
