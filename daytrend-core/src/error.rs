//! Core error taxonomy.
//!
//! Every public operation in this crate returns `Result<_, CoreError>`.
//! Errors propagate to the orchestrator, which logs and sets the exit code;
//! recoverable conditions (missing T-2 close on a weekend boundary, a symbol
//! a strategy does not trade) are handled with documented fallbacks at the
//! call site and never become a `CoreError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A required price or bar is absent. T-1 closes are always required;
    /// T-2 closes only for finalization.
    #[error("data not found: {0}")]
    DataNotFound(String),

    /// Data is present but fails validation (price out of range, quantity
    /// over the position limit, non-positive margin metadata).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A numeric computation produced a non-finite or undefined result
    /// (singular covariance, NaN intermediates).
    #[error("computation error: {0}")]
    Computation(String),

    /// An instrument is not in the registry.
    #[error("instrument '{0}' not found in registry")]
    MissingInstrument(String),
}

impl CoreError {
    pub fn data_not_found(what: impl Into<String>) -> Self {
        Self::DataNotFound(what.into())
    }

    pub fn invalid_data(what: impl Into<String>) -> Self {
        Self::InvalidData(what.into())
    }

    pub fn computation(what: impl Into<String>) -> Self {
        Self::Computation(what.into())
    }
}
