//! Session-level errors.
//!
//! Failures of a single run never surface here; they are recorded on the
//! run's [`dask_timing_core::TimingRecord`] and the session carries on.

use dask_timing_core::StoreError;
use thiserror::Error;

/// Errors that end a timing session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The cluster library or its command line tools are not installed.
    #[error("{what} is not available. Install it with: {hint}")]
    DependencyMissing { what: String, hint: String },

    /// Every attempted run failed.
    #[error("No successful runs out of {attempted} attempted")]
    InsufficientRuns { attempted: usize },

    /// An unknown preset, study type or inconsistent set of options.
    #[error("Unknown configuration: {0}")]
    UnknownConfiguration(String),

    /// The user interrupted the session.
    #[error("Interrupted")]
    Interrupted,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::DependencyMissing {
            what: "dask.distributed".to_string(),
            hint: "pip install 'dask[distributed]'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "dask.distributed is not available. Install it with: pip install 'dask[distributed]'"
        );

        let err = SessionError::InsufficientRuns { attempted: 3 };
        assert_eq!(err.to_string(), "No successful runs out of 3 attempted");

        let err = SessionError::UnknownConfiguration("preset 'huge'".to_string());
        assert_eq!(err.to_string(), "Unknown configuration: preset 'huge'");

        assert_eq!(SessionError::Interrupted.to_string(), "Interrupted");
    }
}
