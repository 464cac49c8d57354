//! Error taxonomy for the backtest core.

use chrono::NaiveDate;
use thiserror::Error;

/// Errors surfaced by the learning and portfolio core.
///
/// The core never substitutes defaults for a failed computation; every
/// condition below propagates to the caller with enough context (date,
/// signal or window) to diagnose it.
#[derive(Error, Debug)]
pub enum BacktestError {
    /// An operation was invoked in an invalid state (e.g. sensing the
    /// environment before the first advance).
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// A statistical computation is undefined for the given input
    /// (zero variance, empty cross-section, too short a window).
    #[error("computation undefined for {context} at {date}: {reason}")]
    Computation {
        context: String,
        date: NaiveDate,
        reason: String,
    },

    /// A numerical failure propagated from the optimizer (singular or
    /// ill-conditioned covariance).
    #[error("numerical failure: {0}")]
    Numerical(String),
}

impl BacktestError {
    /// Create a precondition error
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Create a computation error for a signal or window at a date
    pub fn computation(
        context: impl Into<String>,
        date: NaiveDate,
        reason: impl Into<String>,
    ) -> Self {
        Self::Computation {
            context: context.into(),
            date,
            reason: reason.into(),
        }
    }

    /// Create a numerical error
    pub fn numerical(message: impl Into<String>) -> Self {
        Self::Numerical(message.into())
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, BacktestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_computation_error_carries_context() {
        let date = NaiveDate::from_ymd_opt(2016, 3, 14).unwrap();
        let err = BacktestError::computation("LEVERAGE", date, "zero variance");
        let message = err.to_string();

        assert!(message.contains("LEVERAGE"));
        assert!(message.contains("2016-03-14"));
        assert!(message.contains("zero variance"));
    }
}
