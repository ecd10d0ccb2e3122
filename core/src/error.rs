//! # Core Error Types
//!
//! Centralised error handling for the backtesting engine. Mirrors the error
//! hierarchy of spec §7: recoverable per-task errors ([`HistoryError`],
//! [`PotentialCoinError::MissingTimeIndex`], [`SimulatorError::InsufficientBalance`])
//! are caught at the task boundary and never escape the driver; everything else
//! is fatal.

use backtest_analytics::window::TimeWindow;
use thiserror::Error;

/// Errors surfaced by the [`crate::history`] store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HistoryError {
    /// No rows remained after filtering a slice, or a point lookup missed its
    /// timestamp. Recoverable: callers skip the coordinate.
    #[error("insufficient history for granularity {granularity} in window ending {end}")]
    InsufficientHistory {
        granularity: String,
        end: chrono::DateTime<chrono::Utc>,
    },

    /// A requested candle granularity was never loaded.
    #[error("granularity {0} was not loaded into the history store")]
    MissingGranularity(String),

    /// The external candle archive could not be read or parsed.
    #[error("failed to load price source: {0}")]
    SourceLoad(String),
}

/// Errors surfaced by the [`crate::potential`] resolver.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PotentialCoinError {
    #[error(transparent)]
    History(#[from] HistoryError),

    /// A window that was never indexed (e.g. a persisted cache miss with no
    /// live computation available) was requested.
    #[error("no potential-coin time index for window {0}")]
    MissingTimeIndex(TimeWindow),

    /// Neither or both of the cutoff forms were supplied.
    #[error("invalid cutoff configuration: {0}")]
    Configuration(&'static str),
}

/// Errors surfaced by the [`crate::simulator`] core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulatorError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    PotentialCoin(#[from] PotentialCoinError),

    /// A reservation or release could not be satisfied against current holdings.
    #[error("insufficient balance of {asset}: have {available}, need {required}")]
    InsufficientBalance {
        asset: smol_str::SmolStr,
        available: rust_decimal::Decimal,
        required: rust_decimal::Decimal,
    },
}

/// Top-level error for the whole engine, returned by the [`crate::driver`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BacktestError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    PotentialCoin(#[from] PotentialCoinError),

    #[error(transparent)]
    Simulator(#[from] SimulatorError),

    /// Any error that is not one of the recoverable per-task kinds above is
    /// fatal and aborts the run.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl BacktestError {
    /// True for the kinds spec §7 designates recoverable per-task: the driver
    /// leaves the Result Cube cell at NaN and continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BacktestError::History(_)
                | BacktestError::PotentialCoin(PotentialCoinError::MissingTimeIndex(_))
                | BacktestError::PotentialCoin(PotentialCoinError::History(_))
                | BacktestError::Simulator(SimulatorError::InsufficientBalance { .. })
                | BacktestError::Simulator(SimulatorError::History(_))
        )
    }
}
