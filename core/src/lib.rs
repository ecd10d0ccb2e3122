#![warn(
    unused,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::unused_self
)]
#![allow(clippy::type_complexity)]

//! # Core
//!
//! The backtesting engine proper: the history store, the potential-coin
//! resolver, the grid enumerator, the simulator core and the parallel driver
//! that wires them together.
//!
//! - [`history`] loads and slices the OHLCV price cube (C1).
//! - [`potential`] resolves the oversold-score cache per time window and
//!   strategy cutoff (C3).
//! - [`grid`] enumerates the Cartesian product of a grid search into a
//!   labelled Result Cube (C4).
//! - [`simulator`] runs one strategy coordinate end to end (C5).
//! - [`driver`] fans the grid out across a worker pool and writes results
//!   back into the Result Cube (C6).
//!
//! [`config`] and [`error`] are the ambient configuration and error types
//! shared across all of the above; [`logging`] wires up `tracing`.

pub mod config;
pub mod error;
pub mod logging;

pub mod history;
pub mod potential;
pub mod grid;
pub mod simulator;
pub mod driver;
