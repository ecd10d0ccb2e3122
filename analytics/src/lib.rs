#![warn(
    unused,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::unused_self
)]
#![allow(clippy::type_complexity)]

//! # Analytics
//!
//! Time-interval iteration and target-metric definitions shared by the
//! backtesting engine.
//!
//! - [`window`] enumerates the `(start, end)` windows a grid search walks over a
//!   master time range, sliding or shrinking, forward or backward.
//! - [`metric`] replaces dynamic `getattr`-style metric dispatch with a closed
//!   [`metric::TargetMetric`] enum and a single `compute` entry point.

/// Time-window enumeration (sliding / shrinking, forward / backward).
pub mod window;

/// Target metrics computed by the simulator at the end of a run.
pub mod metric;
