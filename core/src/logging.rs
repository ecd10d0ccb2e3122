//! # Logging Configuration
//!
//! Standardised `tracing` setup for the backtesting engine: human-readable or
//! JSON output, filtered by `RUST_LOG`. Each grid-search task is wrapped in its
//! own span (see [`crate::driver::task_span`]) so worker-pool logs stay
//! attributable to a coordinate even though tasks run concurrently.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use backtest_core::logging::init_logging;
//!
//! init_logging();
//! tracing::info!("backtest run starting");
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise human-readable logging, honouring `RUST_LOG` (defaults to `info`).
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .init()
}

/// Initialise JSON logging, for ingestion by log aggregators.
pub fn init_json_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init()
}
