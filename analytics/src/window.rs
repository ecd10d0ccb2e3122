//! Time-interval iteration over a master `(start, end)` range.
//!
//! Mirrors the `TimeIntervalIterator` of the system this engine replaces: given a
//! master window, a step and a direction, it walks a sequence of `(start, end)`
//! sub-windows either by sliding a fixed-width window across the range, or by
//! shrinking a window from one side. The iterator is lazy, finite and
//! restartable (`Clone` + `reset`); ordering is deterministic.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use thiserror::Error;

/// Direction in which the window walks across the master range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

/// Whether the window slides at fixed width, or shrinks from one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowMode {
    /// Fixed-width window sliding across the master range.
    Sliding,
    /// Window anchored at one master bound, growing/shrinking from the other.
    Shrinking,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("master start {start} is after master end {end}")]
    Inverted { start: DateTime<Utc>, end: DateTime<Utc> },
    #[error("step must be strictly positive")]
    NonPositiveStep,
    #[error("malformed time window encoding: {0}")]
    Decode(String),
}

/// A single `(start, end)` window, with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Canonical `"<start_ms>_<end_ms>"` coordinate-key encoding.
    pub fn encode(&self) -> String {
        format!(
            "{}_{}",
            self.start.timestamp_millis(),
            self.end.timestamp_millis()
        )
    }

    /// Inverse of [`TimeWindow::encode`].
    pub fn decode(encoded: &str) -> Result<Self, WindowError> {
        let (start_raw, end_raw) = encoded
            .split_once('_')
            .ok_or_else(|| WindowError::Decode(encoded.to_string()))?;
        let start_ms: i64 = start_raw
            .parse()
            .map_err(|_| WindowError::Decode(encoded.to_string()))?;
        let end_ms: i64 = end_raw
            .parse()
            .map_err(|_| WindowError::Decode(encoded.to_string()))?;
        let start = DateTime::from_timestamp_millis(start_ms)
            .ok_or_else(|| WindowError::Decode(encoded.to_string()))?;
        let end = DateTime::from_timestamp_millis(end_ms)
            .ok_or_else(|| WindowError::Decode(encoded.to_string()))?;
        Self::new(start, end)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Lazy, finite, restartable enumerator of [`TimeWindow`]s over a master range.
#[derive(Debug, Clone)]
pub struct WindowIterator {
    master_start: DateTime<Utc>,
    master_end: DateTime<Utc>,
    step: Duration,
    direction: Direction,
    mode: WindowMode,
    current_start: DateTime<Utc>,
    current_end: DateTime<Utc>,
    started: bool,
}

impl WindowIterator {
    pub fn new(
        master_start: DateTime<Utc>,
        master_end: DateTime<Utc>,
        step: Duration,
        direction: Direction,
        mode: WindowMode,
    ) -> Result<Self, WindowError> {
        if master_start > master_end {
            return Err(WindowError::Inverted {
                start: master_start,
                end: master_end,
            });
        }
        if step <= Duration::zero() {
            return Err(WindowError::NonPositiveStep);
        }

        let (current_start, current_end) = match (mode, direction) {
            (WindowMode::Sliding, _) => (master_start, master_end),
            // Anchored at the far bound in the direction of travel; the other
            // bound walks toward it, shrinking the window width each step.
            (WindowMode::Shrinking, Direction::Forward) => (master_start, master_start),
            (WindowMode::Shrinking, Direction::Backward) => (master_end, master_end),
        };

        Ok(Self {
            master_start,
            master_end,
            step,
            direction,
            mode,
            current_start,
            current_end,
            started: false,
        })
    }

    /// Restart the iterator from its initial window.
    pub fn reset(&mut self) {
        let (current_start, current_end) = match (self.mode, self.direction) {
            (WindowMode::Sliding, _) => (self.master_start, self.master_end),
            (WindowMode::Shrinking, Direction::Forward) => (self.master_start, self.master_start),
            (WindowMode::Shrinking, Direction::Backward) => (self.master_end, self.master_end),
        };
        self.current_start = current_start;
        self.current_end = current_end;
        self.started = false;
    }

    fn advance(&mut self) {
        match (self.mode, self.direction) {
            (WindowMode::Sliding, Direction::Forward) => self.current_start += self.step,
            (WindowMode::Sliding, Direction::Backward) => self.current_end -= self.step,
            (WindowMode::Shrinking, Direction::Forward) => {
                self.current_start += self.step;
                self.current_end = self.master_end;
            }
            (WindowMode::Shrinking, Direction::Backward) => {
                self.current_end -= self.step;
                self.current_start = self.master_start;
            }
        }
    }
}

impl Iterator for WindowIterator {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.started {
            self.advance();
        }
        self.started = true;

        if self.current_end < self.current_start {
            return None;
        }

        Some(TimeWindow {
            start: self.current_start,
            end: self.current_end,
        })
    }
}
