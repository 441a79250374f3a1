//! Timing utilities
//!
//! This module provides utilities for measuring execution time and for the
//! deadlines that bound every suspending network call.

use crate::error::{CoreError, Result};
use log::{debug, warn};
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Timer for measuring execution time
#[derive(Debug, Clone)]
pub struct Timer {
    /// Name of the timer
    name: String,

    /// Start time
    start: Instant,

    /// Optional slow-operation threshold
    warning_threshold: Option<Duration>,

    /// Whether to log automatically on drop
    log_on_drop: bool,
}

impl Timer {
    /// Create a new timer with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Timer {
            name: name.into(),
            start: Instant::now(),
            warning_threshold: None,
            log_on_drop: true,
        }
    }

    /// Set a warning threshold for the timer
    pub fn with_warning_threshold(mut self, threshold: Duration) -> Self {
        self.warning_threshold = Some(threshold);
        self
    }

    /// Disable automatic logging on drop
    pub fn without_auto_log(mut self) -> Self {
        self.log_on_drop = false;
        self
    }

    /// Get the elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Check if the timer has exceeded the warning threshold
    pub fn has_warning(&self) -> bool {
        match self.warning_threshold {
            Some(threshold) => self.elapsed() > threshold,
            None => false,
        }
    }

    /// Log the elapsed time, at warn level once the threshold is crossed
    pub fn log(&self, message: impl Into<String>) {
        let msg = format!("{} {}: {:?}", self.name, message.into(), self.elapsed());

        if self.has_warning() {
            warn!("{} [SLOW]", msg);
        } else {
            debug!("{}", msg);
        }
    }
}

impl Display for Timer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}: {:?}", self.name, self.elapsed())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if self.log_on_drop {
            self.log("completed");
        }
    }
}

/// A point in time by which a logical operation must finish
///
/// One deadline wraps a whole operation (connect and authenticate, one
/// query, one listen window) and is handed to every read and write the
/// operation performs, so the budget is shared rather than reset per call.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        // Saturate absurd budgets at roughly thirty years out
        let at = now
            .checked_add(budget)
            .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30));
        Deadline { at, budget }
    }

    /// Deadline `millis` milliseconds from now
    pub fn after_millis(millis: u64) -> Self {
        Self::after(Duration::from_millis(millis))
    }

    /// The total budget this deadline was created with
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Drive `future` to completion unless the deadline passes first
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output> {
        tokio::time::timeout_at(self.at, future)
            .await
            .map_err(|_| CoreError::DeadlineExceeded(self.budget))
    }
}

impl Debug for Deadline {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Deadline(budget={:?}, remaining={:?})", self.budget, self.remaining())
    }
}
