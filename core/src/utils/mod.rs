//! Utility functions and helpers
//!
//! This module provides the timing, deadline and string helpers used throughout the codebase.

pub mod string;
pub mod timer;

pub use string::StringUtils;
pub use timer::{Deadline, Timer};

use chrono::{DateTime, Utc};

/// Current wall-clock time in UTC
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}
