//! Error types for the core crate

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    /// A deadline elapsed before the guarded operation finished
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Result type for the core crate
pub type Result<T> = std::result::Result<T, CoreError>;
