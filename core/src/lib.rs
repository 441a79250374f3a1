//! # Wireprobe Core
//!
//! Core primitives and utilities shared by the Wireprobe protocol clients.
//! This crate provides the hashing and key-derivation building blocks used by
//! the authentication exchanges, plus the deadline and timing helpers that
//! every suspending network call is bounded by.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod crypto;
pub mod error;
pub mod utils;

/// Re-export common types for ease of use
pub use error::{CoreError, Result};
pub use utils::{Deadline, StringUtils, Timer};

/// Version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
