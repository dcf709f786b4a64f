//! Error types for the Kestrel scanner.
//!
//! Probe failures (timeout, unreachable) are outcomes, not errors; see
//! `probe::ProbeOutcome`. This enum covers everything that can actually
//! abort or degrade a run.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KestrelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid target: {0}")]
    TargetParse(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Fingerprint rule '{finger}' failed to compile: {detail}")]
    RuleCompile { finger: String, detail: String },

    #[error("Permission denied: {0}")]
    Privilege(String),

    #[error("Output sink error: {0}")]
    Sink(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for Kestrel operations
pub type KestrelResult<T> = Result<T, KestrelError>;
