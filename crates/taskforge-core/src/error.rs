//! Core domain errors.

use thiserror::Error;

/// Core domain errors for taskforge.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Not one of the configured priority tiers.
    #[error("Unknown priority tier: {0}")]
    UnknownPriority(String),

    /// A wire envelope that could not be decoded.
    #[error("Malformed envelope: {0}")]
    Envelope(String),

    /// Persisted state written by an incompatible version.
    #[error("Unsupported state version {found} (expected {expected})")]
    StateVersion { found: u32, expected: u32 },
}
