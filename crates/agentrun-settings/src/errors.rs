//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating agentrun settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The settings file (or the merged layers) is not valid settings JSON.
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A limit the runtime divides work by was set below its minimum.
    #[error("{field} must be at least {min} (got {value})")]
    BelowMinimum {
        /// camelCase settings path, e.g. `platform.maxConcurrentBridges`.
        field: &'static str,
        /// Smallest accepted value.
        min: u64,
        /// Value that was rejected.
        value: u64,
    },
}

impl SettingsError {
    /// Reject `value` for `field` unless it is at least `min`.
    pub(crate) fn check_minimum(field: &'static str, value: u64, min: u64) -> Result<()> {
        if value < min {
            return Err(Self::BelowMinimum { field, min, value });
        }
        Ok(())
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
