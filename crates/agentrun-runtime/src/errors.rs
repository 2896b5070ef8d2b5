//! Runtime error types.
//!
//! Only misuse surfaces as an error from the orchestrator: calling an
//! operation in the wrong state or after dispose. Everything that goes wrong
//! while a run is live becomes `RunState::Failed` instead.

use agentrun_core::BackendError;

/// Errors returned synchronously by orchestrator, session, and runtime calls.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Operation not valid in the current state (or after dispose).
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Backend call outside a run failed (thread creation during spawn).
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Settings could not be loaded or were invalid.
    #[error("Settings error: {0}")]
    Settings(#[from] agentrun_settings::SettingsError),
}

impl RuntimeError {
    /// Shorthand for [`RuntimeError::IllegalState`].
    pub fn illegal(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Error category string for logging.
    pub fn category(&self) -> &str {
        match self {
            Self::IllegalState(_) => "illegal_state",
            Self::Backend(_) => "backend",
            Self::Settings(_) => "settings",
        }
    }
}
