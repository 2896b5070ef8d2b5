//! Backend error taxonomy and the failure classifier.
//!
//! Every error raised while a run is being set up or streamed is a
//! [`BackendError`]. [`classify_failure`] maps it onto the coarse
//! [`FailureReason`] carried by `RunState::Failed`; retry policy outside this
//! core keys on that reason.

use crate::run_state::FailureReason;

/// Errors raised by the backend API or the streaming transport.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Credentials were rejected or have expired.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Connectivity was lost or never established.
    #[error("network error: {0}")]
    Network(String),

    /// Transport-level failure, optionally with an HTTP status.
    #[error("transport error{}: {message}", status_suffix(.status))]
    Transport {
        /// HTTP-like status code, when the transport reported one.
        status: Option<u16>,
        /// Error body or description.
        message: String,
    },

    /// Response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The operation was cancelled via its token.
    #[error("cancelled")]
    Cancelled,

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Transport error carrying `status`.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Network(_) => "network",
            Self::Transport { .. } => "transport",
            Self::Decode(_) => "decode",
            Self::Cancelled => "cancelled",
            Self::Other(_) => "other",
        }
    }
}

#[allow(clippy::ref_option)]
fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

/// Map an error onto the failure taxonomy.
///
/// | Error | Reason |
/// |-------|--------|
/// | `Auth` | `AuthExpired` |
/// | `Network` | `NetworkLost` |
/// | `Transport` 401/403 | `AuthExpired` |
/// | `Transport` 429 | `RateLimited` |
/// | `Transport` other or no status | `ServerError` |
/// | anything else | `InternalError` |
pub fn classify_failure(error: &BackendError) -> FailureReason {
    match error {
        BackendError::Auth(_) => FailureReason::AuthExpired,
        BackendError::Network(_) => FailureReason::NetworkLost,
        BackendError::Transport { status, .. } => match status {
            Some(401 | 403) => FailureReason::AuthExpired,
            Some(429) => FailureReason::RateLimited,
            _ => FailureReason::ServerError,
        },
        BackendError::Decode(_) | BackendError::Cancelled | BackendError::Other(_) => {
            FailureReason::InternalError
        }
    }
}
