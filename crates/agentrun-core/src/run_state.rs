//! The run lifecycle state machine.
//!
//! ```text
//!            start_run                RUN_FINISHED (client calls pending)
//!   Idle ───────────────▶ Running ─────────────────────────▶ ToolYielding
//!                          │  ▲                                  │
//!                          │  └──────── submit_tool_outputs ─────┘
//!                          │
//!                          ├─ RUN_FINISHED (nothing pending) ─▶ Completed
//!                          ├─ RUN_ERROR / stream error ───────▶ Failed
//!                          └─ cancel_run ─────────────────────▶ Cancelled
//! ```
//!
//! `Completed`, `Failed` and `Cancelled` are terminal. Only `reset` returns to
//! `Idle`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::conversation::{Conversation, StreamingState, ToolCallInfo};
use crate::ids::ThreadKey;

/// Why a run failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    /// Credentials rejected or expired.
    AuthExpired,
    /// Connectivity lost, or the stream ended without a terminal event.
    NetworkLost,
    /// Backend throttled the request.
    RateLimited,
    /// Backend reported an error.
    ServerError,
    /// Client tool loop failed (including the depth circuit breaker).
    ToolExecutionFailed,
    /// Unexpected local error.
    InternalError,
    /// The user cancelled. Never produced by the classifier.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AuthExpired => "auth_expired",
            Self::NetworkLost => "network_lost",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ToolExecutionFailed => "tool_execution_failed",
            Self::InternalError => "internal_error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of one orchestrated run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RunState {
    /// No run.
    #[default]
    Idle,

    /// Subscribed to a live event stream.
    Running {
        /// Thread being run.
        thread_key: ThreadKey,
        /// Backend run id.
        run_id: String,
        /// Conversation so far.
        conversation: Conversation,
        /// Text message being assembled.
        streaming: StreamingState,
    },

    /// The run finished but client tool calls are waiting to be executed.
    ToolYielding {
        /// Thread being run.
        thread_key: ThreadKey,
        /// Run that requested the tools.
        run_id: String,
        /// Conversation including the pending calls.
        conversation: Conversation,
        /// Client calls to execute, in request order.
        pending_tool_calls: Vec<ToolCallInfo>,
        /// Continuations already made in this orchestrator.
        tool_depth: u32,
    },

    /// The run finished with nothing left to execute.
    Completed {
        /// Thread that was run.
        thread_key: ThreadKey,
        /// Final run id.
        run_id: String,
        /// Final conversation.
        conversation: Conversation,
    },

    /// The run aborted.
    Failed {
        /// Thread that was run.
        thread_key: ThreadKey,
        /// Classified reason.
        reason: FailureReason,
        /// Human-readable error.
        error: String,
        /// Last known conversation, if the run got that far.
        conversation: Option<Conversation>,
    },

    /// The user cancelled the run.
    Cancelled {
        /// Thread that was run.
        thread_key: ThreadKey,
        /// Conversation at cancel time, if any.
        conversation: Option<Conversation>,
    },
}

impl RunState {
    /// Whether no further transition is possible without `reset`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }

    /// Whether a run is in flight (streaming or waiting on tools).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running { .. } | Self::ToolYielding { .. })
    }

    /// Thread of the current run, if any.
    pub fn thread_key(&self) -> Option<&ThreadKey> {
        match self {
            Self::Idle => None,
            Self::Running { thread_key, .. }
            | Self::ToolYielding { thread_key, .. }
            | Self::Completed { thread_key, .. }
            | Self::Failed { thread_key, .. }
            | Self::Cancelled { thread_key, .. } => Some(thread_key),
        }
    }

    /// Latest conversation snapshot, if any.
    pub fn conversation(&self) -> Option<&Conversation> {
        match self {
            Self::Idle => None,
            Self::Running { conversation, .. }
            | Self::ToolYielding { conversation, .. }
            | Self::Completed { conversation, .. } => Some(conversation),
            Self::Failed { conversation, .. } | Self::Cancelled { conversation, .. } => {
                conversation.as_ref()
            }
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running { .. } => "running",
            Self::ToolYielding { .. } => "tool_yielding",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}
