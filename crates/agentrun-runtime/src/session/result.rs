//! Session outcome and coarse lifecycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use agentrun_core::{FailureReason, RunState, ThreadKey};

/// Coarse projection of the orchestrator state for UI and runtime bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentSessionState {
    /// Created, not yet started.
    Spawning,
    /// A run (or tool hop) is in progress.
    Running,
    /// Settled with `Success`.
    Completed,
    /// Settled with a non-cancel failure.
    Failed,
    /// Cancelled, disposed or timed out.
    Cancelled,
}

impl AgentSessionState {
    /// Whether the session has settled.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Final outcome of a session. Settled exactly once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum AgentResult {
    /// The run completed.
    Success {
        /// Thread that was run.
        thread_key: ThreadKey,
        /// Final run id.
        run_id: String,
        /// Last assistant text, empty if none.
        output: String,
    },
    /// The run failed or was cancelled.
    Failure {
        /// Thread that was run.
        thread_key: ThreadKey,
        /// Classified reason.
        reason: FailureReason,
        /// Error text.
        error: String,
        /// Last assistant text produced before the failure.
        partial_output: Option<String>,
    },
    /// The caller's timeout expired first.
    TimedOut {
        /// Thread that was run.
        thread_key: ThreadKey,
        /// Time since the session was created.
        elapsed: Duration,
    },
}

impl AgentResult {
    /// Whether this is `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Thread the result belongs to.
    pub fn thread_key(&self) -> &ThreadKey {
        match self {
            Self::Success { thread_key, .. }
            | Self::Failure { thread_key, .. }
            | Self::TimedOut { thread_key, .. } => thread_key,
        }
    }

    /// Coarse session state this result settles into.
    pub fn session_state(&self) -> AgentSessionState {
        match self {
            Self::Success { .. } => AgentSessionState::Completed,
            Self::Failure {
                reason: FailureReason::Cancelled,
                ..
            }
            | Self::TimedOut { .. } => AgentSessionState::Cancelled,
            Self::Failure { .. } => AgentSessionState::Failed,
        }
    }

    /// Result for a terminal run state. `None` for non-terminal states.
    pub fn from_terminal(state: &RunState) -> Option<Self> {
        match state {
            RunState::Completed {
                thread_key,
                run_id,
                conversation,
            } => Some(Self::Success {
                thread_key: thread_key.clone(),
                run_id: run_id.clone(),
                output: conversation
                    .last_assistant_text()
                    .unwrap_or_default()
                    .to_owned(),
            }),
            RunState::Failed {
                thread_key,
                reason,
                error,
                conversation,
            } => Some(Self::Failure {
                thread_key: thread_key.clone(),
                reason: *reason,
                error: error.clone(),
                partial_output: partial(conversation.as_ref()),
            }),
            RunState::Cancelled {
                thread_key,
                conversation,
            } => Some(Self::Failure {
                thread_key: thread_key.clone(),
                reason: FailureReason::Cancelled,
                error: "Run cancelled".into(),
                partial_output: partial(conversation.as_ref()),
            }),
            RunState::Idle | RunState::Running { .. } | RunState::ToolYielding { .. } => None,
        }
    }
}

fn partial(conversation: Option<&agentrun_core::Conversation>) -> Option<String> {
    conversation
        .and_then(agentrun_core::Conversation::last_assistant_text)
        .map(str::to_owned)
}
