//! AG-UI protocol types consumed and produced by a run.
//!
//! Two families:
//!
//! - **[`Event`]**: typed events delivered by the streaming transport while a
//!   run is live. The orchestrator folds these into conversation state.
//! - **[`RunAgentInput`]**: the structured request body that opens a run
//!   (thread id, run id, message history, declared client tools).
//!
//! Decoding events off the wire is the transport's concern; this module only
//! fixes their shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolDefinition;

// ─────────────────────────────────────────────────────────────────────────────
// Event: streaming protocol events
// ─────────────────────────────────────────────────────────────────────────────

/// Events emitted by the backend while a run is streaming.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The backend accepted the run.
    #[serde(rename = "RUN_STARTED")]
    RunStarted {
        /// Thread the run belongs to.
        #[serde(rename = "threadId")]
        thread_id: String,
        /// Backend run id.
        #[serde(rename = "runId")]
        run_id: String,
    },

    /// The run finished successfully.
    #[serde(rename = "RUN_FINISHED")]
    RunFinished {
        /// Thread the run belongs to.
        #[serde(rename = "threadId")]
        thread_id: String,
        /// Backend run id.
        #[serde(rename = "runId")]
        run_id: String,
    },

    /// The run aborted on the server side.
    #[serde(rename = "RUN_ERROR")]
    RunError {
        /// Human-readable error text.
        message: String,
        /// Optional machine-readable code.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// A step within the run started.
    #[serde(rename = "STEP_STARTED")]
    StepStarted {
        /// Step name.
        #[serde(rename = "stepName")]
        step_name: String,
    },

    /// A step within the run finished.
    #[serde(rename = "STEP_FINISHED")]
    StepFinished {
        /// Step name.
        #[serde(rename = "stepName")]
        step_name: String,
    },

    /// An assistant text message started streaming.
    #[serde(rename = "TEXT_MESSAGE_START")]
    TextMessageStart {
        /// Message id shared by the content/end events.
        #[serde(rename = "messageId")]
        message_id: String,
    },

    /// Incremental assistant text.
    #[serde(rename = "TEXT_MESSAGE_CONTENT")]
    TextMessageContent {
        /// Message id.
        #[serde(rename = "messageId")]
        message_id: String,
        /// Text fragment.
        delta: String,
    },

    /// The assistant text message is complete.
    #[serde(rename = "TEXT_MESSAGE_END")]
    TextMessageEnd {
        /// Message id.
        #[serde(rename = "messageId")]
        message_id: String,
    },

    /// A tool call started.
    #[serde(rename = "TOOL_CALL_START")]
    ToolCallStart {
        /// Tool call id, unique within the run.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        #[serde(rename = "toolCallName")]
        tool_call_name: String,
        /// Assistant message the call is attached to.
        #[serde(rename = "parentMessageId", skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },

    /// Incremental tool call argument JSON.
    #[serde(rename = "TOOL_CALL_ARGS")]
    ToolCallArgs {
        /// Tool call id.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Partial JSON arguments.
        delta: String,
    },

    /// Tool call arguments are complete.
    #[serde(rename = "TOOL_CALL_END")]
    ToolCallEnd {
        /// Tool call id.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
    },

    /// A server-executed tool produced a result.
    #[serde(rename = "TOOL_CALL_RESULT")]
    ToolCallResult {
        /// Message id of the result.
        #[serde(rename = "messageId")]
        message_id: String,
        /// Tool call the result belongs to.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Serialized result content.
        content: String,
    },

    /// Complete replacement of the protocol state.
    #[serde(rename = "STATE_SNAPSHOT")]
    StateSnapshot {
        /// New state.
        snapshot: Value,
    },

    /// Incremental protocol state change (RFC 6902 JSON Patch operations).
    #[serde(rename = "STATE_DELTA")]
    StateDelta {
        /// Patch operations.
        delta: Vec<Value>,
    },

    /// Complete message history snapshot.
    #[serde(rename = "MESSAGES_SNAPSHOT")]
    MessagesSnapshot {
        /// Messages in AG-UI shape.
        messages: Vec<Value>,
    },

    /// Application-defined event.
    #[serde(rename = "CUSTOM")]
    Custom {
        /// Event name.
        name: String,
        /// Event payload.
        value: Value,
    },
}

impl Event {
    /// Protocol type tag, useful for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "RUN_STARTED",
            Self::RunFinished { .. } => "RUN_FINISHED",
            Self::RunError { .. } => "RUN_ERROR",
            Self::StepStarted { .. } => "STEP_STARTED",
            Self::StepFinished { .. } => "STEP_FINISHED",
            Self::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            Self::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            Self::ToolCallStart { .. } => "TOOL_CALL_START",
            Self::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            Self::ToolCallEnd { .. } => "TOOL_CALL_END",
            Self::ToolCallResult { .. } => "TOOL_CALL_RESULT",
            Self::StateSnapshot { .. } => "STATE_SNAPSHOT",
            Self::StateDelta { .. } => "STATE_DELTA",
            Self::MessagesSnapshot { .. } => "MESSAGES_SNAPSHOT",
            Self::Custom { .. } => "CUSTOM",
        }
    }

    /// Whether this event ends the run from the protocol's point of view.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished { .. } | Self::RunError { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RunAgentInput: request body for a run
// ─────────────────────────────────────────────────────────────────────────────

/// Role of an AG-UI input message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputRole {
    /// End user.
    User,
    /// Model output.
    Assistant,
    /// System prompt.
    System,
    /// Tool result.
    Tool,
}

/// Function invocation inside an assistant message's `toolCalls`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputFunctionCall {
    /// Tool name.
    pub name: String,
    /// Serialized JSON arguments.
    pub arguments: String,
}

/// One tool call attached to an assistant input message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputToolCall {
    /// Tool call id.
    pub id: String,
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub call_type: String,
    /// Invocation details.
    pub function: InputFunctionCall,
}

/// A message in the history sent with a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    /// Message id.
    pub id: String,
    /// Author role.
    pub role: InputRole,
    /// Text content (tool output for `tool` messages).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls requested by an assistant message.
    #[serde(rename = "toolCalls", skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<InputToolCall>>,
    /// For `tool` messages, the call this result answers.
    #[serde(rename = "toolCallId", skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Structured input that opens a streaming run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunAgentInput {
    /// Thread id.
    #[serde(rename = "threadId")]
    pub thread_id: String,
    /// Run id obtained from the backend.
    #[serde(rename = "runId")]
    pub run_id: String,
    /// Full message history for the run.
    pub messages: Vec<InputMessage>,
    /// Client tools the backend may request.
    pub tools: Vec<ToolDefinition>,
    /// Current protocol state.
    pub state: Value,
    /// Extra context entries (unused by this core; always empty).
    pub context: Vec<Value>,
    /// Opaque properties forwarded to the agent.
    #[serde(rename = "forwardedProps")]
    pub forwarded_props: Value,
}

/// Endpoint path for a run, relative to the backend base URL.
pub fn run_endpoint(room_id: &str, thread_id: &str, run_id: &str) -> String {
    format!("rooms/{room_id}/agui/{thread_id}/{run_id}")
}
