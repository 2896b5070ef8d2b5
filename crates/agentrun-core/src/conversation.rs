//! Conversation model accumulated while a run streams.
//!
//! A [`Conversation`] is owned by the active orchestrator and handed out as a
//! cloned snapshot on every state transition. Tool-call records are keyed by
//! id: [`Conversation::upsert_tool_call`] is the only way records are added,
//! which keeps ids unique.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{InputFunctionCall, InputMessage, InputRole, InputToolCall};
use crate::ids::MessageId;

/// Author of a text message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatRole {
    /// End user.
    User,
    /// Agent output.
    Assistant,
    /// System prompt.
    System,
}

/// Lifecycle of a single tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolCallStatus {
    /// Requested by the backend, not yet run.
    Pending,
    /// Currently running on the client.
    Executing,
    /// Finished with a result.
    Completed,
    /// Finished with an error (error text stored as the result).
    Failed,
}

/// One tool invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallInfo {
    /// Unique within a run.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Serialized JSON arguments.
    pub arguments: String,
    /// Current status.
    pub status: ToolCallStatus,
    /// Serialized result, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl ToolCallInfo {
    /// A freshly requested call with no arguments yet.
    pub fn pending(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: String::new(),
            status: ToolCallStatus::Pending,
            result: None,
        }
    }

    /// Mark as completed with `result`.
    #[must_use]
    pub fn completed(mut self, result: impl Into<String>) -> Self {
        self.status = ToolCallStatus::Completed;
        self.result = Some(result.into());
        self
    }

    /// Mark as failed, keeping the error text as the result.
    #[must_use]
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = ToolCallStatus::Failed;
        self.result = Some(error.into());
        self
    }
}

/// An entry in the conversation history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChatMessage {
    /// Plain text from a user, the assistant, or the system.
    Text {
        /// Message id.
        id: String,
        /// Author.
        role: ChatRole,
        /// Full text.
        text: String,
        /// Creation time.
        created_at: DateTime<Utc>,
    },
    /// Tool calls and their results, synthesized after client execution.
    ToolCall {
        /// Message id.
        id: String,
        /// Executed calls with results.
        tool_calls: Vec<ToolCallInfo>,
        /// Creation time.
        created_at: DateTime<Utc>,
    },
    /// Error surfaced to the user.
    Error {
        /// Message id.
        id: String,
        /// Error text.
        message: String,
        /// Creation time.
        created_at: DateTime<Utc>,
    },
}

impl ChatMessage {
    /// New user text message with a generated id.
    pub fn user(text: impl Into<String>) -> Self {
        Self::text(MessageId::new().to_string(), ChatRole::User, text)
    }

    /// New text message with an explicit id.
    pub fn text(id: impl Into<String>, role: ChatRole, text: impl Into<String>) -> Self {
        Self::Text {
            id: id.into(),
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    /// Tool-result message carrying executed calls.
    pub fn tool_results(tool_calls: Vec<ToolCallInfo>) -> Self {
        Self::ToolCall {
            id: MessageId::new().to_string(),
            tool_calls,
            created_at: Utc::now(),
        }
    }

    /// Message id.
    pub fn id(&self) -> &str {
        match self {
            Self::Text { id, .. } | Self::ToolCall { id, .. } | Self::Error { id, .. } => id,
        }
    }
}

/// Coarse status of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ConversationStatus {
    /// No run has streamed yet.
    NotStarted,
    /// A run is streaming.
    Running,
    /// The last run finished.
    Completed,
    /// The last run failed.
    Failed {
        /// Error text.
        error: String,
    },
}

/// Accumulated domain state of one thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Thread this conversation belongs to.
    pub thread_id: String,
    /// Ordered message history.
    pub messages: Vec<ChatMessage>,
    /// Tool-call records, unique by id, in arrival order.
    pub tool_calls: Vec<ToolCallInfo>,
    /// Protocol-level state (`STATE_SNAPSHOT`).
    pub agui_state: Value,
    /// `STATE_DELTA` patches received but not applied here.
    pub pending_state_deltas: Vec<Value>,
    /// Coarse status.
    pub status: ConversationStatus,
}

impl Conversation {
    /// Empty conversation for `thread_id`.
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            tool_calls: Vec::new(),
            agui_state: Value::Object(serde_json::Map::new()),
            pending_state_deltas: Vec::new(),
            status: ConversationStatus::NotStarted,
        }
    }

    /// Seed from cached history.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Append a message.
    #[must_use]
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Insert or replace the record with `call.id`.
    pub fn upsert_tool_call(&mut self, call: ToolCallInfo) {
        if let Some(existing) = self.tool_calls.iter_mut().find(|tc| tc.id == call.id) {
            *existing = call;
        } else {
            self.tool_calls.push(call);
        }
    }

    /// Apply `f` to the record with `id`. Returns false if absent.
    pub fn update_tool_call(&mut self, id: &str, f: impl FnOnce(&mut ToolCallInfo)) -> bool {
        match self.tool_calls.iter_mut().find(|tc| tc.id == id) {
            Some(tc) => {
                f(tc);
                true
            }
            None => false,
        }
    }

    /// Pending calls whose name satisfies `is_client_tool`.
    pub fn pending_client_calls(&self, is_client_tool: impl Fn(&str) -> bool) -> Vec<ToolCallInfo> {
        self.tool_calls
            .iter()
            .filter(|tc| tc.status == ToolCallStatus::Pending && is_client_tool(&tc.name))
            .cloned()
            .collect()
    }

    /// Text of the last assistant message, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            ChatMessage::Text {
                role: ChatRole::Assistant,
                text,
                ..
            } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Encode the history as AG-UI input messages.
    ///
    /// A [`ChatMessage::ToolCall`] becomes one assistant message carrying
    /// `toolCalls` followed by one `tool` message per call that has a result.
    /// Error messages are local and never sent.
    pub fn to_input_messages(&self) -> Vec<InputMessage> {
        let mut out = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            match message {
                ChatMessage::Text { id, role, text, .. } => out.push(InputMessage {
                    id: id.clone(),
                    role: match role {
                        ChatRole::User => InputRole::User,
                        ChatRole::Assistant => InputRole::Assistant,
                        ChatRole::System => InputRole::System,
                    },
                    content: Some(text.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                }),
                ChatMessage::ToolCall { id, tool_calls, .. } => {
                    out.push(InputMessage {
                        id: id.clone(),
                        role: InputRole::Assistant,
                        content: None,
                        tool_calls: Some(
                            tool_calls
                                .iter()
                                .map(|tc| InputToolCall {
                                    id: tc.id.clone(),
                                    call_type: "function".into(),
                                    function: InputFunctionCall {
                                        name: tc.name.clone(),
                                        arguments: tc.arguments.clone(),
                                    },
                                })
                                .collect(),
                        ),
                        tool_call_id: None,
                    });
                    for tc in tool_calls {
                        if let Some(result) = &tc.result {
                            out.push(InputMessage {
                                id: format!("{id}-{}", tc.id),
                                role: InputRole::Tool,
                                content: Some(result.clone()),
                                tool_calls: None,
                                tool_call_id: Some(tc.id.clone()),
                            });
                        }
                    }
                }
                ChatMessage::Error { .. } => {}
            }
        }
        out
    }
}

/// Streaming cursor for the text message currently being assembled.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum StreamingState {
    /// No text message in flight.
    #[default]
    AwaitingText,
    /// A text message is streaming.
    TextStreaming {
        /// Message being assembled.
        message_id: String,
        /// Text so far.
        text: String,
    },
}
