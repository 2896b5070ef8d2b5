//! # agentrun-core
//!
//! Foundation types for driving AG-UI agent runs.
//!
//! - **Ids**: [`ids::ThreadKey`] `(server, room, thread)` and branded [`ids::SessionId`]
//! - **Events**: [`events::Event`] streamed by the backend, [`events::RunAgentInput`] sent to it
//! - **Conversation**: [`conversation::Conversation`], [`conversation::ToolCallInfo`], streaming cursor
//! - **Run state**: [`run_state::RunState`] closed enum and [`run_state::FailureReason`]
//! - **Errors**: [`errors::BackendError`] and [`errors::classify_failure`]
//! - **Tools**: [`tools::ToolRegistry`] capability and the [`tools::ClientTool`] trait
//! - **Logging**: [`logging::init_subscriber`]
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by agentrun-runtime.

#![deny(unsafe_code)]

pub mod conversation;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod run_state;
pub mod tools;

pub use conversation::{
    ChatMessage, ChatRole, Conversation, ConversationStatus, StreamingState, ToolCallInfo,
    ToolCallStatus,
};
pub use errors::{BackendError, classify_failure};
pub use events::{Event, RunAgentInput};
pub use ids::{SessionId, ThreadKey};
pub use run_state::{FailureReason, RunState};
pub use tools::{ClientTool, ToolContext, ToolDefinition, ToolError, ToolRegistry, ToolRegistryFactory};
