//! Client tool contract and the room-scoped [`ToolRegistry`].
//!
//! The registry is an explicit capability handed to the orchestrator at
//! construction. The orchestrator only asks it two things: whether a tool name
//! is registered (client-executed) and which definitions to declare to the
//! backend. Execution goes through [`ToolRegistry::execute`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::conversation::ToolCallInfo;

/// Tool schema declared to the backend in every run input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name as the backend will request it.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// Errors raised while executing a client tool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// No tool with this name is registered.
    #[error("Tool not found: {0}")]
    NotFound(String),
    /// The serialized arguments were not valid for the tool.
    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments {
        /// Tool name.
        tool: String,
        /// Parse or validation error.
        message: String,
    },
    /// The tool ran and failed.
    #[error("Tool {tool} failed: {message}")]
    Execution {
        /// Tool name.
        tool: String,
        /// Failure description.
        message: String,
    },
    /// Execution was cancelled before it finished.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Context passed to a tool invocation.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Room the registry is scoped to.
    pub room_id: String,
    /// Fires when the owning session is cancelled.
    pub cancellation: CancellationToken,
}

/// A tool executed on the client side of the protocol.
#[async_trait]
pub trait ClientTool: Send + Sync {
    /// Schema declared to the backend.
    fn definition(&self) -> ToolDefinition;

    /// Execute one call, returning the serialized result.
    async fn execute(&self, call: &ToolCallInfo, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Registry of client tools for one room.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    room_id: String,
    tools: HashMap<String, Arc<dyn ClientTool>>,
}

impl ToolRegistry {
    /// Create an empty registry scoped to `room_id`.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            tools: HashMap::new(),
        }
    }

    /// Room this registry was built for.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Register a tool under its definition name. Replaces any previous entry.
    pub fn register(&mut self, tool: Arc<dyn ClientTool>) {
        let name = tool.definition().name;
        let _ = self.tools.insert(name, tool);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn ClientTool>) -> Self {
        self.register(tool);
        self
    }

    /// Whether `name` is a client tool.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Definitions sent to the backend, sorted by name.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a call through the registered tool.
    pub async fn execute(
        &self,
        call: &ToolCallInfo,
        cancellation: &CancellationToken,
    ) -> Result<String, ToolError> {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(room = %self.room_id, tool = %call.name, "tool not registered");
            return Err(ToolError::NotFound(call.name.clone()));
        };
        if cancellation.is_cancelled() {
            debug!(tool = %call.name, id = %call.id, "skipping tool, already cancelled");
            return Err(ToolError::Cancelled);
        }
        let ctx = ToolContext {
            room_id: self.room_id.clone(),
            cancellation: cancellation.clone(),
        };
        tool.execute(call, &ctx).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry")
            .field("room_id", &self.room_id)
            .field("tools", &names)
            .finish()
    }
}

/// Builds a fresh registry for each spawned session.
pub trait ToolRegistryFactory: Send + Sync {
    /// Registry scoped to `room_id`.
    fn build(&self, room_id: &str) -> ToolRegistry;
}

impl<F> ToolRegistryFactory for F
where
    F: Fn(&str) -> ToolRegistry + Send + Sync,
{
    fn build(&self, room_id: &str) -> ToolRegistry {
        self(room_id)
    }
}
