//! Agent sessions: one orchestrator driven to a single result.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `agent_session` | Driver task, cancel/dispose, settle-once result, timeout |
//! | `result` | `AgentResult` and the coarse `AgentSessionState` |
//! | `tool_batch` | Concurrent client tool execution with per-tool isolation |

pub mod agent_session;
pub mod result;
pub mod tool_batch;

pub use agent_session::AgentSession;
pub use result::{AgentResult, AgentSessionState};
