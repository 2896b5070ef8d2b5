//! Multi-session runtime.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `agent_runtime` | Spawn guards, session map, ephemeral thread cleanup, wait/cancel/dispose |

pub mod agent_runtime;

pub use agent_runtime::{AgentRuntime, SessionChange, SpawnOptions};
