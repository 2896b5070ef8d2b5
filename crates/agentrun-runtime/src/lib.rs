//! # agentrun-runtime
//!
//! Drives AG-UI agent runs to completion.
//!
//! - **Orchestrator**: [`RunOrchestrator`] owns one thread's [`RunState`](agentrun_core::RunState),
//!   opens the event stream, folds events, yields for client tools and
//!   continues on fresh runs up to a depth limit
//! - **Session**: [`AgentSession`] executes tool batches and settles exactly one [`AgentResult`]
//! - **Runtime**: [`AgentRuntime`] spawns sessions under the platform ceiling and
//!   deletes ephemeral threads
//! - **Backend**: [`BackendApi`] and [`AgUiTransport`] collaborator traits
//!
//! ## Crate Position
//!
//! Depends on agentrun-core and agentrun-settings. Hosts provide the
//! backend and transport implementations.

#![deny(unsafe_code)]

pub mod backend;
pub mod errors;
pub mod orchestrator;
pub mod runtime;
pub mod session;

pub use backend::{AgUiTransport, BackendApi, EventStream, ThreadInfo};
pub use errors::RuntimeError;
pub use orchestrator::{RunOrchestrator, STREAM_ENDED_ERROR};
pub use runtime::{AgentRuntime, SessionChange, SpawnOptions};
pub use session::{AgentResult, AgentSession, AgentSessionState};
