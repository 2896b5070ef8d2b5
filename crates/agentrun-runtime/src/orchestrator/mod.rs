//! Run orchestration for a single thread.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `run_orchestrator` | `RunState` machine, run setup, stream consumption, tool hops |
//! | `event_fold` | Pure event → conversation folding |
//! | `change_emitter` | Broadcast channel with explicit close |

pub mod change_emitter;
pub mod event_fold;
pub mod run_orchestrator;

pub use change_emitter::ChangeEmitter;
pub use run_orchestrator::{RunOrchestrator, STREAM_ENDED_ERROR};
