//! Collaborator contracts: the backend REST API and the AG-UI stream transport.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use agentrun_core::events::RunAgentInput;
use agentrun_core::{BackendError, Event, ThreadKey};

/// Stream of decoded protocol events for one run.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, BackendError>> + Send>>;

/// Thread metadata returned by [`BackendApi::create_thread`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadInfo {
    /// New thread id.
    pub id: String,
    /// Run created together with the thread, if the backend made one.
    pub initial_run_id: Option<String>,
}

/// Backend REST operations used by the core.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Create a thread in `room_id`. Returns the thread and its initial AG-UI state.
    async fn create_thread(&self, room_id: &str) -> Result<(ThreadInfo, Value), BackendError>;

    /// Allocate a new run id on an existing thread.
    async fn create_run(&self, thread_key: &ThreadKey) -> Result<String, BackendError>;

    /// Delete a thread.
    async fn delete_thread(&self, room_id: &str, thread_id: &str) -> Result<(), BackendError>;
}

/// Opens AG-UI event streams.
#[async_trait]
pub trait AgUiTransport: Send + Sync {
    /// Start a run at `endpoint` and stream its events.
    ///
    /// Implementations should stop yielding once `cancel` fires.
    async fn run_agent(
        &self,
        endpoint: &str,
        input: RunAgentInput,
        cancel: CancellationToken,
    ) -> Result<EventStream, BackendError>;
}
