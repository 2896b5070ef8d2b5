//! `AgentSession`: one orchestrator, its client-tool loop, and a settle-once
//! result.
//!
//! A driver task subscribes to the orchestrator before starting the run,
//! executes tool batches on `ToolYielding`, and settles the result on the
//! first terminal state it sees. The result slot is a `watch` channel whose
//! value moves from `None` to `Some` exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use agentrun_core::{FailureReason, RunState, SessionId, ThreadKey};

use crate::errors::RuntimeError;
use crate::orchestrator::RunOrchestrator;
use crate::session::result::{AgentResult, AgentSessionState};
use crate::session::tool_batch::execute_tool_batch;

struct SessionInner {
    id: SessionId,
    thread_key: ThreadKey,
    ephemeral: bool,
    orchestrator: RunOrchestrator,
    /// Fires on cancel/dispose; threaded into client tool executions.
    cancel: CancellationToken,
    created_at: Instant,
    started: AtomicBool,
    disposed: AtomicBool,
    state: watch::Sender<AgentSessionState>,
    result: watch::Sender<Option<AgentResult>>,
}

impl SessionInner {
    /// Latch `result` unless already settled. Returns true if this call won.
    fn settle(&self, result: AgentResult) -> bool {
        let next_state = result.session_state();
        let outcome = match &result {
            AgentResult::Success { .. } => "success",
            AgentResult::Failure { .. } => "failure",
            AgentResult::TimedOut { .. } => "timed_out",
        };
        let won = self.result.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
        if won {
            let _ = self.state.send_replace(next_state);
            info!(session = %self.id, thread = %self.thread_key, outcome, "session settled");
        }
        won
    }

    fn cancelled(&self, error: &str) -> AgentResult {
        AgentResult::Failure {
            thread_key: self.thread_key.clone(),
            reason: FailureReason::Cancelled,
            error: error.to_owned(),
            partial_output: None,
        }
    }

    fn settled(&self) -> Option<AgentResult> {
        self.result.borrow().clone()
    }
}

/// A single agent conversation driven to a final [`AgentResult`].
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AgentSession {
    inner: Arc<SessionInner>,
}

impl AgentSession {
    /// Wrap `orchestrator` for `thread_key`.
    pub fn new(thread_key: ThreadKey, ephemeral: bool, orchestrator: RunOrchestrator) -> Self {
        let (state, _) = watch::channel(AgentSessionState::Spawning);
        let (result, _) = watch::channel(None);
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::new(),
                thread_key,
                ephemeral,
                orchestrator,
                cancel: CancellationToken::new(),
                created_at: Instant::now(),
                started: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                state,
                result,
            }),
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Thread this session runs on.
    pub fn thread_key(&self) -> &ThreadKey {
        &self.inner.thread_key
    }

    /// Whether the runtime deletes the thread when the session ends.
    pub fn is_ephemeral(&self) -> bool {
        self.inner.ephemeral
    }

    /// Underlying orchestrator.
    pub fn orchestrator(&self) -> &RunOrchestrator {
        &self.inner.orchestrator
    }

    /// Coarse lifecycle state.
    pub fn state(&self) -> AgentSessionState {
        *self.inner.state.borrow()
    }

    /// Watch coarse lifecycle changes.
    pub fn state_changes(&self) -> watch::Receiver<AgentSessionState> {
        self.inner.state.subscribe()
    }

    /// Settled result, if any. Never blocks.
    pub fn result(&self) -> Option<AgentResult> {
        self.inner.settled()
    }

    /// Start the first run. Returns immediately; the run proceeds on a
    /// spawned driver task.
    #[instrument(skip_all, fields(session = %self.inner.id, thread = %self.inner.thread_key))]
    pub fn start(
        &self,
        prompt: impl Into<String>,
        existing_run_id: Option<String>,
    ) -> Result<(), RuntimeError> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(RuntimeError::illegal("session is disposed"));
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::illegal("session already started"));
        }
        let states = self.inner.orchestrator.subscribe();
        let _ = self.inner.state.send_replace(AgentSessionState::Running);
        let _ = tokio::spawn(drive(
            Arc::clone(&self.inner),
            states,
            prompt.into(),
            existing_run_id,
        ));
        Ok(())
    }

    /// Cancel the run and any executing tools.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        self.inner.orchestrator.cancel_run();
        if !self.inner.started.load(Ordering::SeqCst) {
            let _ = self
                .inner
                .settle(self.inner.cancelled("Session cancelled before start"));
        }
    }

    /// Wait for the result, optionally bounded by `timeout`.
    ///
    /// On expiry the session settles `TimedOut` (unless something settled
    /// first) and cancels the run.
    pub async fn await_result(&self, timeout: Option<Duration>) -> AgentResult {
        let mut rx = self.inner.result.subscribe();
        let settled = match timeout {
            None => wait_settled(&mut rx).await,
            Some(limit) => match tokio::time::timeout(limit, wait_settled(&mut rx)).await {
                Ok(settled) => settled,
                Err(_) => {
                    let timed_out = AgentResult::TimedOut {
                        thread_key: self.inner.thread_key.clone(),
                        elapsed: self.inner.created_at.elapsed(),
                    };
                    if self.inner.settle(timed_out) {
                        warn!(session = %self.inner.id, ?limit, "session timed out");
                        self.cancel();
                    }
                    self.inner.settled()
                }
            },
        };
        settled.unwrap_or_else(|| AgentResult::Failure {
            thread_key: self.inner.thread_key.clone(),
            reason: FailureReason::InternalError,
            error: "result channel closed".into(),
            partial_output: None,
        })
    }

    /// Tear down. Settles `Failure(Cancelled, "Session disposed")` if the
    /// session had not settled. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.settle(self.inner.cancelled("Session disposed"));
        self.inner.cancel.cancel();
        self.inner.orchestrator.dispose();
        debug!(session = %self.inner.id, "session disposed");
    }
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("id", &self.inner.id)
            .field("thread_key", &self.inner.thread_key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn wait_settled(rx: &mut watch::Receiver<Option<AgentResult>>) -> Option<AgentResult> {
    match rx.wait_for(Option::is_some).await {
        Ok(slot) => slot.clone(),
        Err(_) => None,
    }
}

/// Driver task: start the run, service tool yields, settle on terminal.
async fn drive(
    inner: Arc<SessionInner>,
    mut states: broadcast::Receiver<RunState>,
    prompt: String,
    existing_run_id: Option<String>,
) {
    if inner.cancel.is_cancelled() {
        let _ = inner.settle(inner.cancelled("Session cancelled before start"));
        return;
    }
    if let Err(error) = inner
        .orchestrator
        .start_run(inner.thread_key.clone(), &prompt, existing_run_id, None)
        .await
    {
        warn!(
            session = %inner.id,
            category = error.category(),
            error = %error,
            "run could not start"
        );
        let _ = inner.settle(AgentResult::Failure {
            thread_key: inner.thread_key.clone(),
            reason: FailureReason::InternalError,
            error: error.to_string(),
            partial_output: None,
        });
        return;
    }
    // A cancel that raced ahead of setup registration.
    if inner.cancel.is_cancelled() {
        inner.orchestrator.cancel_run();
    }

    let mut handled_depth: Option<u32> = None;
    loop {
        let observed = match states.recv().await {
            Ok(state) => state,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "state stream lagged; reading current state");
                inner.orchestrator.state()
            }
            Err(RecvError::Closed) => {
                let result = AgentResult::from_terminal(&inner.orchestrator.state())
                    .unwrap_or_else(|| inner.cancelled("Session disposed"));
                let _ = inner.settle(result);
                return;
            }
        };

        match observed {
            RunState::ToolYielding { .. } => {
                // Buffered yields can be stale; act on the live state only.
                let RunState::ToolYielding {
                    pending_tool_calls,
                    tool_depth,
                    ..
                } = inner.orchestrator.state()
                else {
                    continue;
                };
                if handled_depth.is_some_and(|d| d >= tool_depth) {
                    continue;
                }
                handled_depth = Some(tool_depth);

                let executed = execute_tool_batch(
                    inner.orchestrator.tools(),
                    pending_tool_calls,
                    &inner.cancel,
                )
                .await;
                if let Err(error) = inner.orchestrator.submit_tool_outputs(executed).await {
                    debug!(category = error.category(), error = %error, "tool outputs not submitted");
                }
            }
            state if state.is_terminal() => {
                if let Some(result) = AgentResult::from_terminal(&state) {
                    let _ = inner.settle(result);
                }
                return;
            }
            _ => {}
        }
    }
}
