//! `RunOrchestrator`: drives one thread through runs and client-tool hops.
//!
//! All state lives behind one `parking_lot::Mutex` that is never held across
//! an await. Network phases (create run, open stream, consume stream) run
//! outside the lock and re-check their *generation* when they come back. A
//! phase that is no longer current (cancelled, reset, disposed or superseded)
//! drops its result instead of transitioning, so a late `create_run` never
//! subscribes and never overwrites `Cancelled`.

use std::sync::Arc;

use futures::StreamExt;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use agentrun_core::conversation::ConversationStatus;
use agentrun_core::events::{RunAgentInput, run_endpoint};
use agentrun_core::{
    BackendError, ChatMessage, Conversation, Event, FailureReason, RunState, StreamingState,
    ThreadKey, ToolCallInfo, ToolRegistry, classify_failure,
};
use agentrun_settings::OrchestratorSettings;

use crate::backend::{AgUiTransport, BackendApi, EventStream};
use crate::errors::RuntimeError;
use crate::orchestrator::change_emitter::ChangeEmitter;
use crate::orchestrator::event_fold::{FoldOutcome, RunProgress, fold_event};

/// Error text when the stream closes before `RUN_FINISHED`/`RUN_ERROR`.
pub const STREAM_ENDED_ERROR: &str = "Stream ended without terminal event";

/// An in-flight network phase: setup of a run or a live subscription.
struct Phase {
    generation: u64,
    thread_key: ThreadKey,
    cancel: CancellationToken,
    /// Conversation to report if cancelled before the stream opens.
    snapshot: Conversation,
}

struct Core {
    state: RunState,
    phase: Option<Phase>,
    tool_depth: u32,
    generation: u64,
    disposed: bool,
}

impl Core {
    fn is_current(&self, generation: u64) -> bool {
        !self.disposed
            && self
                .phase
                .as_ref()
                .is_some_and(|p| p.generation == generation && !p.cancel.is_cancelled())
    }
}

struct Inner {
    api: Arc<dyn BackendApi>,
    transport: Arc<dyn AgUiTransport>,
    tools: Arc<ToolRegistry>,
    max_tool_depth: u32,
    core: Mutex<Core>,
    states: ChangeEmitter<RunState>,
}

/// State machine for one agent thread.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RunOrchestrator {
    inner: Arc<Inner>,
}

impl RunOrchestrator {
    /// Create an idle orchestrator.
    pub fn new(
        api: Arc<dyn BackendApi>,
        transport: Arc<dyn AgUiTransport>,
        tools: Arc<ToolRegistry>,
        settings: &OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                transport,
                tools,
                max_tool_depth: settings.max_tool_depth,
                core: Mutex::new(Core {
                    state: RunState::Idle,
                    phase: None,
                    tool_depth: 0,
                    generation: 0,
                    disposed: false,
                }),
                states: ChangeEmitter::with_capacity(settings.state_channel_capacity),
            }),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> RunState {
        self.inner.core.lock().state.clone()
    }

    /// Subscribe to state transitions, in transition order.
    ///
    /// The channel closes on [`dispose`](Self::dispose).
    pub fn subscribe(&self) -> broadcast::Receiver<RunState> {
        self.inner.states.subscribe()
    }

    /// Continuations made since the last `start_run` or `reset`.
    pub fn tool_depth(&self) -> u32 {
        self.inner.core.lock().tool_depth
    }

    /// Client tools this orchestrator yields for.
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.inner.tools
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.core.lock().disposed
    }

    /// Start a run on `thread_key`.
    ///
    /// Resolves once the stream is open (state `Running`) or setup failed
    /// (state `Failed`). Only misuse returns an error.
    #[instrument(skip_all, fields(thread = %thread_key))]
    pub async fn start_run(
        &self,
        thread_key: ThreadKey,
        user_message: &str,
        existing_run_id: Option<String>,
        cached_history: Option<Vec<ChatMessage>>,
    ) -> Result<(), RuntimeError> {
        let conversation = Conversation::new(thread_key.thread_id.clone())
            .with_messages(cached_history.unwrap_or_default())
            .with_message(ChatMessage::user(user_message));

        let (generation, cancel) = self.inner.begin_start(&thread_key, &conversation)?;
        info!(reuse_run = existing_run_id.is_some(), "starting run");

        Arc::clone(&self.inner)
            .run_phase(generation, thread_key, existing_run_id, conversation, cancel)
            .await;
        Ok(())
    }

    /// Cancel the active run or pending setup. No-op when idle or terminal.
    pub fn cancel_run(&self) {
        let mut core = self.inner.core.lock();
        let _ = self.inner.cancel_locked(&mut core);
    }

    /// Cancel anything in flight and return to `Idle`.
    pub fn reset(&self) {
        let mut core = self.inner.core.lock();
        if core.disposed {
            return;
        }
        let _ = self.inner.cancel_locked(&mut core);
        core.tool_depth = 0;
        if core.state != RunState::Idle {
            self.inner.transition(&mut core, RunState::Idle);
        }
    }

    /// Submit executed client tools and continue on a fresh run.
    ///
    /// Trips the depth circuit breaker (state `Failed`, no network call) once
    /// more than `max_tool_depth` continuations have been made.
    #[instrument(skip_all, fields(tools = executed_tools.len()))]
    pub async fn submit_tool_outputs(
        &self,
        executed_tools: Vec<ToolCallInfo>,
    ) -> Result<(), RuntimeError> {
        let Some((generation, thread_key, conversation, cancel)) =
            self.inner.begin_continuation(executed_tools)?
        else {
            return Ok(());
        };
        Arc::clone(&self.inner)
            .run_phase(generation, thread_key, None, conversation, cancel)
            .await;
        Ok(())
    }

    /// Cancel in-flight work and close the state channel. Idempotent.
    pub fn dispose(&self) {
        {
            let mut core = self.inner.core.lock();
            if core.disposed {
                return;
            }
            let _ = self.inner.cancel_locked(&mut core);
            core.disposed = true;
        }
        let _ = self.inner.states.close();
        debug!("orchestrator disposed");
    }
}

impl Inner {
    /// Set the state and notify subscribers. Called with the lock held so
    /// notifications follow transition order.
    fn transition(&self, core: &mut Core, next: RunState) {
        debug!(from = core.state.name(), to = next.name(), "run state transition");
        core.state = next.clone();
        let _ = self.states.emit(next);
    }

    fn begin_phase(
        core: &mut Core,
        thread_key: ThreadKey,
        snapshot: Conversation,
    ) -> (u64, CancellationToken) {
        core.generation += 1;
        let cancel = CancellationToken::new();
        core.phase = Some(Phase {
            generation: core.generation,
            thread_key,
            cancel: cancel.clone(),
            snapshot,
        });
        (core.generation, cancel)
    }

    fn begin_start(
        &self,
        thread_key: &ThreadKey,
        conversation: &Conversation,
    ) -> Result<(u64, CancellationToken), RuntimeError> {
        let mut core = self.core.lock();
        if core.disposed {
            return Err(RuntimeError::illegal("orchestrator is disposed"));
        }
        if core.phase.is_some() || core.state.is_active() {
            return Err(RuntimeError::illegal(format!(
                "a run is already active (state: {})",
                core.state.name()
            )));
        }
        core.tool_depth = 0;
        Ok(Self::begin_phase(
            &mut core,
            thread_key.clone(),
            conversation.clone(),
        ))
    }

    /// Validate a submit and prepare the continuation.
    ///
    /// `Ok(None)` means the circuit breaker tripped.
    fn begin_continuation(
        &self,
        executed_tools: Vec<ToolCallInfo>,
    ) -> Result<Option<(u64, ThreadKey, Conversation, CancellationToken)>, RuntimeError> {
        let mut core = self.core.lock();
        if core.disposed {
            return Err(RuntimeError::illegal("orchestrator is disposed"));
        }
        let (thread_key, mut conversation) = match &core.state {
            RunState::ToolYielding {
                thread_key,
                conversation,
                ..
            } if core.phase.is_none() => (thread_key.clone(), conversation.clone()),
            RunState::ToolYielding { .. } => {
                return Err(RuntimeError::illegal("a continuation is already in flight"));
            }
            other => {
                return Err(RuntimeError::illegal(format!(
                    "cannot submit tool outputs in state {}",
                    other.name()
                )));
            }
        };

        core.tool_depth += 1;
        if core.tool_depth > self.max_tool_depth {
            let error = format!("Tool call depth limit ({}) exceeded", self.max_tool_depth);
            self.fail(
                &mut core,
                thread_key,
                FailureReason::ToolExecutionFailed,
                error,
                Some(conversation),
            );
            return Ok(None);
        }

        for tool in &executed_tools {
            conversation.upsert_tool_call(tool.clone());
        }
        conversation = conversation.with_message(ChatMessage::tool_results(executed_tools));
        counter!("agent_tool_hops_total").increment(1);
        info!(depth = core.tool_depth, "continuing after client tools");

        let (generation, cancel) =
            Self::begin_phase(&mut core, thread_key.clone(), conversation.clone());
        Ok(Some((generation, thread_key, conversation, cancel)))
    }

    /// Create (or reuse) a run id, then open and consume its stream.
    async fn run_phase(
        self: Arc<Self>,
        generation: u64,
        thread_key: ThreadKey,
        run_id: Option<String>,
        conversation: Conversation,
        cancel: CancellationToken,
    ) {
        let run_id = match run_id {
            Some(id) => id,
            None => {
                let created = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(BackendError::Cancelled),
                    result = self.api.create_run(&thread_key) => result,
                };
                match created {
                    Ok(id) => id,
                    Err(error) => {
                        self.fail_phase(generation, &error);
                        return;
                    }
                }
            }
        };

        let Some(input) = self.run_input(generation, &run_id, &conversation) else {
            debug!("setup superseded before subscribing");
            return;
        };
        let endpoint = run_endpoint(&thread_key.room_id, &thread_key.thread_id, &run_id);
        debug!(%endpoint, "opening event stream");

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = self.transport.run_agent(&endpoint, input, cancel.clone()) => result,
        };
        let stream = match opened {
            Ok(stream) => stream,
            Err(error) => {
                self.fail_phase(generation, &error);
                return;
            }
        };

        if self.enter_running(generation, thread_key, run_id, conversation) {
            let _ = tokio::spawn(self.consume(generation, stream, cancel));
        }
    }

    fn run_input(
        &self,
        generation: u64,
        run_id: &str,
        conversation: &Conversation,
    ) -> Option<RunAgentInput> {
        if !self.core.lock().is_current(generation) {
            return None;
        }
        Some(RunAgentInput {
            thread_id: conversation.thread_id.clone(),
            run_id: run_id.to_owned(),
            messages: conversation.to_input_messages(),
            tools: self.tools.tool_definitions(),
            state: conversation.agui_state.clone(),
            context: Vec::new(),
            forwarded_props: serde_json::Value::Object(serde_json::Map::new()),
        })
    }

    fn enter_running(
        &self,
        generation: u64,
        thread_key: ThreadKey,
        run_id: String,
        mut conversation: Conversation,
    ) -> bool {
        let mut core = self.core.lock();
        if !core.is_current(generation) {
            debug!("stream opened after cancel; dropping it");
            return false;
        }
        conversation.status = ConversationStatus::Running;
        info!(%thread_key, %run_id, depth = core.tool_depth, "run streaming");
        counter!("agent_runs_started_total").increment(1);
        self.transition(
            &mut core,
            RunState::Running {
                thread_key,
                run_id,
                conversation,
                streaming: StreamingState::AwaitingText,
            },
        );
        true
    }

    async fn consume(
        self: Arc<Self>,
        generation: u64,
        mut stream: EventStream,
        cancel: CancellationToken,
    ) {
        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("subscription cancelled");
                    return;
                }
                item = stream.next() => item,
            };
            if !self.on_stream_item(generation, item) {
                return;
            }
        }
    }

    /// Apply one stream item. Returns false once the subscription is done.
    fn on_stream_item(&self, generation: u64, item: Option<Result<Event, BackendError>>) -> bool {
        let mut core = self.core.lock();
        if !core.is_current(generation) {
            return false;
        }
        match item {
            Some(Ok(event)) => self.apply_event(&mut core, event),
            Some(Err(error)) => {
                count_backend_error(&error);
                if let Some((thread_key, conversation)) = running_snapshot(&core.state) {
                    self.fail(
                        &mut core,
                        thread_key,
                        classify_failure(&error),
                        error.to_string(),
                        Some(conversation),
                    );
                }
                false
            }
            None => {
                if let Some((thread_key, conversation)) = running_snapshot(&core.state) {
                    self.fail(
                        &mut core,
                        thread_key,
                        FailureReason::NetworkLost,
                        STREAM_ENDED_ERROR.to_owned(),
                        Some(conversation),
                    );
                }
                false
            }
        }
    }

    fn apply_event(&self, core: &mut Core, event: Event) -> bool {
        let (thread_key, mut progress) = match std::mem::take(&mut core.state) {
            RunState::Running {
                thread_key,
                run_id,
                conversation,
                streaming,
            } => (
                thread_key,
                RunProgress {
                    run_id,
                    conversation,
                    streaming,
                },
            ),
            other => {
                core.state = other;
                return false;
            }
        };

        match fold_event(&mut progress, event) {
            FoldOutcome::Continue => {
                self.transition(
                    core,
                    RunState::Running {
                        thread_key,
                        run_id: progress.run_id,
                        conversation: progress.conversation,
                        streaming: progress.streaming,
                    },
                );
                true
            }
            FoldOutcome::Finished => {
                self.finish(core, thread_key, progress);
                false
            }
            FoldOutcome::Errored(message) => {
                self.fail(
                    core,
                    thread_key,
                    FailureReason::ServerError,
                    message,
                    Some(progress.conversation),
                );
                false
            }
        }
    }

    /// `RUN_FINISHED`: yield for registered client tools or complete.
    fn finish(&self, core: &mut Core, thread_key: ThreadKey, progress: RunProgress) {
        core.phase = None;
        let pending = progress
            .conversation
            .pending_client_calls(|name| self.tools.contains(name));

        if pending.is_empty() {
            info!(%thread_key, run_id = %progress.run_id, "run completed");
            counter!("agent_runs_finished_total", "outcome" => "completed").increment(1);
            self.transition(
                core,
                RunState::Completed {
                    thread_key,
                    run_id: progress.run_id,
                    conversation: progress.conversation,
                },
            );
        } else {
            info!(
                %thread_key,
                pending = pending.len(),
                depth = core.tool_depth,
                "yielding for client tools"
            );
            let tool_depth = core.tool_depth;
            self.transition(
                core,
                RunState::ToolYielding {
                    thread_key,
                    run_id: progress.run_id,
                    conversation: progress.conversation,
                    pending_tool_calls: pending,
                    tool_depth,
                },
            );
        }
    }

    fn fail(
        &self,
        core: &mut Core,
        thread_key: ThreadKey,
        reason: FailureReason,
        error: String,
        conversation: Option<Conversation>,
    ) {
        core.phase = None;
        warn!(%thread_key, %reason, error = %error, "run failed");
        counter!("agent_runs_finished_total", "outcome" => "failed").increment(1);
        self.transition(
            core,
            RunState::Failed {
                thread_key,
                reason,
                error,
                conversation,
            },
        );
    }

    /// Setup failed. Classified unless the phase was already superseded.
    fn fail_phase(&self, generation: u64, error: &BackendError) {
        let mut core = self.core.lock();
        if !core.is_current(generation) {
            debug!(error = %error, "setup result dropped after cancel");
            return;
        }
        let Some(phase) = core.phase.take() else {
            return;
        };
        count_backend_error(error);
        self.fail(
            &mut core,
            phase.thread_key,
            classify_failure(error),
            error.to_string(),
            Some(phase.snapshot),
        );
    }

    /// Cancel the current phase and move to `Cancelled`. Returns false when
    /// there was nothing to cancel.
    fn cancel_locked(&self, core: &mut Core) -> bool {
        let phase = core.phase.take();
        if let Some(phase) = &phase {
            phase.cancel.cancel();
        }
        let (thread_key, conversation) = match (&core.state, phase) {
            (
                RunState::Running {
                    thread_key,
                    conversation,
                    ..
                },
                _,
            ) => (thread_key.clone(), conversation.clone()),
            (_, Some(phase)) => (phase.thread_key, phase.snapshot),
            (
                RunState::ToolYielding {
                    thread_key,
                    conversation,
                    ..
                },
                None,
            ) => (thread_key.clone(), conversation.clone()),
            _ => return false,
        };
        info!(%thread_key, "run cancelled");
        counter!("agent_runs_finished_total", "outcome" => "cancelled").increment(1);
        self.transition(
            core,
            RunState::Cancelled {
                thread_key,
                conversation: Some(conversation),
            },
        );
        true
    }
}

fn count_backend_error(error: &BackendError) {
    counter!("agent_backend_errors_total", "kind" => error.error_kind()).increment(1);
}

fn running_snapshot(state: &RunState) -> Option<(ThreadKey, Conversation)> {
    match state {
        RunState::Running {
            thread_key,
            conversation,
            ..
        } => Some((thread_key.clone(), conversation.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackendApi;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays a fixed event list on every subscription.
    struct FixedTransport {
        events: Vec<Event>,
        subscriptions: AtomicUsize,
    }

    impl FixedTransport {
        fn new(events: Vec<Event>) -> Arc<Self> {
            Arc::new(Self {
                events,
                subscriptions: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AgUiTransport for FixedTransport {
        async fn run_agent(
            &self,
            _endpoint: &str,
            _input: RunAgentInput,
            _cancel: CancellationToken,
        ) -> Result<EventStream, BackendError> {
            let _ = self.subscriptions.fetch_add(1, Ordering::SeqCst);
            let items: Vec<Result<Event, BackendError>> =
                self.events.iter().cloned().map(Ok).collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn key() -> ThreadKey {
        ThreadKey::new("srv", "room", "t1")
    }

    fn finished() -> Vec<Event> {
        vec![
            Event::RunStarted {
                thread_id: "t1".into(),
                run_id: "run-1".into(),
            },
            Event::RunFinished {
                thread_id: "t1".into(),
                run_id: "run-1".into(),
            },
        ]
    }

    fn orchestrator(api: MockBackendApi, transport: Arc<FixedTransport>) -> RunOrchestrator {
        RunOrchestrator::new(
            Arc::new(api),
            transport,
            Arc::new(ToolRegistry::new("room")),
            &OrchestratorSettings::default(),
        )
    }

    async fn wait_terminal(orch: &RunOrchestrator) -> RunState {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state = orch.state();
                if state.is_terminal() || matches!(state, RunState::ToolYielding { .. }) {
                    return state;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn run_completes_without_tools() {
        let mut api = MockBackendApi::new();
        let _ = api.expect_create_run().times(1).returning(|_| Ok("run-1".into()));
        let orch = orchestrator(api, FixedTransport::new(finished()));

        orch.start_run(key(), "hi", None, None).await.unwrap();
        assert_matches!(wait_terminal(&orch).await, RunState::Completed { run_id, .. } if run_id == "run-1");
    }

    #[tokio::test]
    async fn existing_run_id_skips_create_run() {
        let mut api = MockBackendApi::new();
        let _ = api.expect_create_run().never();
        let orch = orchestrator(api, FixedTransport::new(finished()));

        orch.start_run(key(), "hi", Some("run-0".into()), None)
            .await
            .unwrap();
        assert_matches!(wait_terminal(&orch).await, RunState::Completed { .. });
    }

    #[tokio::test]
    async fn cached_history_precedes_user_message() {
        let mut api = MockBackendApi::new();
        let _ = api.expect_create_run().returning(|_| Ok("run-1".into()));
        let orch = orchestrator(api, FixedTransport::new(finished()));

        let history = vec![ChatMessage::text(
            "m0",
            agentrun_core::ChatRole::Assistant,
            "earlier",
        )];
        orch.start_run(key(), "now", None, Some(history))
            .await
            .unwrap();
        let state = wait_terminal(&orch).await;
        let conv = state.conversation().unwrap();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].id(), "m0");
    }

    #[tokio::test]
    async fn start_while_active_is_illegal() {
        let mut api = MockBackendApi::new();
        let _ = api.expect_create_run().returning(|_| Ok("run-1".into()));
        let orch = orchestrator(api, FixedTransport::new(Vec::new()));
        // Pending setup.
        {
            let mut core = orch.inner.core.lock();
            let _ = Inner::begin_phase(&mut core, key(), Conversation::new("t1"));
        }
        let err = orch.start_run(key(), "again", None, None).await.unwrap_err();
        assert_matches!(err, RuntimeError::IllegalState(_));
    }

    #[tokio::test]
    async fn submit_outside_tool_yielding_is_illegal() {
        let orch = orchestrator(MockBackendApi::new(), FixedTransport::new(Vec::new()));
        let err = orch.submit_tool_outputs(Vec::new()).await.unwrap_err();
        assert_matches!(err, RuntimeError::IllegalState(msg) if msg.contains("idle"));
    }

    #[test]
    fn cancel_from_idle_is_noop() {
        let orch = orchestrator(MockBackendApi::new(), FixedTransport::new(Vec::new()));
        let mut rx = orch.subscribe();
        orch.cancel_run();
        assert_eq!(orch.state(), RunState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn create_run_failure_is_classified() {
        let mut api = MockBackendApi::new();
        let _ = api
            .expect_create_run()
            .returning(|_| Err(BackendError::from_status(429, "slow down")));
        let transport = FixedTransport::new(finished());
        let orch = orchestrator(api, Arc::clone(&transport));

        orch.start_run(key(), "hi", None, None).await.unwrap();
        assert_matches!(
            orch.state(),
            RunState::Failed { reason: FailureReason::RateLimited, .. }
        );
        assert_eq!(transport.subscriptions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reset_returns_to_idle() {
        let mut api = MockBackendApi::new();
        let _ = api.expect_create_run().returning(|_| Ok("run-1".into()));
        let orch = orchestrator(api, FixedTransport::new(finished()));
        orch.start_run(key(), "hi", None, None).await.unwrap();
        let _ = wait_terminal(&orch).await;

        orch.reset();
        assert_eq!(orch.state(), RunState::Idle);
        assert_eq!(orch.tool_depth(), 0);
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_blocks_start() {
        let orch = orchestrator(MockBackendApi::new(), FixedTransport::new(Vec::new()));
        let mut rx = orch.subscribe();
        orch.dispose();
        orch.dispose();
        assert!(orch.is_disposed());
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));

        let err = orch.start_run(key(), "hi", None, None).await.unwrap_err();
        assert_matches!(err, RuntimeError::IllegalState(msg) if msg.contains("disposed"));
    }
}
