//! Scripted backend, transport, and tools shared by the scenario tests.

#![allow(dead_code, missing_docs)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use agentrun_core::events::RunAgentInput;
use agentrun_core::{
    BackendError, ClientTool, Event, RunState, ThreadKey, ToolCallInfo, ToolContext,
    ToolDefinition, ToolError, ToolRegistry,
};
use agentrun_runtime::{AgUiTransport, BackendApi, EventStream, RunOrchestrator, ThreadInfo};
use agentrun_settings::OrchestratorSettings;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    agentrun_core::logging::init_subscriber("warn");
}

pub fn key() -> ThreadKey {
    ThreadKey::new("srv", "room", "thread-1")
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Backend whose `create_run` results can be scripted. Unscripted calls
/// return `run-N` where N counts calls from 1.
#[derive(Default)]
pub struct MockBackend {
    create_run_script: Mutex<VecDeque<Result<String, BackendError>>>,
    create_run_delay: Mutex<Option<Duration>>,
    create_run_calls: AtomicUsize,
    threads_created: AtomicUsize,
    initial_run_ids: bool,
    delete_error: Option<BackendError>,
    deleted: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Threads come back with an initial run id (`initial-N`).
    #[must_use]
    pub fn with_initial_run_ids(mut self) -> Self {
        self.initial_run_ids = true;
        self
    }

    /// Every `delete_thread` fails with `error`.
    #[must_use]
    pub fn with_delete_error(mut self, error: BackendError) -> Self {
        self.delete_error = Some(error);
        self
    }

    pub fn script_create_run(&self, result: Result<String, BackendError>) {
        self.create_run_script.lock().push_back(result);
    }

    pub fn set_create_run_delay(&self, delay: Duration) {
        *self.create_run_delay.lock() = Some(delay);
    }

    pub fn create_run_count(&self) -> usize {
        self.create_run_calls.load(Ordering::SeqCst)
    }

    pub fn threads_created(&self) -> usize {
        self.threads_created.load(Ordering::SeqCst)
    }

    pub fn deleted_threads(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl BackendApi for MockBackend {
    async fn create_thread(&self, _room_id: &str) -> Result<(ThreadInfo, Value), BackendError> {
        let n = self.threads_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((
            ThreadInfo {
                id: format!("thread-{n}"),
                initial_run_id: self.initial_run_ids.then(|| format!("initial-{n}")),
            },
            json!({}),
        ))
    }

    async fn create_run(&self, _thread_key: &ThreadKey) -> Result<String, BackendError> {
        let n = self.create_run_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.create_run_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.create_run_script.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("run-{n}")))
    }

    async fn delete_thread(&self, _room_id: &str, thread_id: &str) -> Result<(), BackendError> {
        self.deleted.lock().push(thread_id.to_owned());
        match &self.delete_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// What one subscription does.
#[derive(Clone)]
pub enum Script {
    /// Yield the events, then end the stream.
    Events(Vec<Event>),
    /// Yield the events, then a stream error.
    EventsThenError(Vec<Event>, BackendError),
    /// Yield the events, then stay open until cancelled.
    Hang(Vec<Event>),
    /// Refuse to open the stream.
    Refuse(BackendError),
}

/// Transport that plays one [`Script`] per subscription, in order. Once the
/// scripts run out, subscriptions hang.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    inputs: Mutex<Vec<(String, RunAgentInput)>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    /// Number of `run_agent` calls.
    pub fn subscriptions(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Endpoints and inputs, in call order.
    pub fn inputs(&self) -> Vec<(String, RunAgentInput)> {
        self.inputs.lock().clone()
    }

    pub fn run_ids(&self) -> Vec<String> {
        self.inputs
            .lock()
            .iter()
            .map(|(_, input)| input.run_id.clone())
            .collect()
    }
}

#[async_trait]
impl AgUiTransport for ScriptedTransport {
    async fn run_agent(
        &self,
        endpoint: &str,
        input: RunAgentInput,
        cancel: CancellationToken,
    ) -> Result<EventStream, BackendError> {
        self.inputs.lock().push((endpoint.to_owned(), input));
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Hang(Vec::new()));

        let (events, tail) = match script {
            Script::Refuse(error) => return Err(error),
            Script::Events(events) => (events, None),
            Script::EventsThenError(events, error) => (events, Some(Err(error))),
            Script::Hang(events) => (events, Some(Ok(()))),
        };

        let stream = async_stream::stream! {
            for event in events {
                yield Ok(event);
            }
            match tail {
                None => {}
                Some(Err(error)) => {
                    yield Err(error);
                }
                Some(Ok(())) => {
                    cancel.cancelled().await;
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event scripts
// ─────────────────────────────────────────────────────────────────────────────

pub fn run_started(run_id: &str) -> Event {
    Event::RunStarted {
        thread_id: "thread-1".into(),
        run_id: run_id.into(),
    }
}

pub fn run_finished(run_id: &str) -> Event {
    Event::RunFinished {
        thread_id: "thread-1".into(),
        run_id: run_id.into(),
    }
}

/// A run that streams one assistant text message and finishes.
pub fn text_reply(message_id: &str, text: &str) -> Vec<Event> {
    vec![
        run_started("r"),
        Event::TextMessageStart {
            message_id: message_id.into(),
        },
        Event::TextMessageContent {
            message_id: message_id.into(),
            delta: text.into(),
        },
        Event::TextMessageEnd {
            message_id: message_id.into(),
        },
        run_finished("r"),
    ]
}

/// A run that requests one tool call and finishes.
pub fn tool_request(tool_call_id: &str, name: &str, args: &str) -> Vec<Event> {
    vec![
        run_started("r"),
        Event::ToolCallStart {
            tool_call_id: tool_call_id.into(),
            tool_call_name: name.into(),
            parent_message_id: None,
        },
        Event::ToolCallArgs {
            tool_call_id: tool_call_id.into(),
            delta: args.into(),
        },
        Event::ToolCallEnd {
            tool_call_id: tool_call_id.into(),
        },
        run_finished("r"),
    ]
}

/// A run that requests several tool calls in one batch and finishes.
pub fn tool_batch_request(calls: &[(&str, &str, &str)]) -> Vec<Event> {
    let mut events = vec![run_started("r")];
    for (tool_call_id, name, args) in calls {
        events.push(Event::ToolCallStart {
            tool_call_id: (*tool_call_id).into(),
            tool_call_name: (*name).into(),
            parent_message_id: None,
        });
        events.push(Event::ToolCallArgs {
            tool_call_id: (*tool_call_id).into(),
            delta: (*args).into(),
        });
        events.push(Event::ToolCallEnd {
            tool_call_id: (*tool_call_id).into(),
        });
    }
    events.push(run_finished("r"));
    events
}

// ─────────────────────────────────────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────────────────────────────────────

/// Client tool that answers `results for <args>` and counts calls.
pub struct SearchTool {
    pub name: &'static str,
    pub calls: AtomicUsize,
}

impl SearchTool {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientTool for SearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.into(),
            description: "Search the knowledge base".into(),
            parameters: json!({
                "type": "object",
                "properties": {"q": {"type": "string"}},
            }),
        }
    }

    async fn execute(&self, call: &ToolCallInfo, _ctx: &ToolContext) -> Result<String, ToolError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("results for {}", call.arguments))
    }
}

/// Client tool that always fails with a fixed message.
pub struct FailingTool {
    pub name: &'static str,
    pub message: &'static str,
}

impl FailingTool {
    pub fn new(name: &'static str, message: &'static str) -> Self {
        Self { name, message }
    }
}

#[async_trait]
impl ClientTool for FailingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.into(),
            description: "Always fails".into(),
            parameters: json!({"type": "object"}),
        }
    }

    async fn execute(&self, _call: &ToolCallInfo, _ctx: &ToolContext) -> Result<String, ToolError> {
        Err(ToolError::Execution {
            tool: self.name.into(),
            message: self.message.into(),
        })
    }
}

pub fn registry_with(tool: Arc<SearchTool>) -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::new("room").with_tool(tool))
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator helpers
// ─────────────────────────────────────────────────────────────────────────────

pub fn orchestrator(
    api: &Arc<MockBackend>,
    transport: &Arc<ScriptedTransport>,
    tools: Arc<ToolRegistry>,
) -> RunOrchestrator {
    orchestrator_with(api, transport, tools, &OrchestratorSettings::default())
}

pub fn orchestrator_with(
    api: &Arc<MockBackend>,
    transport: &Arc<ScriptedTransport>,
    tools: Arc<ToolRegistry>,
    settings: &OrchestratorSettings,
) -> RunOrchestrator {
    let api: Arc<dyn BackendApi> = api.clone();
    let transport: Arc<dyn AgUiTransport> = transport.clone();
    RunOrchestrator::new(api, transport, tools, settings)
}

/// Poll until `pred` holds for the orchestrator state.
pub async fn wait_for(orch: &RunOrchestrator, pred: impl Fn(&RunState) -> bool) -> RunState {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let state = orch.state();
            if pred(&state) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("orchestrator state never matched")
}

pub async fn wait_settled(orch: &RunOrchestrator) -> RunState {
    wait_for(orch, |s| s.is_terminal() || matches!(s, RunState::ToolYielding { .. })).await
}

/// Mark every call completed with a canned result.
pub fn complete_all(calls: &[ToolCallInfo]) -> Vec<ToolCallInfo> {
    calls
        .iter()
        .map(|c| c.clone().completed(format!("result {}", c.id)))
        .collect()
}
