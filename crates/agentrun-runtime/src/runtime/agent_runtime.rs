//! `AgentRuntime`: spawns and tracks sessions under a platform concurrency
//! ceiling.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tracing::{debug, info, instrument, warn};

use agentrun_core::{SessionId, ThreadKey, ToolRegistryFactory};
use agentrun_settings::AgentRunSettings;

use crate::backend::{AgUiTransport, BackendApi};
use crate::errors::RuntimeError;
use crate::orchestrator::{ChangeEmitter, RunOrchestrator};
use crate::session::{AgentResult, AgentSession};

/// Options for [`AgentRuntime::spawn`].
#[derive(Clone, Debug, Default)]
pub struct SpawnOptions {
    /// Run on an existing thread instead of creating one.
    pub thread_id: Option<String>,
    /// Bound on the session's lifetime. Falls back to
    /// `runtime.default_timeout_ms`.
    pub timeout: Option<Duration>,
    /// Delete the created thread when the session ends. Falls back to
    /// `runtime.ephemeral_by_default`. Existing threads are never deleted.
    pub ephemeral: Option<bool>,
}

impl SpawnOptions {
    /// Use an existing thread.
    #[must_use]
    pub fn thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Set the session timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override ephemerality.
    #[must_use]
    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = Some(ephemeral);
        self
    }
}

/// Change to the runtime's session map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionChange {
    /// A session was spawned and is now tracked.
    Added {
        /// Session id.
        session_id: SessionId,
        /// Its thread.
        thread_key: ThreadKey,
    },
    /// A session finished (or the runtime was disposed) and is no longer tracked.
    Removed {
        /// Session id.
        session_id: SessionId,
        /// Its thread.
        thread_key: ThreadKey,
    },
}

struct RuntimeInner {
    api: Arc<dyn BackendApi>,
    transport: Arc<dyn AgUiTransport>,
    tool_factory: Arc<dyn ToolRegistryFactory>,
    settings: AgentRunSettings,
    /// One permit per non-terminal session.
    permits: Arc<Semaphore>,
    ceiling: usize,
    /// Tracked sessions in spawn order.
    sessions: Mutex<Vec<AgentSession>>,
    deleted_threads: Mutex<HashSet<ThreadKey>>,
    changes: ChangeEmitter<SessionChange>,
    disposed: AtomicBool,
}

/// Spawns agent sessions and owns their lifecycle.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<RuntimeInner>,
}

impl AgentRuntime {
    /// Create a runtime. Fails if `settings` do not validate.
    pub fn new(
        api: Arc<dyn BackendApi>,
        transport: Arc<dyn AgUiTransport>,
        tool_factory: Arc<dyn ToolRegistryFactory>,
        settings: AgentRunSettings,
    ) -> Result<Self, RuntimeError> {
        settings.validate()?;
        let ceiling = settings.platform.session_ceiling();
        let changes = ChangeEmitter::with_capacity(settings.runtime.change_channel_capacity);
        info!(
            ceiling,
            reentrant = settings.platform.supports_reentrant_interpreter,
            "agent runtime created"
        );
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                api,
                transport,
                tool_factory,
                settings,
                permits: Arc::new(Semaphore::new(ceiling)),
                ceiling,
                sessions: Mutex::new(Vec::new()),
                deleted_threads: Mutex::new(HashSet::new()),
                changes,
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Effective settings.
    pub fn settings(&self) -> &AgentRunSettings {
        &self.inner.settings
    }

    /// Maximum number of concurrent non-terminal sessions.
    pub fn ceiling(&self) -> usize {
        self.inner.ceiling
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Spawn a session in `room_id` and start its first run.
    ///
    /// Returns as soon as the session is tracked and started; the run
    /// proceeds in the background.
    #[instrument(skip(self, prompt, options))]
    pub async fn spawn(
        &self,
        room_id: &str,
        prompt: &str,
        options: SpawnOptions,
    ) -> Result<AgentSession, RuntimeError> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::SeqCst) {
            return Err(RuntimeError::illegal("runtime is disposed"));
        }
        let permit = inner.acquire_permit()?;

        let (thread_id, initial_run_id, created) = match options.thread_id {
            Some(thread_id) => (thread_id, None, false),
            None => {
                let (thread, _initial_state) = inner.api.create_thread(room_id).await?;
                debug!(thread_id = %thread.id, "thread created");
                (thread.id, thread.initial_run_id, true)
            }
        };
        let ephemeral = created
            && options
                .ephemeral
                .unwrap_or(inner.settings.runtime.ephemeral_by_default);
        let thread_key = ThreadKey::new(&inner.settings.runtime.server_id, room_id, thread_id);

        let tools = Arc::new(inner.tool_factory.build(room_id));
        let orchestrator = RunOrchestrator::new(
            Arc::clone(&inner.api),
            Arc::clone(&inner.transport),
            tools,
            &inner.settings.orchestrator,
        );
        let session = AgentSession::new(thread_key, ephemeral, orchestrator);
        if let Err(error) = inner.track(&session) {
            session.dispose();
            if ephemeral {
                inner.delete_thread_once(session.thread_key()).await;
            }
            return Err(error);
        }
        if let Err(error) = session.start(prompt, initial_run_id) {
            inner.untrack(&session);
            return Err(error);
        }

        let timeout = options.timeout.or_else(|| {
            inner
                .settings
                .runtime
                .default_timeout_ms
                .map(Duration::from_millis)
        });
        info!(
            session = %session.id(),
            thread = %session.thread_key(),
            ephemeral,
            ?timeout,
            "session spawned"
        );
        let _ = tokio::spawn(Arc::clone(inner).supervise(session.clone(), timeout, permit));
        Ok(session)
    }

    /// Tracked session for `thread_key`, if any.
    pub fn get_session(&self, thread_key: &ThreadKey) -> Option<AgentSession> {
        self.inner
            .sessions
            .lock()
            .iter()
            .find(|s| s.thread_key() == thread_key)
            .cloned()
    }

    /// Snapshot of tracked sessions in spawn order.
    pub fn active_sessions(&self) -> Vec<AgentSession> {
        self.inner.sessions.lock().clone()
    }

    /// Subscribe to session map changes. Closes on dispose.
    pub fn session_changes(&self) -> broadcast::Receiver<SessionChange> {
        self.inner.changes.subscribe()
    }

    /// Wait for every session, in order.
    #[allow(clippy::unused_self)]
    pub async fn wait_all(
        &self,
        sessions: &[AgentSession],
        timeout: Option<Duration>,
    ) -> Vec<AgentResult> {
        futures::future::join_all(sessions.iter().map(|s| s.await_result(timeout))).await
    }

    /// Wait for the first session to settle.
    ///
    /// With a timeout, each session is individually bounded; the first to
    /// time out is settled `TimedOut` and cancelled.
    #[allow(clippy::unused_self)]
    pub async fn wait_any(
        &self,
        sessions: &[AgentSession],
        timeout: Option<Duration>,
    ) -> Result<AgentResult, RuntimeError> {
        if sessions.is_empty() {
            return Err(RuntimeError::illegal("wait_any needs at least one session"));
        }
        let waits = sessions.iter().map(|s| Box::pin(s.await_result(timeout)));
        let (result, _index, _rest) = futures::future::select_all(waits).await;
        Ok(result)
    }

    /// Cancel every tracked session that has not settled.
    pub fn cancel_all(&self) {
        let sessions = self.active_sessions();
        info!(count = sessions.len(), "cancelling all sessions");
        for session in sessions.iter().filter(|s| !s.state().is_terminal()) {
            session.cancel();
        }
    }

    /// Cancel everything, delete tracked ephemeral threads (errors are
    /// logged and swallowed), dispose sessions, close the change channel.
    /// Idempotent.
    #[instrument(skip(self))]
    pub async fn dispose(&self) {
        let inner = &self.inner;
        let sessions = {
            let mut tracked = inner.sessions.lock();
            if inner.disposed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *tracked)
        };
        info!(count = sessions.len(), "disposing runtime");

        for session in &sessions {
            session.cancel();
        }
        let _ = futures::future::join_all(
            sessions
                .iter()
                .filter(|s| s.is_ephemeral())
                .map(|s| inner.delete_thread_once(s.thread_key())),
        )
        .await;
        for session in &sessions {
            session.dispose();
            let _ = inner.changes.emit(SessionChange::Removed {
                session_id: session.id().clone(),
                thread_key: session.thread_key().clone(),
            });
        }
        gauge!("agent_sessions_active").set(0.0);
        let _ = inner.changes.close();
    }
}

impl RuntimeInner {
    fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, RuntimeError> {
        Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            if self.settings.platform.supports_reentrant_interpreter {
                RuntimeError::illegal(format!(
                    "concurrency ceiling reached ({} active sessions)",
                    self.ceiling
                ))
            } else {
                RuntimeError::illegal(
                    "platform does not support concurrent sessions and one is already active",
                )
            }
        })
    }

    /// Start tracking `session`. The disposed check shares the map lock with
    /// `dispose`, so a session is either drained by dispose or refused here.
    fn track(&self, session: &AgentSession) -> Result<(), RuntimeError> {
        let mut sessions = self.sessions.lock();
        if self.disposed.load(Ordering::SeqCst) {
            return Err(RuntimeError::illegal("runtime is disposed"));
        }
        sessions.push(session.clone());
        #[allow(clippy::cast_precision_loss)]
        gauge!("agent_sessions_active").set(sessions.len() as f64);
        let _ = self.changes.emit(SessionChange::Added {
            session_id: session.id().clone(),
            thread_key: session.thread_key().clone(),
        });
        Ok(())
    }

    fn untrack(&self, session: &AgentSession) {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|s| s.id() != session.id());
        if sessions.len() == before {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        gauge!("agent_sessions_active").set(sessions.len() as f64);
        let _ = self.changes.emit(SessionChange::Removed {
            session_id: session.id().clone(),
            thread_key: session.thread_key().clone(),
        });
    }

    /// Delete `thread_key` unless it was already deleted. Errors are logged.
    async fn delete_thread_once(&self, thread_key: &ThreadKey) {
        let first = self.deleted_threads.lock().insert(thread_key.clone());
        if !first {
            return;
        }
        match self
            .api
            .delete_thread(&thread_key.room_id, &thread_key.thread_id)
            .await
        {
            Ok(()) => {
                counter!("agent_threads_deleted_total").increment(1);
                debug!(thread = %thread_key, "ephemeral thread deleted");
            }
            Err(error) => {
                warn!(
                    thread = %thread_key,
                    kind = error.error_kind(),
                    error = %error,
                    "failed to delete ephemeral thread"
                );
            }
        }
    }

    /// Await the session's result, release its permit, clean up its thread,
    /// and stop tracking it.
    async fn supervise(
        self: Arc<Self>,
        session: AgentSession,
        timeout: Option<Duration>,
        permit: OwnedSemaphorePermit,
    ) {
        let result = session.await_result(timeout).await;
        drop(permit);
        debug!(
            session = %session.id(),
            success = result.is_success(),
            "session finished"
        );
        if session.is_ephemeral() {
            self.delete_thread_once(session.thread_key()).await;
        }
        self.untrack(&session);
    }
}
