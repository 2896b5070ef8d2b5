//! Settings types.
//!
//! Every struct derives `Default` with the compiled defaults and uses
//! `#[serde(default)]`, so a partial JSON file only needs the keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentRunSettings {
    /// Per-run orchestrator settings.
    pub orchestrator: OrchestratorSettings,
    /// Multi-session runtime settings.
    pub runtime: RuntimeSettings,
    /// Host platform limits.
    pub platform: PlatformConstraints,
}

impl AgentRunSettings {
    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::SettingsError;

        SettingsError::check_minimum(
            "orchestrator.maxToolDepth",
            u64::from(self.orchestrator.max_tool_depth),
            1,
        )?;
        SettingsError::check_minimum(
            "orchestrator.stateChannelCapacity",
            self.orchestrator.state_channel_capacity as u64,
            1,
        )?;
        SettingsError::check_minimum(
            "runtime.changeChannelCapacity",
            self.runtime.change_channel_capacity as u64,
            1,
        )?;
        SettingsError::check_minimum(
            "platform.maxConcurrentBridges",
            self.platform.max_concurrent_bridges as u64,
            1,
        )?;
        Ok(())
    }
}

/// Orchestrator settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorSettings {
    /// Maximum tool-call continuations before the circuit breaker trips.
    pub max_tool_depth: u32,
    /// Buffer size of the run-state broadcast channel.
    pub state_channel_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_tool_depth: 10,
            state_channel_capacity: 256,
        }
    }
}

/// Runtime settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeSettings {
    /// Server id used to build thread keys.
    pub server_id: String,
    /// Timeout applied to spawns that do not pass one.
    pub default_timeout_ms: Option<u64>,
    /// Whether spawned threads are deleted on completion unless told otherwise.
    pub ephemeral_by_default: bool,
    /// Buffer size of the session-change broadcast channel.
    pub change_channel_capacity: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            server_id: "default".into(),
            default_timeout_ms: None,
            ephemeral_by_default: true,
            change_channel_capacity: 64,
        }
    }
}

/// Concurrency limits imposed by the host platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlatformConstraints {
    /// Ceiling on concurrently running sessions.
    pub max_concurrent_bridges: usize,
    /// False on single-interpreter hosts: at most one session may run.
    pub supports_reentrant_interpreter: bool,
}

impl PlatformConstraints {
    /// Effective ceiling, accounting for non-reentrant hosts.
    pub fn session_ceiling(&self) -> usize {
        if self.supports_reentrant_interpreter {
            self.max_concurrent_bridges
        } else {
            1
        }
    }
}

impl Default for PlatformConstraints {
    fn default() -> Self {
        Self {
            max_concurrent_bridges: 8,
            supports_reentrant_interpreter: true,
        }
    }
}
