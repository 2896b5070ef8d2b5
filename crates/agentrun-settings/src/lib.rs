//! # agentrun-settings
//!
//! Configuration with layered sources for the agentrun runtime.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`AgentRunSettings::default()`]
//! 2. **User file**: `~/.agentrun/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `AGENTRUN_*` overrides (highest priority)
//!
//! Unlike a process-wide singleton, settings are passed explicitly to the
//! runtime at construction.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
