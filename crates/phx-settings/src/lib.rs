//! # phx-settings
//!
//! Socket configuration for the Phoenix Channels client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SocketSettings::default()`]
//! 2. **Settings file**: `~/.phx/settings.json` or `$PHX_SETTINGS_PATH` (deep-merged)
//! 3. **Environment variables**: `PHX_*` overrides (highest priority)
//!
//! The resulting [`SocketSettings`] is an immutable value passed to the socket
//! at construction; there is no process-wide settings state.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{OverflowPolicy, SocketSettings};
