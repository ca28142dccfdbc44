//! # swoosh-settings
//!
//! Configuration for the Swoosh relay, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **User file**: `~/.swoosh/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SWOOSH_*` overrides (highest priority)
//!
//! Settings are loaded once by the binary and handed to the server as a
//! plain value; there is no global settings singleton.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
