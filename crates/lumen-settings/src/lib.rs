//! # lumen-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`LumenSettings::default()`]
//! 2. **Settings file**: `~/.lumen/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `LUMEN_*` overrides (highest priority)
//!
//! The dispatch-interval constants live here rather than in the runtime so
//! deployments can tune them without a rebuild.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
