//! # dcnt-settings
//!
//! Configuration for the dcnt relay daemon.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **User file**: `~/.dcnt/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `DCNT_*` overrides (highest priority)
//!
//! ```no_run
//! let settings = dcnt_settings::load_settings()?;
//! println!("relay port: {}", settings.server.port);
//! # Ok::<(), dcnt_settings::SettingsError>(())
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
