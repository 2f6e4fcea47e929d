//! # interbus-settings
//!
//! Configuration with layered sources for interbus channels and the broker.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BusSettings::default()`]
//! 2. **User file**: `~/.interbus/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `INTERBUS_*` overrides (highest priority)
//!
//! Library code takes [`ChannelSettings`] explicitly; only binaries and the
//! broker consult the global [`get_settings`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{BusSettings, ChannelSettings, LoggingSettings, ServerSettings};

use std::sync::OnceLock;

static SETTINGS: OnceLock<BusSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// Loaded on first call; falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static BusSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            BusSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: BusSettings) -> std::result::Result<(), BusSettings> {
    SETTINGS.set(settings)
}
