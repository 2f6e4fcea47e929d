//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BusSettings::default()`]
//! 2. If `~/.interbus/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `INTERBUS_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::BusSettings;

/// Resolve the path to the settings file (`~/.interbus/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".interbus").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BusSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or out-of-range values are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<BusSettings> {
    let defaults = serde_json::to_value(BusSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BusSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `INTERBUS_*` overrides read through `lookup`.
///
/// Invalid or out-of-range values are logged and ignored.
pub fn apply_env_overrides(settings: &mut BusSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.u64("INTERBUS_DISPATCH_TIMEOUT_MS", 1, 3_600_000) {
        settings.channel.dispatch_timeout_ms = v;
    }
    if let Some(v) = env.u64("INTERBUS_CONNECT_TIMEOUT_MS", 1, 600_000) {
        settings.channel.connect_timeout_ms = v;
    }
    if let Some(v) = env.u64("INTERBUS_DISCONNECT_TIMEOUT_MS", 1, 600_000) {
        settings.channel.disconnect_timeout_ms = v;
    }
    if let Some(v) = env.string("INTERBUS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64("INTERBUS_PORT", 0, u64::from(u16::MAX)) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.u64("INTERBUS_MAX_CONNECTIONS", 1, 100_000) {
        settings.server.max_connections = v as usize;
    }
    if let Some(v) = env.string("INTERBUS_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({ "server": { "port": 9696, "host": "127.0.0.1" } });
        let source = serde_json::json!({ "server": { "port": 9797 } });
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9797);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({ "a": 1 });
        let merged = deep_merge(target, serde_json::json!({ "a": null }));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replaces() {
        let target = serde_json::json!({ "items": [1, 2, 3] });
        let merged = deep_merge(target, serde_json::json!({ "items": [4] }));
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_adds_new_keys() {
        let merged = deep_merge(serde_json::json!({ "a": 1 }), serde_json::json!({ "b": 2 }));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = BusSettings::default();
        apply_env_overrides(
            &mut settings,
            lookup_from(&[
                ("INTERBUS_DISPATCH_TIMEOUT_MS", "2500"),
                ("INTERBUS_HOST", "0.0.0.0"),
                ("INTERBUS_PORT", "0"),
                ("INTERBUS_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.channel.dispatch_timeout_ms, 2500);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn env_out_of_range_is_ignored() {
        let mut settings = BusSettings::default();
        apply_env_overrides(
            &mut settings,
            lookup_from(&[
                ("INTERBUS_PORT", "70000"),
                ("INTERBUS_CONNECT_TIMEOUT_MS", "0"),
                ("INTERBUS_MAX_CONNECTIONS", "lots"),
            ]),
        );
        assert_eq!(settings.server.port, 9696);
        assert_eq!(settings.channel.connect_timeout_ms, 5_000);
        assert_eq!(settings.server.max_connections, 256);
    }

    #[test]
    fn env_empty_string_is_ignored() {
        let mut settings = BusSettings::default();
        apply_env_overrides(&mut settings, lookup_from(&[("INTERBUS_HOST", "")]));
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_u64_range("1", 1, 10), Some(1));
        assert_eq!(parse_u64_range("10", 1, 10), Some(10));
        assert_eq!(parse_u64_range(" 5 ", 1, 10), Some(5));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 1, 10), None);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.channel, BusSettings::default().channel);
    }

    #[test]
    fn load_merges_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"channel":{"connectTimeoutMs":750}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.channel.connect_timeout_ms, 750);
        assert_eq!(settings.channel.dispatch_timeout_ms, 30_000);
    }

    #[test]
    fn load_invalid_json_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_zero_timeout_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"channel":{"dispatchTimeoutMs":0}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn settings_path_under_home() {
        let path = settings_path();
        assert!(path.ends_with(".interbus/settings.json"));
    }
}
