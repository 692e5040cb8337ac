//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`DeckwrightSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `DECKWRIGHT_*` environment overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::DeckwrightSettings;

/// `~/.deckwright`, falling back to `/tmp/.deckwright` without `HOME`.
pub fn deckwright_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".deckwright")
}

pub fn settings_path() -> PathBuf {
    deckwright_home().join("settings.json")
}

pub fn default_db_path() -> PathBuf {
    deckwright_home().join("decks.db")
}

pub fn load_settings() -> Result<DeckwrightSettings> {
    load_settings_from_path(&settings_path())
}

/// Missing file means defaults; malformed JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<DeckwrightSettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

fn load_with_env(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<DeckwrightSettings> {
    let defaults = serde_json::to_value(DeckwrightSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: DeckwrightSettings = serde_json::from_value(merged)?;
    apply_env_overrides_with(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Objects merge per key, everything else is replaced, nulls in `source` are skipped.
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

pub fn apply_env_overrides(settings: &mut DeckwrightSettings) {
    apply_env_overrides_with(settings, |key| std::env::var(key).ok());
}

/// Invalid values are logged and ignored.
pub fn apply_env_overrides_with(
    settings: &mut DeckwrightSettings,
    env: impl Fn(&str) -> Option<String>,
) {
    let env = EnvReader { lookup: env };

    if let Some(v) = env.usize("DECKWRIGHT_MAX_PARALLEL", 1, 256) {
        settings.composition.max_parallel_sections = v;
    }
    if let Some(v) = env.u64("DECKWRIGHT_START_DELAY_MS", 0, 2_000) {
        settings.composition.delay_between_task_starts_ms = v;
    }
    if let Some(v) = env.u64("DECKWRIGHT_SECTION_TIMEOUT_MS", 1, 3_600_000) {
        settings.composition.per_section_timeout_ms = v;
    }

    if let Some(v) = env.string("DECKWRIGHT_DB") {
        settings.store.db_path = Some(v);
    }
    if let Some(v) = env.u64("DECKWRIGHT_THROTTLE_MS", 0, 600_000) {
        settings.store.throttle_interval_ms = v;
    }
    if let Some(v) = env.u32("DECKWRIGHT_FETCH_ATTEMPTS", 1, 20) {
        settings.store.fetch_attempts = v;
    }
    if let Some(v) = env.usize("DECKWRIGHT_WORKERS", 1, 1_024) {
        settings.store.worker_pool_size = v;
    }
    if let Some(v) = env.bool("DECKWRIGHT_VERIFY_WRITES") {
        settings.store.verify_writes = v;
    }

    if let Some(v) = env.string("DECKWRIGHT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("DECKWRIGHT_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.parsed(name, "u32", |v| parse_u32_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}
