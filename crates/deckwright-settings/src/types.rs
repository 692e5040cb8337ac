//! Settings types. JSON field names are camelCase; every section is
//! `#[serde(default)]` so a settings file only needs the keys it changes.

use std::collections::BTreeMap;
use std::time::Duration;

use deckwright_core::{CompositionOptions, ProgressModel};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeckwrightSettings {
    pub composition: CompositionSettings,
    pub store: StoreSettings,
    pub progress: ProgressSettings,
    pub logging: LoggingSettings,
}

impl DeckwrightSettings {
    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.composition.max_parallel_sections == 0 {
            return Err(SettingsError::InvalidValue(
                "composition.maxParallelSections must be at least 1".into(),
            ));
        }
        if self.store.worker_pool_size == 0 {
            return Err(SettingsError::InvalidValue(
                "store.workerPoolSize must be at least 1".into(),
            ));
        }
        let p = &self.progress;
        if p.base < 0.0 || p.range < 0.0 || p.base + p.range > 100.0 {
            return Err(SettingsError::InvalidValue(format!(
                "progress base {} + range {} must stay within 0..=100",
                p.base, p.range
            )));
        }
        if !(0.0..=1.0).contains(&p.in_progress_weight) {
            return Err(SettingsError::InvalidValue(format!(
                "progress.inProgressWeight {} must be within 0..=1",
                p.in_progress_weight
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompositionSettings {
    pub max_parallel_sections: usize,
    pub delay_between_task_starts_ms: u64,
    pub per_section_timeout_ms: u64,
}

impl Default for CompositionSettings {
    fn default() -> Self {
        let defaults = CompositionOptions::default();
        Self {
            max_parallel_sections: defaults.max_parallel_sections,
            delay_between_task_starts_ms: defaults.delay_between_task_starts.as_millis() as u64,
            per_section_timeout_ms: defaults.per_section_timeout.as_millis() as u64,
        }
    }
}

impl CompositionSettings {
    pub fn to_options(&self) -> CompositionOptions {
        CompositionOptions {
            max_parallel_sections: self.max_parallel_sections,
            delay_between_task_starts: Duration::from_millis(self.delay_between_task_starts_ms),
            per_section_timeout: Duration::from_millis(self.per_section_timeout_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// SQLite file. `None` means `~/.deckwright/decks.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    pub throttle_interval_ms: u64,
    pub fetch_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub worker_pool_size: usize,
    pub verify_writes: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            throttle_interval_ms: 2_000,
            fetch_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            worker_pool_size: 8,
            verify_writes: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressSettings {
    pub base: f64,
    pub range: f64,
    pub in_progress_weight: f64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        let model = ProgressModel::default();
        Self {
            base: model.base,
            range: model.range,
            in_progress_weight: model.in_progress_weight,
        }
    }
}

impl ProgressSettings {
    pub fn to_model(&self) -> ProgressModel {
        ProgressModel {
            base: self.base,
            range: self.range,
            in_progress_weight: self.in_progress_weight,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-module overrides, e.g. `{"deckwright_store": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_core_defaults() {
        let settings = DeckwrightSettings::default();
        assert_eq!(settings.composition.to_options(), CompositionOptions::default());
        assert_eq!(settings.progress.to_model(), ProgressModel::default());
        assert_eq!(settings.store.throttle_interval_ms, 2_000);
        assert_eq!(settings.store.fetch_attempts, 3);
        assert!(settings.store.verify_writes);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn camel_case_partial_json() {
        let settings: DeckwrightSettings = serde_json::from_str(
            r#"{"composition": {"maxParallelSections": 2}, "store": {"dbPath": "/tmp/x.db"}}"#,
        )
        .unwrap();
        assert_eq!(settings.composition.max_parallel_sections, 2);
        assert_eq!(settings.composition.per_section_timeout_ms, 300_000);
        assert_eq!(settings.store.db_path.as_deref(), Some("/tmp/x.db"));
        assert_eq!(settings.store.worker_pool_size, 8);
    }

    #[test]
    fn db_path_omitted_when_unset() {
        let value = serde_json::to_value(DeckwrightSettings::default()).unwrap();
        assert!(value["store"].get("dbPath").is_none());
        assert_eq!(value["composition"]["maxParallelSections"], 4);
    }

    #[test]
    fn validate_rejects_zero_parallelism() {
        let mut settings = DeckwrightSettings::default();
        settings.composition.max_parallel_sections = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn validate_rejects_progress_over_100() {
        let mut settings = DeckwrightSettings::default();
        settings.progress.range = 95.0;
        assert!(settings.validate().is_err());

        let mut settings = DeckwrightSettings::default();
        settings.progress.in_progress_weight = 1.5;
        assert!(settings.validate().is_err());
    }
}
