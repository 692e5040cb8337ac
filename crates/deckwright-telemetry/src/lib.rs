use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. `RUST_LOG` wins when set.
    pub log_level: Level,
    /// Per-module overrides (e.g. "deckwright_store" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of the compact human format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from string levels; unknown levels are skipped.
    pub fn from_levels<'a>(
        level: &str,
        modules: impl IntoIterator<Item = (&'a str, &'a str)>,
        json: bool,
    ) -> Self {
        Self {
            log_level: Level::from_str(level).unwrap_or(Level::INFO),
            module_levels: modules
                .into_iter()
                .filter_map(|(module, level)| {
                    Level::from_str(level)
                        .ok()
                        .map(|level| (module.to_string(), level))
                })
                .collect(),
            json,
        }
    }

    /// `EnvFilter` directive equivalent to this config.
    pub fn filter_directive(&self) -> String {
        let mut directive = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            directive.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        directive
    }
}

/// Returned by [`init_telemetry`]; reports what was installed.
#[derive(Debug)]
pub struct TelemetryGuard {
    directive: String,
    installed: bool,
}

impl TelemetryGuard {
    pub fn directive(&self) -> &str {
        &self.directive
    }

    /// False when another global subscriber was already set.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays
/// free for command output. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let directive = config.filter_directive();
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok();

    TelemetryGuard {
        directive,
        installed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_includes_module_levels() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("deckwright_store".into(), Level::DEBUG)],
            json: false,
        };
        assert_eq!(config.filter_directive(), "warn,deckwright_store=debug");
    }

    #[test]
    fn from_levels_skips_unknown() {
        let config = TelemetryConfig::from_levels(
            "debug",
            [("deckwright_engine", "trace"), ("noisy", "loud")],
            true,
        );
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.module_levels, vec![("deckwright_engine".to_string(), Level::TRACE)]);
        assert!(config.json);
    }

    #[test]
    fn bad_default_level_falls_back_to_info() {
        let config = TelemetryConfig::from_levels("chatty", std::iter::empty(), false);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.filter_directive(), "info");
    }

    #[test]
    fn second_init_reports_not_installed() {
        let config = TelemetryConfig::default();
        let _first = init_telemetry(&config);
        let second = init_telemetry(&config);
        assert!(!second.installed());
        assert_eq!(second.directive(), "info");
    }
}
