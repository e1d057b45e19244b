use serde::Deserialize;

/// Root engine configuration. Loaded from environment variables with the
/// prefix `POPUP_ENGINE__`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub triggers: TriggerConfig,
    #[serde(default)]
    pub experiments: ExperimentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout_minutes")]
    pub timeout_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_scroll_debounce_ms")]
    pub scroll_debounce_ms: u64,
    #[serde(default)]
    pub exit_intent: ExitIntentConfig,
}

/// Thresholds for one exit-intent sensitivity tier. A `mouseleave` counts as
/// an exit when the pointer left at or above `max_client_y` while moving
/// upward at least `min_velocity_px_per_ms`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct ExitIntentThresholds {
    pub max_client_y: f64,
    pub min_velocity_px_per_ms: f64,
}

pub const EXIT_INTENT_LOW: ExitIntentThresholds = ExitIntentThresholds {
    max_client_y: 0.0,
    min_velocity_px_per_ms: 0.5,
};

pub const EXIT_INTENT_MEDIUM: ExitIntentThresholds = ExitIntentThresholds {
    max_client_y: 10.0,
    min_velocity_px_per_ms: 0.2,
};

pub const EXIT_INTENT_HIGH: ExitIntentThresholds = ExitIntentThresholds {
    max_client_y: 20.0,
    min_velocity_px_per_ms: 0.0,
};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct ExitIntentConfig {
    #[serde(default = "default_exit_low")]
    pub low: ExitIntentThresholds,
    #[serde(default = "default_exit_medium")]
    pub medium: ExitIntentThresholds,
    #[serde(default = "default_exit_high")]
    pub high: ExitIntentThresholds,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_persist_assignments")]
    pub persist_assignments: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

// Default functions
fn default_session_timeout_minutes() -> u64 {
    30
}
fn default_scroll_debounce_ms() -> u64 {
    100
}
fn default_exit_low() -> ExitIntentThresholds {
    EXIT_INTENT_LOW
}
fn default_exit_medium() -> ExitIntentThresholds {
    EXIT_INTENT_MEDIUM
}
fn default_exit_high() -> ExitIntentThresholds {
    EXIT_INTENT_HIGH
}
fn default_persist_assignments() -> bool {
    false
}
fn default_storage_path() -> String {
    ".popup-engine/state.json".to_string()
}
fn default_key_prefix() -> String {
    "popup".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_session_timeout_minutes(),
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            scroll_debounce_ms: default_scroll_debounce_ms(),
            exit_intent: ExitIntentConfig::default(),
        }
    }
}

impl Default for ExitIntentConfig {
    fn default() -> Self {
        Self {
            low: EXIT_INTENT_LOW,
            medium: EXIT_INTENT_MEDIUM,
            high: EXIT_INTENT_HIGH,
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            persist_assignments: default_persist_assignments(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("POPUP_ENGINE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.session.timeout_minutes, 30);
        assert_eq!(config.triggers.scroll_debounce_ms, 100);
        assert_eq!(config.triggers.exit_intent.medium, EXIT_INTENT_MEDIUM);
        assert!(!config.experiments.persist_assignments);
        assert_eq!(config.storage.key_prefix, "popup");
    }

    #[test]
    fn test_exit_tiers_are_ordered_by_strictness() {
        assert!(EXIT_INTENT_LOW.max_client_y <= EXIT_INTENT_MEDIUM.max_client_y);
        assert!(EXIT_INTENT_MEDIUM.max_client_y <= EXIT_INTENT_HIGH.max_client_y);
        assert!(EXIT_INTENT_LOW.min_velocity_px_per_ms >= EXIT_INTENT_MEDIUM.min_velocity_px_per_ms);
        assert!(EXIT_INTENT_MEDIUM.min_velocity_px_per_ms >= EXIT_INTENT_HIGH.min_velocity_px_per_ms);
    }
}
