use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Longest accepted default window for pattern analysis, one leap year
pub const MAX_PATTERN_WINDOW_MINUTES: i64 = 366 * 24 * 60;

/// Main configuration structure for the orchestration core
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Event bus settings
    pub event_bus: EventBusConfig,
    /// Workflow engine settings
    pub workflows: WorkflowConfig,
    /// Snapshot persistence settings
    pub persistence: PersistenceConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Capacity of the history ring buffer
    pub max_history: usize,
    /// Length of the event type sequences counted by pattern analysis
    pub sequence_length: usize,
    /// How many of the most frequent sequences pattern analysis reports
    pub top_sequences: usize,
    /// Default look-back window for pattern analysis, 1 to
    /// [`MAX_PATTERN_WINDOW_MINUTES`]
    pub pattern_window_minutes: i64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            sequence_length: 3,
            top_sequences: 5,
            pattern_window_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Attempts allowed per step unless the step spec overrides it
    pub default_max_retries: u32,
    /// A step slower than this multiple of the mean step time is a bottleneck
    pub bottleneck_factor: f64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            bottleneck_factor: 1.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Write transition and workflow snapshots to disk
    pub enabled: bool,
    /// Directory holding one JSON document per store
    pub directory: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("temp"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or full `EnvFilter` directive
    pub log_level: String,
    /// Emit JSON lines instead of human readable logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl CoreConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (cmate.toml)
    /// 3. Environment variables (prefixed with CMATE__, sections split by `__`)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("cmate.toml"))
    }

    /// Same as [`CoreConfig::load`] with an explicit config file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut builder = Config::builder();

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("CMATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let core_config: CoreConfig = config.try_deserialize()?;
        core_config.validate()?;
        Ok(core_config)
    }

    /// Reject values the components cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.event_bus.max_history == 0 {
            anyhow::bail!("event_bus.max_history must be at least 1");
        }
        if self.event_bus.sequence_length == 0 {
            anyhow::bail!("event_bus.sequence_length must be at least 1");
        }
        if self.workflows.default_max_retries == 0 {
            anyhow::bail!("workflows.default_max_retries must be at least 1");
        }
        let window = self.event_bus.pattern_window_minutes;
        if !(1..=MAX_PATTERN_WINDOW_MINUTES).contains(&window) {
            anyhow::bail!(
                "event_bus.pattern_window_minutes must be between 1 and {}",
                MAX_PATTERN_WINDOW_MINUTES
            );
        }
        let factor = self.workflows.bottleneck_factor;
        if factor.is_nan() || factor <= 0.0 {
            anyhow::bail!("workflows.bottleneck_factor must be positive");
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = CoreConfig::default();
        assert_eq!(config.event_bus.max_history, 1000);
        assert_eq!(config.event_bus.sequence_length, 3);
        assert_eq!(config.event_bus.top_sequences, 5);
        assert_eq!(config.workflows.default_max_retries, 3);
        assert!((config.workflows.bottleneck_factor - 1.5).abs() < f64::EPSILON);
        assert!(!config.persistence.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cmate.toml");

        let mut config = CoreConfig::default();
        config.event_bus.max_history = 42;
        config.workflows.default_max_retries = 5;
        config.persistence.enabled = true;
        config.save_to_file(&path).unwrap();

        let loaded = CoreConfig::load_from(&path).unwrap();
        assert_eq!(loaded.event_bus.max_history, 42);
        assert_eq!(loaded.workflows.default_max_retries, 5);
        assert!(loaded.persistence.enabled);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[event_bus]\nmax_history = 10\n").unwrap();

        let loaded = CoreConfig::load_from(&path).unwrap();
        assert_eq!(loaded.event_bus.max_history, 10);
        assert_eq!(loaded.event_bus.sequence_length, 3);
        assert_eq!(loaded.workflows.default_max_retries, 3);
    }

    #[test]
    fn test_validate_rejects_zero_history() {
        let mut config = CoreConfig::default();
        config.event_bus.max_history = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_pattern_window() {
        for minutes in [0, -5, MAX_PATTERN_WINDOW_MINUTES + 1, i64::MAX] {
            let mut config = CoreConfig::default();
            config.event_bus.pattern_window_minutes = minutes;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("pattern_window_minutes"));
        }

        let mut config = CoreConfig::default();
        config.event_bus.pattern_window_minutes = MAX_PATTERN_WINDOW_MINUTES;
        assert!(config.validate().is_ok());
    }
}
