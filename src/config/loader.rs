//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered with the
//! `config` crate: built-in defaults, then an optional file named by
//! `RECOVERY_CONFIG_PATH` (format chosen by extension), then
//! `RECOVERY__SECTION__KEY` environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::RecoveryConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const CONFIG_PATH_ENV: &str = "RECOVERY_CONFIG_PATH";
pub const ENVIRONMENT_ENV: &str = "RECOVERY_ENV";

/// Loaded and validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: RecoveryConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let path = env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_with(path.as_deref(), true)
    }

    /// Load configuration from an explicit file, still honouring
    /// environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with(Some(path.as_ref()), true)
    }

    /// Load a file without environment overrides. Useful in tests that must
    /// not depend on process-wide environment variables.
    pub fn load_file_only<P: AsRef<Path>>(path: P) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with(Some(path.as_ref()), false)
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: RecoveryConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            source: None,
        }))
    }

    fn load_with(path: Option<&Path>, with_env: bool) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let defaults = Config::try_from(&RecoveryConfig::default())
            .map_err(|e| ConfigurationError::load_error("defaults", e))?;

        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::config_file_not_found(
                    path.display().to_string(),
                ));
            }
            debug!(path = %path.display(), "Adding configuration file source");
            builder = builder.add_source(File::from(path));
        }

        if with_env {
            builder = builder.add_source(
                Environment::with_prefix("RECOVERY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let source_name = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string());

        let config: RecoveryConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigurationError::load_error(source_name.clone(), e))?;

        config.validate()?;

        info!(
            environment = %environment,
            source = %source_name,
            breaker_overrides = config.circuit_breakers.component_configs.len(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source: path.map(Path::to_path_buf),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Effective configuration as JSON, for diagnostics
    pub fn debug_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }

    fn detect_environment() -> String {
        env::var(ENVIRONMENT_ENV)
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str, suffix: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("create temp config");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn test_load_toml_overrides_defaults() {
        let file = write_config(
            r#"
[circuit_breakers.default_config]
failure_threshold = 3
success_threshold = 1
timeout_ms = 5000
half_open_max_calls = 2

[circuit_breakers.component_configs.billing]
failure_threshold = 10

[sweeps]
retry_interval_ms = 250
"#,
            ".toml",
        );

        let manager = ConfigManager::load_file_only(file.path()).expect("load config");
        let config = manager.config();

        assert_eq!(config.circuit_breakers.default_config.failure_threshold, 3);
        assert_eq!(config.sweeps.retry_interval_ms, 250);
        // Untouched sections keep their defaults
        assert_eq!(config.sweeps.metrics_interval_ms, 60_000);
        assert_eq!(config.retention.error_record_ttl_seconds, 2_592_000);

        let billing = &config.circuit_breakers.component_configs["billing"];
        assert_eq!(billing.failure_threshold, 10);
        assert_eq!(billing.half_open_max_calls, 3);
        assert_eq!(manager.source(), Some(file.path()));
    }

    #[test]
    fn test_load_yaml_retry_strategy() {
        let file = write_config(
            r#"
retry:
  default_strategy:
    type: linear
    base_delay_ms: 500
    max_delay_ms: 5000
    jitter: false
    max_retries: 3
"#,
            ".yaml",
        );

        let manager = ConfigManager::load_file_only(file.path()).expect("load config");
        let strategy = &manager.config().retry.default_strategy;
        assert_eq!(strategy.base_delay_ms, 500);
        assert_eq!(strategy.max_retries, 3);
        assert!(!strategy.jitter);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let result = ConfigManager::load_file_only("/nonexistent/recovery.toml");
        assert!(matches!(
            result,
            Err(ConfigurationError::ConfigFileNotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let file = write_config(
            r#"
[events]
channel_capacity = 0
"#,
            ".toml",
        );

        let result = ConfigManager::load_file_only(file.path());
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_from_config_validates() {
        let mut config = RecoveryConfig::default();
        assert!(ConfigManager::from_config(config.clone()).is_ok());

        config.health.degraded_error_rate = 0.9;
        assert!(ConfigManager::from_config(config).is_err());
    }
}
