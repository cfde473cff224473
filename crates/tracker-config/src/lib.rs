//! Configuration for the intent tracker service.
//!
//! TOML configuration with `${VAR}` environment substitution, a
//! `TRACKER_`-prefixed override layer, and validation of the tuning knobs
//! the reconciler depends on.

use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
	pub tracker: TrackerSettings,
	#[serde(default)]
	pub reconciler: ReconcilerSettings,
	pub storage: BackendSettings,
	pub adapter: BackendSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerSettings {
	pub name: String,
	#[serde(default = "default_log_level")]
	pub log_level: String,
	#[serde(default = "default_http_port")]
	pub http_port: u16,
}

/// Reconciliation loop tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerSettings {
	/// Seconds between cycle starts.
	#[serde(default = "default_interval_secs")]
	pub interval_secs: u64,
	/// Fraction of size at which a fill counts as complete.
	#[serde(default = "default_completion_ratio")]
	pub completion_ratio: f64,
	/// Timeout applied to every adapter call, in seconds.
	#[serde(default = "default_adapter_timeout_secs")]
	pub adapter_timeout_secs: u64,
}

impl Default for ReconcilerSettings {
	fn default() -> Self {
		Self {
			interval_secs: default_interval_secs(),
			completion_ratio: default_completion_ratio(),
			adapter_timeout_secs: default_adapter_timeout_secs(),
		}
	}
}

/// A named backend plus its free-form configuration table.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
	pub kind: String,
	#[serde(default = "empty_table")]
	pub config: toml::Value,
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_http_port() -> u16 {
	8080
}

fn default_interval_secs() -> u64 {
	30
}

fn default_completion_ratio() -> f64 {
	0.99
}

fn default_adapter_timeout_secs() -> u64 {
	10
}

fn empty_table() -> toml::Value {
	toml::Value::Table(toml::map::Map::new())
}

/// Configuration loader with environment variable substitution.
#[derive(Default)]
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "TRACKER_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<TrackerConfig, ConfigError> {
		let mut config = if let Some(file_path) = &self.file_path {
			self.load_from_file(file_path).await?
		} else {
			return Err(ConfigError::FileNotFound(
				"No configuration file specified".to_string(),
			));
		};

		self.apply_env_overrides(&mut config)?;
		self.validate_config(&config)?;

		Ok(config)
	}

	async fn load_from_file(&self, file_path: &str) -> Result<TrackerConfig, ConfigError> {
		let content = tokio::fs::read_to_string(file_path).await.map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				ConfigError::FileNotFound(file_path.to_string())
			} else {
				ConfigError::IoError(e)
			}
		})?;

		let substituted = self.substitute_env_vars(&content)?;

		let config: TrackerConfig =
			toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))?;

		Ok(config)
	}

	/// Replaces `${VAR_NAME}` patterns with environment variable values.
	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let mut result = content.to_string();

		let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
		for cap in re.captures_iter(content) {
			let full_match = &cap[0];
			let var_name = &cap[1];

			let env_value = env::var(var_name)
				.map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
			result = result.replace(full_match, &env_value);
		}

		Ok(result)
	}

	fn apply_env_overrides(&self, config: &mut TrackerConfig) -> Result<(), ConfigError> {
		if let Ok(log_level) = env::var(format!("{}LOG_LEVEL", self.env_prefix)) {
			config.tracker.log_level = log_level;
		}

		if let Ok(http_port) = env::var(format!("{}HTTP_PORT", self.env_prefix)) {
			config.tracker.http_port = http_port
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid HTTP port: {}", e)))?;
		}

		if let Ok(interval) = env::var(format!("{}INTERVAL_SECS", self.env_prefix)) {
			config.reconciler.interval_secs = interval.parse().map_err(|e| {
				ConfigError::ValidationError(format!("Invalid interval: {}", e))
			})?;
		}

		Ok(())
	}

	fn validate_config(&self, config: &TrackerConfig) -> Result<(), ConfigError> {
		if config.reconciler.interval_secs == 0 {
			return Err(ConfigError::ValidationError(
				"reconciler.interval_secs must be positive".to_string(),
			));
		}

		let ratio = config.reconciler.completion_ratio;
		if !(ratio.is_finite() && ratio > 0.0 && ratio <= 1.0) {
			return Err(ConfigError::ValidationError(format!(
				"reconciler.completion_ratio must be in (0, 1], got {}",
				ratio
			)));
		}

		if config.reconciler.adapter_timeout_secs == 0 {
			return Err(ConfigError::ValidationError(
				"reconciler.adapter_timeout_secs must be positive".to_string(),
			));
		}

		if !matches!(config.storage.kind.as_str(), "memory" | "file") {
			return Err(ConfigError::ValidationError(format!(
				"unknown storage backend: {}",
				config.storage.kind
			)));
		}

		if config.adapter.kind != "simulated" {
			return Err(ConfigError::ValidationError(format!(
				"unknown adapter kind: {}",
				config.adapter.kind
			)));
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn write_config(content: &str) -> tempfile::NamedTempFile {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(content.as_bytes()).unwrap();
		file
	}

	const VALID: &str = r#"
[tracker]
name = "intent-tracker"

[reconciler]
interval_secs = 5
completion_ratio = 0.95

[storage]
kind = "memory"

[adapter]
kind = "simulated"
[adapter.config]
fill_rate = 0.25
"#;

	#[tokio::test]
	async fn test_load_valid_config() {
		let file = write_config(VALID);
		let config = ConfigLoader::new()
			.with_file(file.path())
			.load()
			.await
			.unwrap();

		assert_eq!(config.tracker.name, "intent-tracker");
		assert_eq!(config.tracker.log_level, "info");
		assert_eq!(config.reconciler.interval_secs, 5);
		assert_eq!(config.reconciler.completion_ratio, 0.95);
		assert_eq!(config.storage.kind, "memory");
		assert_eq!(
			config.adapter.config.get("fill_rate").and_then(|v| v.as_float()),
			Some(0.25)
		);
	}

	#[tokio::test]
	async fn test_rejects_zero_interval() {
		let file = write_config(&VALID.replace("interval_secs = 5", "interval_secs = 0"));
		let result = ConfigLoader::new().with_file(file.path()).load().await;
		assert!(matches!(result, Err(ConfigError::ValidationError(_))));
	}

	#[tokio::test]
	async fn test_rejects_completion_ratio_out_of_range() {
		for bad in ["0.0", "1.5", "-0.5"] {
			let file = write_config(
				&VALID.replace("completion_ratio = 0.95", &format!("completion_ratio = {}", bad)),
			);
			let result = ConfigLoader::new().with_file(file.path()).load().await;
			assert!(
				matches!(result, Err(ConfigError::ValidationError(_))),
				"ratio {}",
				bad
			);
		}
	}

	#[tokio::test]
	async fn test_rejects_unknown_backend() {
		let file = write_config(&VALID.replace("kind = \"memory\"", "kind = \"redis\""));
		let result = ConfigLoader::new().with_file(file.path()).load().await;
		assert!(matches!(result, Err(ConfigError::ValidationError(_))));
	}

	#[tokio::test]
	async fn test_env_substitution() {
		env::set_var("TRACKER_TEST_NAME", "from-env");
		let file = write_config(&VALID.replace(
			"name = \"intent-tracker\"",
			"name = \"${TRACKER_TEST_NAME}\"",
		));
		let config = ConfigLoader::new()
			.with_file(file.path())
			.load()
			.await
			.unwrap();
		assert_eq!(config.tracker.name, "from-env");
	}

	#[tokio::test]
	async fn test_missing_env_var_is_an_error() {
		let file = write_config(&VALID.replace(
			"name = \"intent-tracker\"",
			"name = \"${TRACKER_DEFINITELY_UNSET}\"",
		));
		let result = ConfigLoader::new().with_file(file.path()).load().await;
		assert!(matches!(result, Err(ConfigError::EnvVarNotFound(_))));
	}

	#[tokio::test]
	async fn test_missing_file() {
		let result = ConfigLoader::new()
			.with_file("/nonexistent/tracker.toml")
			.load()
			.await;
		assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
	}
}
