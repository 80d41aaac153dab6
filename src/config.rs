//! Pipeline configuration.
//!
//! Settings resolve in three layers: built-in defaults, an optional YAML file
//! named by `QUERYSTREAM_CONFIG`, then individual environment overrides. The
//! completion credential is never read from the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::completion::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::completion::OpenAiConfig;
use crate::error::ConfigError;
use crate::nats::client::DEFAULT_NATS_URL;
use crate::nats::NatsConfig;

pub const CONFIG_PATH_VAR: &str = "QUERYSTREAM_CONFIG";
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Default run length, in time units
pub const DEFAULT_RUN_UNITS: u64 = 120;

/// Names of the four pipeline topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicNames {
    pub entry: String,
    pub classification: String,
    pub response: String,
    #[serde(rename = "final")]
    pub final_: String,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            entry: "customer-queries".to_string(),
            classification: "intent-classification".to_string(),
            response: "response-generation".to_string(),
            final_: "final-responses".to_string(),
        }
    }
}

impl TopicNames {
    pub fn all(&self) -> [&str; 4] {
        [
            self.entry.as_str(),
            self.classification.as_str(),
            self.response.as_str(),
            self.final_.as_str(),
        ]
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub nats_url: String,

    pub openai_base_url: String,

    pub model: String,

    /// Length of one time unit in milliseconds
    pub time_unit_ms: u64,

    /// Source cadence, in time units
    pub source_interval_units: u64,

    /// Poll timeout for consuming stages, in time units
    pub poll_timeout_units: u64,

    /// Maximum messages taken per poll
    pub batch_size: usize,

    /// Completion request timeout in seconds; 0 disables it
    pub request_timeout_secs: u64,

    pub topics: TopicNames,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            nats_url: DEFAULT_NATS_URL.to_string(),
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            time_unit_ms: 1000,
            source_interval_units: 10,
            poll_timeout_units: 1,
            batch_size: 100,
            request_timeout_secs: 60,
            topics: TopicNames::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the process environment.
    ///
    /// Reads the YAML file named by `QUERYSTREAM_CONFIG` when set, then
    /// applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::load_from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a YAML file. Missing keys keep their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply overrides from a key lookup (normally the environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("NATS_URL") {
            self.nats_url = url;
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.openai_base_url = url;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.model = model;
        }
        if let Some(raw) = lookup("QUERYSTREAM_TIME_UNIT_MS") {
            self.time_unit_ms = raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "QUERYSTREAM_TIME_UNIT_MS".to_string(),
                reason: format!("{}", e),
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if self.time_unit_ms == 0 {
            return Err(invalid("time_unit_ms", "must be positive"));
        }
        if self.source_interval_units == 0 {
            return Err(invalid("source_interval_units", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be positive"));
        }
        Ok(())
    }

    pub fn time_unit(&self) -> Duration {
        Duration::from_millis(self.time_unit_ms)
    }

    /// Convert a count of time units into wall-clock time
    pub fn units(&self, count: u64) -> Duration {
        self.time_unit().saturating_mul(count.min(u32::MAX as u64) as u32)
    }

    pub fn source_interval(&self) -> Duration {
        self.units(self.source_interval_units)
    }

    pub fn poll_timeout(&self) -> Duration {
        self.units(self.poll_timeout_units)
    }

    pub fn nats(&self) -> NatsConfig {
        NatsConfig {
            url: self.nats_url.clone(),
            ..NatsConfig::default()
        }
    }

    pub fn openai(&self, api_key: String) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.openai_base_url.clone(),
            model: self.model.clone(),
            api_key,
            request_timeout: (self.request_timeout_secs > 0)
                .then(|| Duration::from_secs(self.request_timeout_secs)),
        }
    }
}

/// Read the completion service credential once.
pub fn api_key_from<F>(lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(API_KEY_VAR)
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingCredential(API_KEY_VAR.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.source_interval(), Duration::from_secs(10));
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.topics.all()[0], "customer-queries");
        assert_eq!(config.topics.final_, "final-responses");
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("NATS_URL", "nats://broker:4222"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("QUERYSTREAM_TIME_UNIT_MS", "5"),
        ]);
        let mut config = PipelineConfig::default();
        config.apply_overrides(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.nats_url, "nats://broker:4222");
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.source_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_invalid_time_unit_is_rejected() {
        let vars = env(&[("QUERYSTREAM_TIME_UNIT_MS", "soon")]);
        let mut config = PipelineConfig::default();
        let err = config.apply_overrides(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_from_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model: gpt-4o\ntopics:\n  final: done\nbatch_size: 5").unwrap();

        let config = PipelineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.topics.final_, "done");
        assert_eq!(config.topics.entry, "customer-queries");
        assert_eq!(config.time_unit_ms, 1000);
    }

    #[test]
    fn test_missing_config_file() {
        let err = PipelineConfig::load_from_file("/nonexistent/querystream.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_missing_credential() {
        let vars = env(&[("OPENAI_API_KEY", "  ")]);
        assert!(matches!(
            api_key_from(|k| vars.get(k).cloned()),
            Err(ConfigError::MissingCredential(_))
        ));

        let vars = env(&[("OPENAI_API_KEY", "sk-test")]);
        assert_eq!(api_key_from(|k| vars.get(k).cloned()).unwrap(), "sk-test");
    }

    #[test]
    fn test_openai_config_from_pipeline_config() {
        let mut config = PipelineConfig::default();
        config.request_timeout_secs = 0;
        let openai = config.openai("sk-test".to_string());
        assert_eq!(openai.model, "gpt-4o-mini");
        assert!(openai.request_timeout.is_none());
    }
}
