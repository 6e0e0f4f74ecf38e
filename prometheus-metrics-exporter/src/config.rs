//! Configuration for the Prometheus exporter.

use metrics_exporter_common::{LoggingConfig, load_config, parse_config};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] metrics_exporter_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// HTTP endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Metric exclusion and mapping rules.
    #[serde(default)]
    pub rules: RulesConfig,

    /// Host and process metrics.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "127.0.0.1:8088").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "127.0.0.1:8088".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Ordered exclusion and mapping rules.
///
/// Both lists are evaluated in declaration order and the first match wins.
/// Exclusions are checked before any mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub exclusions: Vec<ExclusionRule>,

    #[serde(default)]
    pub mappings: Vec<MappingRule>,
}

/// A metric whose raw name fully matches `pattern` is never exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRule {
    pub pattern: String,
}

impl ExclusionRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

/// Renames metrics whose raw name fully matches `pattern`.
///
/// `name` and the label templates may reference capture groups of `pattern`
/// as `$1` or `${name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub pattern: String,
    pub name: String,
    #[serde(default)]
    pub labels: Vec<LabelRule>,
}

impl MappingRule {
    pub fn new(pattern: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            name: name.into(),
            labels: Vec::new(),
        }
    }

    /// Add a label template.
    pub fn with_label(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(LabelRule {
            label: label.into(),
            value: value.into(),
        });
        self
    }
}

/// Label key and value templates of a mapping rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRule {
    pub label: String,
    pub value: String,
}

/// Host and process metric collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Register host and process metrics (default: false).
    #[serde(default)]
    pub enabled: bool,

    /// Include per-interface network traffic (default: true).
    #[serde(default = "default_true")]
    pub network: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            network: true,
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Patterns are only checked for emptiness here; they are compiled when
    /// the rule set is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.http.listen
            )));
        }

        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        for (i, exclusion) in self.rules.exclusions.iter().enumerate() {
            if exclusion.pattern.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "exclusions[{}]: pattern must not be empty",
                    i
                )));
            }
        }

        for (i, mapping) in self.rules.mappings.iter().enumerate() {
            if mapping.pattern.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "mappings[{}]: pattern must not be empty",
                    i
                )));
            }
            if mapping.name.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "mappings[{}]: name must not be empty",
                    i
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_common::LogFormat;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(config.http.listen, "127.0.0.1:8088");
        assert_eq!(config.http.path, "/metrics");
        assert!(config.rules.exclusions.is_empty());
        assert!(config.rules.mappings.is_empty());
        assert!(!config.runtime.enabled);
        assert!(config.runtime.network);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            http: {
                listen: "0.0.0.0:9091",
                path: "/prometheus/metrics",
            },
            rules: {
                exclusions: [
                    { pattern: "org\\.apache\\.cassandra\\.metrics\\.Cache\\..*" },
                ],
                mappings: [
                    {
                        pattern: "org\\.apache\\.cassandra\\.metrics\\.keyspace\\.(\\w+)\\.(\\w+)",
                        name: "keyspace_$1",
                        labels: [{ label: "keyspace", value: "$2" }],
                    },
                ],
            },
            runtime: {
                enabled: true,
                network: false,
            },
            logging: {
                level: "debug",
                format: "json",
            },
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.http.listen, "0.0.0.0:9091");
        assert_eq!(config.http.path, "/prometheus/metrics");
        assert_eq!(
            config.rules.exclusions,
            vec![ExclusionRule::new(
                r"org\.apache\.cassandra\.metrics\.Cache\..*"
            )]
        );
        assert_eq!(
            config.rules.mappings,
            vec![
                MappingRule::new(
                    r"org\.apache\.cassandra\.metrics\.keyspace\.(\w+)\.(\w+)",
                    "keyspace_$1"
                )
                .with_label("keyspace", "$2")
            ]
        );
        assert!(config.runtime.enabled);
        assert!(!config.runtime.network);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validate_invalid_listen() {
        let json = r#"{
            http: { listen: "not-an-address" }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let json = r#"{
            http: { path: "no-leading-slash" }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }

    #[test]
    fn test_validate_empty_mapping_name() {
        let json = r#"{
            rules: { mappings: [{ pattern: "a\\.(.*)", name: "" }] }
        }"#;

        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("mappings[0]: name"));
    }

    #[test]
    fn test_validate_empty_exclusion_pattern() {
        let json = r#"{
            rules: { exclusions: [{ pattern: "" }] }
        }"#;

        assert!(ExporterConfig::parse(json).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ http: {{ listen: "127.0.0.1:0" }} }}"#).unwrap();

        let config = ExporterConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.http.listen, "127.0.0.1:0");
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = ExporterConfig::load_from_file("/nonexistent/exporter.json5").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_parse_error_is_load_error() {
        let err = ExporterConfig::parse("{ http: ").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Load(metrics_exporter_common::Error::Config(_))
        ));
    }
}
