//! Runtime configuration
//!
//! All tunables live here: service models and limits, the name-match
//! threshold of the identity merger, and the fixup threshold. Values are
//! read from YAML; every field has a default so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default similarity required for two names to merge: exact canonical
/// names only. Lower it to opt into fuzzy matching.
pub const DEFAULT_NAME_MATCH_THRESHOLD: f64 = 1.0;
/// Default confidence at which a not-visible verdict removes a cell.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// External analysis service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Model identifiers, tried in order until one succeeds.
    pub models: Vec<String>,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum concurrent calls within one stage.
    pub max_concurrency: usize,
    /// Program and arguments of a command-line provider, if any.
    pub command: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            models: vec!["gemini-2.5-pro".to_string(), "gemini-2.5-flash".to_string()],
            timeout_secs: 60,
            max_concurrency: 4,
            command: Vec::new(),
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Identity-resolution merge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Similarity in `0..=1` at which two canonical names are one entity.
    /// `1.0` means exact canonical matches only.
    pub name_match_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            name_match_threshold: DEFAULT_NAME_MATCH_THRESHOLD,
        }
    }
}

/// Validation-fixup settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixupConfig {
    /// Confidence at or above which a not-visible verdict is trusted.
    pub confidence_threshold: f64,
    /// Remove trusted not-visible cells. When false they are only reported.
    pub remove_hallucinations: bool,
}

impl Default for FixupConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            remove_hallucinations: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub service: ServiceConfig,
    pub merge: MergeConfig,
    pub fixup: FixupConfig,
}

impl ReconcileConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("merge.name_match_threshold", self.merge.name_match_threshold)?;
        check_unit("fixup.confidence_threshold", self.fixup.confidence_threshold)?;
        if self.service.models.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "service.models must name at least one model".to_string(),
            ));
        }
        if self.service.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "service.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.service.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "service.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} must be within 0..=1, got {}",
            field, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ReconcileConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fixup.confidence_threshold, 0.7);
        assert_eq!(config.merge.name_match_threshold, 1.0);
        assert_eq!(config.service.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = ReconcileConfig::from_yaml_str(
            "fixup:\n  confidence_threshold: 0.85\nservice:\n  models: [primary, backup]\n",
        )
        .unwrap();
        assert_eq!(config.fixup.confidence_threshold, 0.85);
        assert!(config.fixup.remove_hallucinations);
        assert_eq!(config.service.models, vec!["primary", "backup"]);
        assert_eq!(config.service.max_concurrency, 4);
        assert_eq!(config.merge.name_match_threshold, 1.0);
    }

    #[test]
    fn empty_document_is_default() {
        let config = ReconcileConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, ReconcileConfig::default());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = ReconcileConfig::from_yaml_str("merge:\n  name_match_threshold: 1.5\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains("name_match_threshold")));
    }

    #[test]
    fn empty_model_list_is_rejected() {
        let err = ReconcileConfig::from_yaml_str("service:\n  models: []\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err =
            ReconcileConfig::from_yaml_str("service:\n  max_concurrency: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_yaml_is_a_yaml_error() {
        let err = ReconcileConfig::from_yaml_str("service: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soa.yaml");
        std::fs::write(&path, "service:\n  timeout_secs: 5\n").unwrap();
        let config = ReconcileConfig::load(&path).unwrap();
        assert_eq!(config.service.timeout(), Duration::from_secs(5));
    }
}
