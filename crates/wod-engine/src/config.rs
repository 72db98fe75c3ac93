//! Engine configuration.
//!
//! By default both decoders impute missing measurements and schema
//! inference trusts the first cast.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Switches for the optional decode-time and encode-time policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Mean-impute packed observation slices in the binary decoder.
    pub impute_observations: bool,

    /// Mean-impute measurement columns in the text decoder.
    pub impute_text_measurements: bool,

    /// Fail schema inference when later casts disagree with the first.
    pub strict_schema: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            impute_observations: true,
            impute_text_measurements: true,
            strict_schema: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `WOD_*` environment variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(flag) = env_flag("WOD_IMPUTE_OBSERVATIONS") {
            self.impute_observations = flag;
        }

        if let Some(flag) = env_flag("WOD_IMPUTE_TEXT") {
            self.impute_text_measurements = flag;
        }

        if let Some(flag) = env_flag("WOD_STRICT_SCHEMA") {
            self.strict_schema = flag;
        }

        self
    }

    /// Load configuration from a YAML file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|val| parse_flag(&val))
}

fn parse_flag(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.impute_observations);
        assert!(config.impute_text_measurements);
        assert!(!config.strict_schema);
    }

    #[test]
    fn test_yaml_partial_override() {
        let config = EngineConfig::from_yaml_str("strict_schema: true\n").unwrap();
        assert!(config.strict_schema);
        assert!(config.impute_observations);

        let config = EngineConfig::from_yaml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "impute_observations: false\nimpute_text_measurements: false\n")
            .unwrap();
        let config = EngineConfig::from_yaml_file(&path).unwrap();
        assert!(!config.impute_observations);
        assert!(!config.impute_text_measurements);
    }

    #[test]
    fn test_bad_yaml() {
        let err = EngineConfig::from_yaml_str("strict_schema: [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
    }
}
