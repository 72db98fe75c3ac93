//! Engine configuration for the converter.
//!
//! Settings are layered: YAML file (or defaults), then `WOD_*` environment
//! variables, then command-line flags.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;
use wod_engine::EngineConfig;

/// Flags that can only switch a policy on top of the loaded settings.
#[derive(Debug, Clone, Default)]
pub struct EngineFlags {
    pub no_impute: bool,
    pub no_impute_text: bool,
    pub strict_schema: bool,
}

/// Resolve the engine configuration for one run.
pub fn load_engine_config(path: Option<&Path>, flags: &EngineFlags) -> Result<EngineConfig> {
    let base = match path {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load engine config from {:?}", path))?,
        None => EngineConfig::default(),
    };

    let mut config = base.with_env_overrides();

    if flags.no_impute {
        config.impute_observations = false;
    }
    if flags.no_impute_text {
        config.impute_text_measurements = false;
    }
    if flags.strict_schema {
        config.strict_schema = true;
    }

    debug!(?config, "Resolved engine configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "impute_text_measurements: false\n").unwrap();

        let flags = EngineFlags {
            no_impute: true,
            strict_schema: true,
            ..EngineFlags::default()
        };
        let config = load_engine_config(Some(&path), &flags).unwrap();
        assert!(!config.impute_observations);
        assert!(!config.impute_text_measurements);
        assert!(config.strict_schema);
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = load_engine_config(Some(Path::new("/nonexistent/engine.yaml")), &EngineFlags::default())
            .unwrap_err();
        assert!(err.to_string().contains("Failed to load engine config"));
    }
}
