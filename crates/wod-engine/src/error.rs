//! Engine-local error plumbing.

use thiserror::Error;
use wod_common::WodError;

/// Errors loading an [`EngineConfig`](crate::EngineConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Invalid config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Map a netCDF library failure onto the engine taxonomy.
pub(crate) fn container_error(err: netcdf::Error) -> WodError {
    WodError::MalformedContainer(format!("netCDF: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_errors_are_malformed_container() {
        let err = container_error(netcdf::Error::Str("bad tag".into()));
        assert_eq!(err.kind(), "MalformedContainer");
        assert!(err.to_string().contains("bad tag"));

        let err = container_error(netcdf::Error::NotFound("Temperature".into()));
        assert_eq!(err.kind(), "MalformedContainer");
    }
}
