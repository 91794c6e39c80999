//! JSON cluster configuration: rack capacities and the scheduling
//! policy to run.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::scheduler::Policy;
use crate::topology::Topology;

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawConfig {
    rack_cap: Vec<u32>,
    #[serde(default = "default_simtype")]
    simtype: String,
}

fn default_simtype() -> String {
    "soft".to_string()
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub rack_cap: Vec<u32>,
    pub policy: Policy,
}

impl ClusterConfig {
    /// Load the config named by `path`, or fall back to
    /// [`ClusterConfig::default`] if `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawConfig = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.rack_cap.is_empty() {
            return Err(ConfigError::InvalidTopology("rack_cap must not be empty".into()));
        }
        if raw.rack_cap.iter().any(|&c| c == 0) {
            return Err(ConfigError::InvalidTopology("rack_cap entries must be positive".into()));
        }
        let policy = Policy::from_str(&raw.simtype).unwrap_or_else(|_| {
            warn!(simtype = %raw.simtype, "unrecognized simtype, defaulting to soft");
            Policy::Soft
        });
        Ok(Self { rack_cap: raw.rack_cap, policy })
    }

    pub fn build_topology(&self) -> Result<Topology, ConfigError> {
        Topology::from_rack_caps(&self.rack_cap)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { rack_cap: vec![4, 6, 6, 6], policy: Policy::Soft }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_valid_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"rack_cap": [4, 8, 8], "simtype": "hard"}}"#).unwrap();
        let config = ClusterConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.rack_cap, vec![4, 8, 8]);
        assert_eq!(config.policy, Policy::Hard);
    }

    #[test]
    fn no_path_returns_default() {
        let config = ClusterConfig::load(None).unwrap();
        assert_eq!(config.rack_cap, vec![4, 6, 6, 6]);
        assert_eq!(config.policy, Policy::Soft);
    }

    #[test]
    fn defaults_simtype_to_soft_when_missing() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"rack_cap": [4]}}"#).unwrap();
        let config = ClusterConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.policy, Policy::Soft);
    }

    #[test]
    fn unrecognized_simtype_falls_back_to_soft_without_erroring() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"rack_cap": [4], "simtype": "aggressive"}}"#).unwrap();
        let config = ClusterConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.policy, Policy::Soft);
    }

    #[test]
    fn rejects_empty_rack_cap() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"rack_cap": []}}"#).unwrap();
        assert!(ClusterConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn rejects_zero_sized_rack() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"rack_cap": [4, 0]}}"#).unwrap();
        assert!(ClusterConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ClusterConfig::load(Some(Path::new("/nonexistent/cluster.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
