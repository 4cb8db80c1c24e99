//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::PcResult;

/// Default location of the application feature list
pub const DEFAULT_FEATURE_FILE: &str = "/tmp/pc_app_feature.cfg";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Application feature list loaded at startup
    pub feature_file: PathBuf,
    /// Drop traffic from devices that belong to no group
    pub drop_anonymous: bool,
    /// Space-separated ingress interfaces to police; empty polices all
    pub src_dev: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feature_file: PathBuf::from(DEFAULT_FEATURE_FILE),
            drop_anonymous: false,
            src_dev: String::new(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> PcResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.as_ref().display(), "Loaded engine config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.feature_file, PathBuf::from(DEFAULT_FEATURE_FILE));
        assert!(!config.drop_anonymous);
        assert!(config.src_dev.is_empty());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"drop_anonymous": true, "src_dev": "br-lan wlan0"}}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert!(config.drop_anonymous);
        assert_eq!(config.src_dev, "br-lan wlan0");
        assert_eq!(config.feature_file, PathBuf::from(DEFAULT_FEATURE_FILE));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(EngineConfig::load("/nonexistent/pc.json").is_err());
    }
}
