//! Service configuration, loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{PolicyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Root directory for tenant upload storage. One subdirectory per tenant.
    #[serde(default = "default_upload_root")]
    pub upload_root: PathBuf,

    /// Path to the event-ID mapping table (JSON). May be absent on disk; the
    /// service then runs with an empty mapping.
    #[serde(default = "default_mapping_path")]
    pub mapping_path: PathBuf,

    /// Keep the most recent file of each type when cleaning a tenant
    /// directory.
    #[serde(default = "default_true")]
    pub cleanup_keep_latest: bool,
}

fn default_upload_root() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_mapping_path() -> PathBuf {
    PathBuf::from("signature_mappings.json")
}

fn default_true() -> bool {
    true
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            upload_root: default_upload_root(),
            mapping_path: default_mapping_path(),
            cleanup_keep_latest: true,
        }
    }
}

impl ManagerConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            PolicyError::config(format!("failed to read config file {}: {e}", path.display()))
        })?;

        let config: ManagerConfig = toml::from_str(&content).map_err(|e| {
            PolicyError::config(format!("failed to parse config file {}: {e}", path.display()))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload_root.as_os_str().is_empty() {
            return Err(PolicyError::config("upload_root cannot be empty"));
        }
        if self.mapping_path.as_os_str().is_empty() {
            return Err(PolicyError::config("mapping_path cannot be empty"));
        }
        Ok(())
    }
}
