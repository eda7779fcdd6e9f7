//! Per-connector test configuration
//!
//! Every connector version that wants to be tested ships a
//! `test-config.json` next to its snapshot suite. Older configs in the wild
//! spell some fields in camelCase; the loader accepts those as aliases and
//! normalizes everything into the canonical form below.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Port a connector listens on when the config does not say otherwise
pub const DEFAULT_CONNECTOR_PORT: u16 = 8083;

fn default_port() -> u16 {
    DEFAULT_CONNECTOR_PORT
}

/// Canonical test configuration for one connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// Registry identifier the connector is published under
    #[serde(default, alias = "hubID")]
    pub hub_id: String,

    /// Port the connector is configured to listen on in the local deployment
    #[serde(default = "default_port")]
    pub port: u16,

    /// NAME=VALUE entries handed to the connector at registration time;
    /// values may contain `$VAR` references expanded against the host env
    #[serde(default)]
    pub envs: Vec<String>,

    /// Compose file starting databases or other services the connector
    /// needs before it can introspect, relative to the config file
    #[serde(default, alias = "setupComposeFile")]
    pub setup_compose_file_path: Option<String>,

    /// Opt this connector into the extended cloud test phase
    #[serde(default, alias = "runCloudTests")]
    pub run_cloud_tests: bool,

    /// Directory of snapshot cases, relative to the config file
    #[serde(default)]
    pub snapshots_dir: String,

    /// Workspace-mode settings (env override list)
    #[serde(default)]
    pub workspace: Option<WorkspaceConfig>,
}

/// Workspace-mode settings for a connector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Whole-list replacement for the resolved environment
    #[serde(default)]
    pub envs: Vec<String>,
}

impl TestConfig {
    /// Load and validate a test config from disk
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Validation(format!("cannot read test config {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw, path)
    }

    /// Parse and validate a test config from a JSON string
    pub fn from_json(raw: &str, path: &Path) -> Result<Self> {
        let config: TestConfig = serde_json::from_str(raw).map_err(|e| {
            Error::Validation(format!("invalid test config {}: {}", path.display(), e))
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Check the fields a test run cannot proceed without
    pub fn validate(&self, path: &Path) -> Result<()> {
        if self.hub_id.trim().is_empty() {
            return Err(Error::Validation(format!(
                "hub_id is required in {}",
                path.display()
            )));
        }
        if self.snapshots_dir.trim().is_empty() {
            return Err(Error::Validation(format!(
                "snapshots_dir is required in {}",
                path.display()
            )));
        }
        Ok(())
    }

    /// Env override list, present only when workspace mode declares one
    pub fn workspace_env_override(&self) -> Option<&[String]> {
        self.workspace
            .as_ref()
            .filter(|w| w.enabled && !w.envs.is_empty())
            .map(|w| w.envs.as_slice())
    }

    /// Snapshot directory resolved against the config file location
    pub fn snapshots_path(&self, config_path: &Path) -> PathBuf {
        config_dir(config_path).join(&self.snapshots_dir)
    }

    /// Setup compose file resolved against the config file location
    pub fn setup_compose_path(&self, config_path: &Path) -> Option<PathBuf> {
        self.setup_compose_file_path
            .as_ref()
            .map(|rel| config_dir(config_path).join(rel))
    }
}

fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
