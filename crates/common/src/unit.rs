//! Units of work produced by connector discovery

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::TestConfig;

/// One connector version selected for testing
#[derive(Debug, Clone)]
pub struct TestUnit {
    /// Publisher namespace in the registry (unknown for bare job entries)
    pub namespace: Option<String>,
    pub name: String,
    /// Release under test; absent means "latest" as resolved by the CLI
    pub version: Option<String>,
    /// Absolute or registry-relative path of the loaded config
    pub config_path: PathBuf,
    pub config: TestConfig,
}

impl TestUnit {
    /// Connector name in the form the control-plane CLI accepts as a link
    /// name (hyphens are not valid there)
    pub fn sanitized_name(&self) -> String {
        self.name.replace('-', "_")
    }

    /// Version-qualified registry reference for `connector init`
    pub fn hub_ref(&self) -> String {
        match &self.version {
            Some(version) => format!("{}:{}", self.config.hub_id, version),
            None => self.config.hub_id.clone(),
        }
    }

    /// Stable identifier used in logs and outcomes
    pub fn id(&self) -> String {
        self.to_string()
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn snapshots_path(&self) -> PathBuf {
        self.config.snapshots_path(&self.config_path)
    }

    pub fn setup_compose_path(&self) -> Option<PathBuf> {
        self.config.setup_compose_path(&self.config_path)
    }

    /// Compose project name isolating this unit's dependency stack
    pub fn setup_project_name(&self) -> String {
        format!("setup-{}", self.name)
    }
}

impl std::fmt::Display for TestUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(namespace) = &self.namespace {
            write!(f, "{}/", namespace)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

/// One entry of a job file, as emitted by registry CI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub connector_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_version: Option<String>,
    /// Path of the unit's test config, relative to the registry root
    pub test_config_file_path: String,
}

impl JobEntry {
    /// Entry describing an already-resolved unit, in the shape a job file
    /// can feed back in
    pub fn from_unit(unit: &TestUnit) -> Self {
        Self {
            namespace: unit.namespace.clone(),
            connector_name: unit.name.clone(),
            connector_version: unit.version.clone(),
            test_config_file_path: unit.config_path.display().to_string(),
        }
    }
}
