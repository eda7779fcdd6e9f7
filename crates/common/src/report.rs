//! Per-unit outcomes and run-level aggregation

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Result of one test phase for one unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub unit: String,
    pub success: bool,
    /// Stage the failure originated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when the failure happened in the extended (cloud) phase
    #[serde(default)]
    pub extended: bool,
    pub duration_ms: u64,
}

impl Outcome {
    pub fn passed(unit: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            unit: unit.into(),
            success: true,
            stage: None,
            error: None,
            extended: false,
            duration_ms,
        }
    }

    pub fn failed(
        unit: impl Into<String>,
        stage: impl Into<String>,
        error: impl std::fmt::Display,
        duration_ms: u64,
    ) -> Self {
        Self {
            unit: unit.into(),
            success: false,
            stage: Some(stage.into()),
            error: Some(error.to_string()),
            extended: false,
            duration_ms,
        }
    }

    pub fn extended_failed(
        unit: impl Into<String>,
        stage: impl Into<String>,
        error: impl std::fmt::Display,
        duration_ms: u64,
    ) -> Self {
        Self {
            extended: true,
            ..Self::failed(unit, stage, error, duration_ms)
        }
    }
}

/// Aggregated result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Units discovery produced, including ones that never ran
    pub total: usize,
    /// Units whose local pipeline passed
    pub passed: Vec<String>,
    /// Failure records; a unit can appear here with `extended: true` while
    /// also being listed in `passed` for its local phase
    pub failed: Vec<Outcome>,
    /// Units skipped after a cancellation request
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            duration_ms: 0,
            total: 0,
            passed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: Outcome) {
        if outcome.success {
            self.passed.push(outcome.unit);
        } else {
            self.failed.push(outcome);
        }
    }

    pub fn skip(&mut self, unit: impl Into<String>) {
        self.skipped.push(unit.into());
    }

    /// The run fails iff at least one failure was recorded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;

        info!("Run report written to: {}", path.display());
        Ok(path.to_path_buf())
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
