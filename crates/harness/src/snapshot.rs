//! Snapshot test execution
//!
//! A snapshot suite is a directory of case directories, each holding a
//! recorded GraphQL request and the response it must produce. Cases run
//! against a live endpoint and compare structurally, so key order and
//! whitespace never matter.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use hubtest_common::{Error, Result};

/// Case file holding the raw query text
pub const REQUEST_FILE: &str = "request.graphql";
/// Optional case file holding the query variables
pub const VARIABLES_FILE: &str = "variables.json";
/// Case file holding the expected response body
pub const RESPONSE_FILE: &str = "response.json";

/// One recorded request/response pair
#[derive(Debug, Clone)]
pub struct SnapshotCase {
    pub name: String,
    pub query: String,
    /// Defaults to `{}` and is always sent
    pub variables: serde_json::Value,
    pub expected: serde_json::Value,
}

impl SnapshotCase {
    /// Load a case from its directory
    pub fn load(dir: &Path) -> Result<Self> {
        let name = case_name(dir);

        let query_path = dir.join(REQUEST_FILE);
        let query = std::fs::read_to_string(&query_path).map_err(|e| {
            Error::Snapshot(format!("cannot read {}: {}", query_path.display(), e))
        })?;

        let variables_path = dir.join(VARIABLES_FILE);
        let variables = if variables_path.is_file() {
            let raw = std::fs::read_to_string(&variables_path)?;
            serde_json::from_str(&raw).map_err(|e| {
                Error::Snapshot(format!("invalid {}: {}", variables_path.display(), e))
            })?
        } else {
            serde_json::json!({})
        };

        let response_path = dir.join(RESPONSE_FILE);
        let raw = std::fs::read_to_string(&response_path).map_err(|e| {
            Error::Snapshot(format!("cannot read {}: {}", response_path.display(), e))
        })?;
        let expected = serde_json::from_str(&raw).map_err(|e| {
            Error::Snapshot(format!("invalid {}: {}", response_path.display(), e))
        })?;

        Ok(Self {
            name,
            query,
            variables,
            expected,
        })
    }
}

/// Replays snapshot cases against one GraphQL endpoint
#[derive(Debug, Clone)]
pub struct SnapshotRunner {
    client: reqwest::Client,
    endpoint: String,
    headers: Vec<(String, String)>,
}

impl SnapshotRunner {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            headers: Vec::new(),
        }
    }

    /// Attach a header to every request (credentials for remote endpoints)
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Run every case under `snapshots_dir`. A missing directory is an
    /// empty suite, not an error. Case failures are collected so every
    /// case gets a chance to run; the returned error names the failed ones.
    pub async fn run_all(&self, snapshots_dir: &Path) -> Result<()> {
        if !snapshots_dir.is_dir() {
            info!(
                "No snapshot directory at {}, nothing to verify",
                snapshots_dir.display()
            );
            return Ok(());
        }

        let mut case_dirs: Vec<PathBuf> = std::fs::read_dir(snapshots_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        case_dirs.sort();

        if case_dirs.is_empty() {
            info!("No snapshot cases under {}", snapshots_dir.display());
            return Ok(());
        }

        let total = case_dirs.len();
        let mut failed: Vec<String> = Vec::new();

        for dir in case_dirs {
            let name = case_name(&dir);
            let case = match SnapshotCase::load(&dir) {
                Ok(case) => case,
                Err(e) => {
                    warn!("Snapshot case {} cannot be loaded: {}", name, e);
                    failed.push(name);
                    continue;
                }
            };

            match self.run_case(&case).await {
                Ok(()) => info!("Snapshot case {} passed", name),
                Err(e) => {
                    warn!("Snapshot case {} failed: {}", name, e);
                    failed.push(name);
                }
            }
        }

        if failed.is_empty() {
            info!("All {} snapshot case(s) passed", total);
            Ok(())
        } else {
            Err(Error::Snapshot(format!(
                "{} of {} case(s) failed: {}",
                failed.len(),
                total,
                failed.join(", ")
            )))
        }
    }

    async fn run_case(&self, case: &SnapshotCase) -> Result<()> {
        let body = serde_json::json!({
            "query": case.query,
            "variables": case.variables,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        let actual: serde_json::Value = response.json().await?;

        if actual != case.expected {
            warn!(
                "Snapshot mismatch for {} (HTTP {})\nexpected: {}\nactual:   {}",
                case.name,
                status,
                serde_json::to_string_pretty(&case.expected)?,
                serde_json::to_string_pretty(&actual)?,
            );
            return Err(Error::Snapshot(format!(
                "response mismatch for case {}",
                case.name
            )));
        }
        Ok(())
    }
}

fn case_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| dir.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_case(root: &Path, name: &str, variables: Option<&str>) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(REQUEST_FILE), "query { items { id } }").unwrap();
        if let Some(variables) = variables {
            std::fs::write(dir.join(VARIABLES_FILE), variables).unwrap();
        }
        std::fs::write(dir.join(RESPONSE_FILE), r#"{"data": {"items": []}}"#).unwrap();
        dir
    }

    #[test]
    fn loads_complete_case() {
        let root = TempDir::new().unwrap();
        let dir = write_case(root.path(), "list-items", Some(r#"{"limit": 5}"#));

        let case = SnapshotCase::load(&dir).unwrap();
        assert_eq!(case.name, "list-items");
        assert_eq!(case.query, "query { items { id } }");
        assert_eq!(case.variables, serde_json::json!({"limit": 5}));
        assert_eq!(case.expected, serde_json::json!({"data": {"items": []}}));
    }

    #[test]
    fn variables_default_to_empty_object() {
        let root = TempDir::new().unwrap();
        let dir = write_case(root.path(), "no-vars", None);

        let case = SnapshotCase::load(&dir).unwrap();
        assert_eq!(case.variables, serde_json::json!({}));
    }

    #[test]
    fn missing_request_fails_the_case() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("broken");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(RESPONSE_FILE), "{}").unwrap();

        let err = SnapshotCase::load(&dir).unwrap_err();
        assert!(matches!(err, Error::Snapshot(_)));
        assert!(err.to_string().contains(REQUEST_FILE));
    }

    #[test]
    fn malformed_expected_response_fails_the_case() {
        let root = TempDir::new().unwrap();
        let dir = write_case(root.path(), "bad-response", None);
        std::fs::write(dir.join(RESPONSE_FILE), "{broken").unwrap();

        let err = SnapshotCase::load(&dir).unwrap_err();
        assert!(matches!(err, Error::Snapshot(_)));
    }

    #[tokio::test]
    async fn missing_suite_directory_passes_trivially() {
        let root = TempDir::new().unwrap();
        let runner = SnapshotRunner::new("http://localhost:1/graphql");
        let missing = root.path().join("no-such-dir");
        assert!(runner.run_all(&missing).await.is_ok());
    }

    #[tokio::test]
    async fn empty_suite_passes_trivially() {
        let root = TempDir::new().unwrap();
        let runner = SnapshotRunner::new("http://localhost:1/graphql");
        assert!(runner.run_all(root.path()).await.is_ok());
    }
}
