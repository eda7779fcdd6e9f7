//! Connector discovery
//!
//! Produces the list of test units for a run from one of three inputs: a
//! selector glob walked over the registry tree, a job file emitted by CI,
//! or a single `publisher/name:version` spec. Per-connector problems
//! (missing or malformed configs) become failed outcomes instead of
//! aborting discovery of the remaining connectors.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use hubtest_common::{Error, JobEntry, Outcome, Result, TestConfig, TestUnit};

/// Registry-relative location of a connector's test config
pub const TEST_CONFIG_RELPATH: &str = "tests/test-config.json";

static CONNECTOR_SPEC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^/]+)/([^:]+):(.+)$").expect("valid pattern"));

/// Result of one discovery pass
#[derive(Debug, Default)]
pub struct Discovery {
    pub units: Vec<TestUnit>,
    /// Units that failed before ever running (bad config, bad job entry)
    pub failures: Vec<Outcome>,
}

impl Discovery {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty() && self.failures.is_empty()
    }
}

/// Walks a registry checkout and turns connectors into test units
#[derive(Debug, Clone)]
pub struct Discoverer {
    registry_root: PathBuf,
}

impl Discoverer {
    pub fn new(registry_root: impl Into<PathBuf>) -> Self {
        Self {
            registry_root: registry_root.into(),
        }
    }

    /// Glob mode: match connector directories under
    /// `<root>/<publisher>/<connector>` against a shell-style pattern.
    /// Patterns containing `/` match the qualified `publisher/connector`
    /// form, bare patterns match the connector name alone. Connectors
    /// without a test config are skipped.
    pub fn glob(&self, pattern: &str) -> Result<Discovery> {
        if !self.registry_root.is_dir() {
            return Err(Error::Discovery(format!(
                "registry root {} is not a directory",
                self.registry_root.display()
            )));
        }

        let matcher = glob_to_regex(pattern)?;
        let qualified = pattern.contains('/');
        let mut discovery = Discovery::default();

        for entry in WalkDir::new(&self.registry_root)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::Discovery(e.to_string()))?;
            if !entry.file_type().is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            let namespace = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let candidate = if qualified {
                format!("{}/{}", namespace, name)
            } else {
                name.clone()
            };
            if !matcher.is_match(&candidate) {
                continue;
            }

            let config_path = entry.path().join(TEST_CONFIG_RELPATH);
            if !config_path.is_file() {
                debug!("{}/{} has no test config, skipping", namespace, name);
                continue;
            }

            self.push_unit(
                &mut discovery,
                Some(namespace),
                name,
                None,
                config_path,
            );
        }

        info!(
            "Discovered {} unit(s) for pattern '{}' ({} failed to load)",
            discovery.units.len(),
            pattern,
            discovery.failures.len()
        );
        Ok(discovery)
    }

    /// Explicit-job mode: read a JSON array of job entries. A malformed
    /// entry fails that entry only.
    pub fn from_job_file(&self, path: &Path) -> Result<Discovery> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Discovery(format!("cannot read job file {}: {}", path.display(), e))
        })?;
        let entries: Vec<serde_json::Value> = serde_json::from_str(&raw).map_err(|e| {
            Error::Discovery(format!("job file {} is not a JSON array: {}", path.display(), e))
        })?;

        let mut discovery = Discovery::default();
        for (index, value) in entries.into_iter().enumerate() {
            let entry: JobEntry = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Job entry #{} is malformed: {}", index, e);
                    discovery.failures.push(Outcome::failed(
                        format!("job entry #{}", index),
                        "discovery",
                        e,
                        0,
                    ));
                    continue;
                }
            };

            let config_path = self.resolve(&entry.test_config_file_path);
            self.push_unit(
                &mut discovery,
                entry.namespace,
                entry.connector_name,
                entry.connector_version,
                config_path,
            );
        }

        info!(
            "Loaded {} unit(s) from {} ({} failed to load)",
            discovery.units.len(),
            path.display(),
            discovery.failures.len()
        );
        Ok(discovery)
    }

    /// Single-spec mode: one `publisher/name:version` string
    pub fn single(&self, spec: &str) -> Result<Discovery> {
        let caps = CONNECTOR_SPEC.captures(spec).ok_or_else(|| {
            Error::Validation(format!(
                "invalid connector spec '{}', expected publisher/name:version",
                spec
            ))
        })?;

        let namespace = caps[1].to_string();
        let name = caps[2].to_string();
        let version = caps[3].to_string();
        let config_path = self
            .registry_root
            .join(&namespace)
            .join(&name)
            .join(TEST_CONFIG_RELPATH);

        let mut discovery = Discovery::default();
        self.push_unit(
            &mut discovery,
            Some(namespace),
            name,
            Some(version),
            config_path,
        );
        Ok(discovery)
    }

    /// Job entries carry config paths relative to the registry root.
    /// Absolute paths and paths already under the root (as produced by
    /// `hubtest list --format json`) are used as-is.
    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() || path.starts_with(&self.registry_root) {
            path.to_path_buf()
        } else {
            self.registry_root.join(path)
        }
    }

    fn push_unit(
        &self,
        discovery: &mut Discovery,
        namespace: Option<String>,
        name: String,
        version: Option<String>,
        config_path: PathBuf,
    ) {
        let id = match (&namespace, &version) {
            (Some(ns), Some(v)) => format!("{}/{}:{}", ns, name, v),
            (Some(ns), None) => format!("{}/{}", ns, name),
            (None, Some(v)) => format!("{}:{}", name, v),
            (None, None) => name.clone(),
        };

        match TestConfig::load(&config_path) {
            Ok(config) => discovery.units.push(TestUnit {
                namespace,
                name,
                version,
                config_path,
                config,
            }),
            Err(e) => {
                warn!("Cannot load test config for {}: {}", id, e);
                discovery
                    .failures
                    .push(Outcome::failed(id, "discovery", e, 0));
            }
        }
    }
}

fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 4);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            ch => expr.push_str(&regex::escape(&ch.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
        .map_err(|e| Error::Validation(format!("invalid selector pattern '{}': {}", pattern, e)))
}
