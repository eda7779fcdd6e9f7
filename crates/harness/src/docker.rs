//! Container runtime operations
//!
//! Compose stacks for per-connector dependencies, the local deployment's
//! teardown, and the shared test network. `compose ps --format json` output
//! changed shape across runtime versions (array vs one object per line), so
//! the status parser accepts both.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use hubtest_common::{Error, Result};

use crate::health::{ServiceStatus, StatusProbe};
use crate::process::{ExecOptions, ProcessRunner};

/// Container runtime CLI bound to the shared process runner
#[derive(Debug, Clone)]
pub struct Docker {
    binary: PathBuf,
    runner: ProcessRunner,
}

impl Docker {
    pub fn new(binary: impl Into<PathBuf>, runner: ProcessRunner) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    /// Copy whose commands keep running during run-level cancellation
    pub fn detached(&self) -> Self {
        Self {
            binary: self.binary.clone(),
            runner: self.runner.detached(),
        }
    }

    /// Build and start a named compose stack, blocking until started
    pub async fn compose_up(
        &self,
        file: &Path,
        project: &str,
        env: &[(String, String)],
    ) -> Result<()> {
        let mut opts = ExecOptions::default();
        for (name, value) in env {
            opts = opts.with_env(name, value);
        }
        let args = compose_args(file, project, &["up", "--build", "-d", "--wait"]);
        self.runner.run(&self.binary, &args, &opts).await?;
        Ok(())
    }

    /// Service status rows for a named compose stack
    pub async fn compose_ps(&self, file: &Path, project: &str) -> Result<Vec<ServiceStatus>> {
        let args = compose_args(file, project, &["ps", "--format", "json"]);
        let out = self
            .runner
            .run(&self.binary, &args, &ExecOptions::default().suppressed())
            .await?;
        Ok(parse_compose_ps(&out.stdout))
    }

    /// Stop and remove a named compose stack together with its volumes
    pub async fn compose_down(&self, file: &Path, project: &str) -> Result<()> {
        let args = compose_args(file, project, &["down", "-v"]);
        self.runner
            .run(&self.binary, &args, &ExecOptions::default())
            .await?;
        Ok(())
    }

    /// `compose down -v` against whatever compose file lives in `dir`
    pub async fn compose_down_in(&self, dir: &Path) -> Result<()> {
        let args: Vec<String> = ["compose", "down", "-v"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        self.runner
            .run(&self.binary, &args, &ExecOptions::in_dir(dir))
            .await?;
        Ok(())
    }

    /// Create a network, treating "already exists" as success. Returns
    /// whether this call created it.
    pub async fn network_create(&self, name: &str) -> Result<bool> {
        let args: Vec<String> = ["network", "create", name]
            .iter()
            .map(|s| s.to_string())
            .collect();
        match self
            .runner
            .run(&self.binary, &args, &ExecOptions::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(Error::CommandFailed { stderr, .. }) if stderr.contains("already exists") => {
                debug!("Network {} already exists", name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn network_remove(&self, name: &str) -> Result<()> {
        let args: Vec<String> = ["network", "rm", name]
            .iter()
            .map(|s| s.to_string())
            .collect();
        self.runner
            .run(&self.binary, &args, &ExecOptions::default())
            .await?;
        Ok(())
    }
}

/// Health probe over one compose stack
#[derive(Debug, Clone)]
pub struct ComposeStatusProbe {
    docker: Docker,
    file: PathBuf,
    project: String,
}

impl ComposeStatusProbe {
    pub fn new(docker: Docker, file: impl Into<PathBuf>, project: impl Into<String>) -> Self {
        Self {
            docker,
            file: file.into(),
            project: project.into(),
        }
    }
}

#[async_trait]
impl StatusProbe for ComposeStatusProbe {
    async fn sample(&self) -> Result<Vec<ServiceStatus>> {
        self.docker.compose_ps(&self.file, &self.project).await
    }
}

fn compose_args(file: &Path, project: &str, tail: &[&str]) -> Vec<String> {
    let mut args = vec![
        "compose".to_string(),
        "-f".to_string(),
        file.display().to_string(),
        "--project-name".to_string(),
        project.to_string(),
    ];
    args.extend(tail.iter().map(|s| s.to_string()));
    args
}

#[derive(Debug, Deserialize)]
struct ComposePsRow {
    #[serde(default, rename = "Service", alias = "Name")]
    service: String,
    #[serde(default, rename = "Health")]
    health: String,
}

impl ComposePsRow {
    fn into_status(self) -> ServiceStatus {
        ServiceStatus {
            name: self.service,
            health: self.health,
        }
    }
}

fn parse_compose_ps(raw: &str) -> Vec<ServiceStatus> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<ComposePsRow>>(trimmed) {
            Ok(rows) => rows.into_iter().map(ComposePsRow::into_status).collect(),
            Err(e) => {
                debug!("Unparseable compose ps array: {}", e);
                Vec::new()
            }
        }
    } else {
        trimmed
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                match serde_json::from_str::<ComposePsRow>(line) {
                    Ok(row) => Some(row.into_status()),
                    Err(e) => {
                        debug!("Unparseable compose ps line: {}", e);
                        None
                    }
                }
            })
            .collect()
    }
}
