//! Control-plane CLI wrapper
//!
//! Thin, typed surface over the `hub` binary. Every method shells out
//! through the shared [`ProcessRunner`]; the binary location is injected at
//! construction so tests can point it at a stub script.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use hubtest_common::{Error, Result};

use crate::env::ResolvedEnvironment;
use crate::process::{ExecOptions, ExecOutput, ProcessRunner};

/// Project-relative context file the CLI generates on `supergraph init`
const CONTEXT_FILE: &str = ".hub/context.yaml";

/// Compose file the CLI maintains for local deployments
pub const PROJECT_COMPOSE_FILE: &str = "compose.yaml";

/// One control-plane CLI bound to one scratch project directory
#[derive(Debug, Clone)]
pub struct ControlPlane {
    binary: PathBuf,
    project_dir: PathBuf,
    runner: ProcessRunner,
}

impl ControlPlane {
    pub fn new(
        binary: impl Into<PathBuf>,
        project_dir: impl Into<PathBuf>,
        runner: ProcessRunner,
    ) -> Self {
        Self {
            binary: binary.into(),
            project_dir: project_dir.into(),
            runner,
        }
    }

    /// Copy whose commands keep running during run-level cancellation
    pub fn detached(&self) -> Self {
        Self {
            binary: self.binary.clone(),
            project_dir: self.project_dir.clone(),
            runner: self.runner.detached(),
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Log in with a personal access token. Never echoes the token.
    pub async fn auth_login(&self, token: &str) -> Result<()> {
        let mut args = string_args(&["auth", "login", "--pat"]);
        args.push(token.to_string());
        self.runner
            .run(&self.binary, &args, &ExecOptions::default().suppressed())
            .await?;
        Ok(())
    }

    /// Ask the CLI for the active personal access token
    pub async fn print_pat(&self) -> Result<String> {
        let args = string_args(&["auth", "print-pat"]);
        let out = self
            .runner
            .run(&self.binary, &args, &ExecOptions::default().suppressed())
            .await?;
        let token = out.stdout.trim().to_string();
        if token.is_empty() {
            return Err(Error::Cloud("auth print-pat returned no token".to_string()));
        }
        Ok(token)
    }

    /// Scaffold the project in place; returns the generated project name
    /// when the CLI reports one
    pub async fn supergraph_init(&self) -> Result<Option<String>> {
        let out = self
            .run(string_args(&["supergraph", "init", ".", "--out", "json"]))
            .await?;
        Ok(parse_json_field(&out.stdout, "project"))
    }

    /// Point the generated `docker-start` scripts at the injected binary
    /// instead of whatever `hub` is on the PATH
    pub fn patch_context_scripts(&self) -> Result<()> {
        let path = self.project_dir.join(CONTEXT_FILE);
        let raw = std::fs::read_to_string(&path)?;
        let mut doc: serde_yaml::Value = serde_yaml::from_str(&raw)?;

        let replacement = format!("{} auth", self.binary.display());
        let mut patched = false;
        if let Some(scripts) = doc
            .get_mut("definition")
            .and_then(|d| d.get_mut("scripts"))
            .and_then(|s| s.get_mut("docker-start"))
        {
            for key in ["bash", "powershell"] {
                if let Some(serde_yaml::Value::String(script)) = scripts.get_mut(key) {
                    *script = script.replace("hub auth", &replacement);
                    patched = true;
                }
            }
        }

        if patched {
            std::fs::write(&path, serde_yaml::to_string(&doc)?)?;
            debug!("Patched docker-start scripts in {}", path.display());
        } else {
            warn!("No docker-start scripts to patch in {}", path.display());
        }
        Ok(())
    }

    /// Register a connector with the project, injecting its resolved env
    pub async fn connector_init(
        &self,
        connector: &str,
        hub_ref: &str,
        port: u16,
        env: &ResolvedEnvironment,
    ) -> Result<()> {
        let mut args = string_args(&["connector", "init", connector, "--hub-connector"]);
        args.push(hub_ref.to_string());
        args.push("--configure-port".to_string());
        args.push(port.to_string());
        args.push("--add-to-compose-file".to_string());
        args.push(PROJECT_COMPOSE_FILE.to_string());
        for entry in &env.entries {
            args.push("--add-env".to_string());
            args.push(entry.clone());
        }
        self.run(args).await?;
        Ok(())
    }

    pub async fn connector_introspect(&self, connector: &str) -> Result<()> {
        self.run(string_args(&["connector", "introspect", connector]))
            .await?;
        Ok(())
    }

    pub async fn track_models(&self, connector: &str) -> Result<()> {
        self.track("model", connector).await
    }

    pub async fn track_commands(&self, connector: &str) -> Result<()> {
        self.track("command", connector).await
    }

    pub async fn track_relationships(&self, connector: &str) -> Result<()> {
        self.track("relationship", connector).await
    }

    async fn track(&self, entity: &str, connector: &str) -> Result<()> {
        self.run(string_args(&[entity, "add", connector, "*"]))
            .await?;
        Ok(())
    }

    pub async fn build_local(&self) -> Result<()> {
        self.run(string_args(&["supergraph", "build", "local"]))
            .await?;
        Ok(())
    }

    /// Start the local deployment detached; `--wait` blocks until the
    /// compose stack reports started
    pub async fn start_deployment(&self) -> Result<()> {
        self.run(string_args(&["run", "docker-start", "--", "-d", "--wait"]))
            .await?;
        Ok(())
    }

    /// Provision a remote project; returns its generated name
    pub async fn project_init(&self) -> Result<String> {
        let out = self
            .run(string_args(&["project", "init", "--out", "json"]))
            .await?;
        parse_json_field(&out.stdout, "project").ok_or_else(|| {
            Error::Cloud(format!(
                "project init returned no project name: {}",
                out.stdout.trim()
            ))
        })
    }

    pub async fn project_delete(&self, project: &str) -> Result<()> {
        self.run(string_args(&["project", "delete", project, "-f"]))
            .await?;
        Ok(())
    }

    /// Create a remote build; returns the deployed build URL
    pub async fn build_create(&self) -> Result<String> {
        let out = self
            .run(string_args(&["supergraph", "build", "create", "--out", "json"]))
            .await?;
        parse_json_field(&out.stdout, "build_url").ok_or_else(|| {
            Error::Cloud(format!(
                "build create returned no build_url: {}",
                out.stdout.trim()
            ))
        })
    }

    async fn run(&self, args: Vec<String>) -> Result<ExecOutput> {
        self.runner
            .run(&self.binary, &args, &ExecOptions::in_dir(&self.project_dir))
            .await
    }
}

fn string_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn parse_json_field(raw: &str, field: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()?
        .get(field)?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn json_field_parsing_tolerates_garbage() {
        assert_eq!(
            parse_json_field(r#"{"project": "eager-otter-1234"}"#, "project").as_deref(),
            Some("eager-otter-1234")
        );
        assert_eq!(parse_json_field(r#"{"project": 7}"#, "project"), None);
        assert_eq!(parse_json_field("not json at all", "project"), None);
        assert_eq!(parse_json_field(r#"{"other": "x"}"#, "project"), None);
    }

    #[test]
    fn context_patch_rewrites_both_script_flavors() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".hub")).unwrap();
        std::fs::write(
            dir.path().join(CONTEXT_FILE),
            concat!(
                "kind: Context\n",
                "definition:\n",
                "  scripts:\n",
                "    docker-start:\n",
                "      bash: hub auth print-access-token | docker compose up\n",
                "      powershell: hub auth print-access-token | docker compose up\n",
            ),
        )
        .unwrap();

        let cp = ControlPlane::new(
            "/opt/cli/hub",
            dir.path(),
            ProcessRunner::new(CancellationToken::new()),
        );
        cp.patch_context_scripts().unwrap();

        let patched = std::fs::read_to_string(dir.path().join(CONTEXT_FILE)).unwrap();
        assert_eq!(patched.matches("/opt/cli/hub auth").count(), 2);
        assert!(!patched.contains("powershell: hub auth"));
    }

    #[test]
    fn context_patch_requires_the_file() {
        let dir = TempDir::new().unwrap();
        let cp = ControlPlane::new(
            "hub",
            dir.path(),
            ProcessRunner::new(CancellationToken::new()),
        );
        assert!(cp.patch_context_scripts().is_err());
    }
}
