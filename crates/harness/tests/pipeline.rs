//! Pipeline integration tests
//!
//! The control-plane CLI and the container runtime are replaced by shell
//! scripts that append every invocation to a log file, so the tests can
//! assert which commands ran, in which order, and that teardown always
//! happens. The scripts answer the handful of `--out json` queries the
//! pipeline parses.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use hubtest_harness::{
    Discoverer, HealthPoller, Orchestrator, OrchestratorConfig,
};

const CLI_SCRIPT: &str = r#"#!/bin/sh
echo "hub $*" >> "@LOG@"
case "$*" in
  "supergraph init . --out json")
    mkdir -p .hub
    printf 'kind: Context\ndefinition:\n  scripts:\n    docker-start:\n      bash: hub auth print-access-token\n      powershell: hub auth print-access-token\n' > .hub/context.yaml
    echo '{"project":"scaffold-1"}'
    ;;
  "connector init "*)
    echo "$3" > "@STATE@"
    case "$3" in
      fail_at_init) echo "connector init refused" >&2; exit 1 ;;
    esac
    ;;
  "supergraph build local")
    if grep -q fail_at_build "@STATE@" 2>/dev/null; then
      echo "build exploded" >&2
      exit 1
    fi
    ;;
  "auth print-pat") echo "test-pat" ;;
  "project init --out json") echo '{"project":"cloud-proj-1"}' ;;
  "supergraph build create --out json") echo '{"build_url":"@BUILD_URL@"}' ;;
esac
exit 0
"#;

const DOCKER_SCRIPT: &str = r#"#!/bin/sh
echo "docker $*" >> "@LOG@"
case "$*" in
  compose*"up --build -d --wait") echo "ctx=$CONNECTOR_CONTEXT_DIR" >> "@LOG@" ;;
  "network create "*)
    if [ -f "@NET@" ]; then
      echo "Error response from daemon: network with name $3 already exists" >&2
      exit 1
    fi
    touch "@NET@"
    ;;
  "network rm "*) rm -f "@NET@" ;;
  compose*"ps --format json") echo '{"Service":"db","Health":"healthy"}' ;;
esac
exit 0
"#;

/// Sandbox with fake binaries, a scratch registry, and their log files
struct Sandbox {
    _root: TempDir,
    cli: PathBuf,
    docker: PathBuf,
    registry: PathBuf,
    project_dir: PathBuf,
    cli_log: PathBuf,
    docker_log: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        Self::with_build_url("http://127.0.0.1:9/graphql")
    }

    fn with_build_url(build_url: &str) -> Self {
        let root = TempDir::new().expect("create sandbox");

        let cli_log = root.path().join("cli.log");
        let docker_log = root.path().join("docker.log");
        let cli = root.path().join("hub");
        let docker = root.path().join("docker");
        let registry = root.path().join("registry");
        let project_dir = root.path().join("project");
        let state = root.path().join("state");
        let network_marker = root.path().join("network-exists");

        write_script(
            &cli,
            &CLI_SCRIPT
                .replace("@LOG@", &cli_log.display().to_string())
                .replace("@STATE@", &state.display().to_string())
                .replace("@BUILD_URL@", build_url),
        );
        write_script(
            &docker,
            &DOCKER_SCRIPT
                .replace("@LOG@", &docker_log.display().to_string())
                .replace("@NET@", &network_marker.display().to_string()),
        );

        std::fs::create_dir_all(&registry).expect("create registry root");

        Self {
            _root: root,
            cli,
            docker,
            registry,
            project_dir,
            cli_log,
            docker_log,
        }
    }

    fn add_connector(&self, name: &str, extra: serde_json::Value) {
        let mut config = json!({
            "hub_id": format!("acme/{}", name),
            "snapshots_dir": "snapshots",
        });
        config
            .as_object_mut()
            .unwrap()
            .extend(extra.as_object().cloned().unwrap_or_default());

        let tests_dir = self.registry.join("acme").join(name).join("tests");
        std::fs::create_dir_all(&tests_dir).expect("create connector dir");
        std::fs::write(
            tests_dir.join("test-config.json"),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .expect("write test config");
    }

    fn add_setup_compose(&self, name: &str) {
        let tests_dir = self.registry.join("acme").join(name).join("tests");
        std::fs::write(tests_dir.join("setup-compose.yaml"), "services: {}\n")
            .expect("write setup compose");
    }

    fn config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            cli_path: self.cli.clone(),
            docker_path: self.docker.clone(),
            project_dir: self.project_dir.clone(),
            settle: Duration::ZERO,
            build_settle: Duration::ZERO,
            health: HealthPoller::new(3, Duration::from_millis(1)),
            ..OrchestratorConfig::default()
        }
    }

    fn cli_log(&self) -> String {
        std::fs::read_to_string(&self.cli_log).unwrap_or_default()
    }

    fn docker_log(&self) -> String {
        std::fs::read_to_string(&self.docker_log).unwrap_or_default()
    }
}

fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, body).expect("write script");
    let mut perms = std::fs::metadata(path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("make script executable");
}

/// Assert the needles appear in the haystack in the given order
fn assert_order(haystack: &str, needles: &[&str]) {
    let mut pos = 0;
    for needle in needles {
        match haystack[pos..].find(needle) {
            Some(offset) => pos += offset + needle.len(),
            None => panic!("'{}' missing or out of order in:\n{}", needle, haystack),
        }
    }
}

async fn run_glob(sandbox: &Sandbox, config: OrchestratorConfig) -> hubtest_common::RunReport {
    let discovery = Discoverer::new(&sandbox.registry)
        .glob("*")
        .expect("discovery succeeds");
    Orchestrator::new(config, CancellationToken::new())
        .run(discovery)
        .await
        .expect("run completes")
}

/// A healthy unit walks every stage in order, then tears down.
#[tokio::test]
async fn full_pipeline_runs_stages_in_order() {
    let sandbox = Sandbox::new();
    sandbox.add_connector("alpha", json!({"envs": ["GREETING=hello"]}));

    let report = run_glob(&sandbox, sandbox.config()).await;

    assert!(report.is_success(), "failures: {:?}", report.failed);
    assert_eq!(report.passed, vec!["acme/alpha"]);
    assert_eq!(report.total, 1);

    assert_order(
        &sandbox.cli_log(),
        &[
            "hub supergraph init . --out json",
            "hub connector init alpha --hub-connector acme/alpha --configure-port 8083 --add-to-compose-file compose.yaml --add-env GREETING=hello",
            "hub connector introspect alpha",
            "hub model add alpha *",
            "hub command add alpha *",
            "hub relationship add alpha *",
            "hub supergraph build local",
            "hub run docker-start -- -d --wait",
        ],
    );
    assert_order(
        &sandbox.docker_log(),
        &[
            "docker network create hub-test-network",
            "docker compose down -v",
            "docker network rm hub-test-network",
        ],
    );
}

/// Hyphenated connector names reach the CLI with underscores.
#[tokio::test]
async fn connector_names_are_sanitized_for_the_cli() {
    let sandbox = Sandbox::new();
    sandbox.add_connector("my-conn", json!({}));

    let report = run_glob(&sandbox, sandbox.config()).await;

    assert!(report.is_success(), "failures: {:?}", report.failed);
    let log = sandbox.cli_log();
    assert!(log.contains("connector init my_conn --hub-connector acme/my-conn"));
    assert!(log.contains("connector introspect my_conn"));
}

/// A failing ConnectorInit short-circuits past every later stage straight
/// to teardown.
#[tokio::test]
async fn failed_stage_short_circuits_to_teardown() {
    let sandbox = Sandbox::new();
    sandbox.add_connector("fail-at-init", json!({}));

    let report = run_glob(&sandbox, sandbox.config()).await;

    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].unit, "acme/fail-at-init");
    assert_eq!(report.failed[0].stage.as_deref(), Some("connector_init"));

    let cli_log = sandbox.cli_log();
    assert!(!cli_log.contains("connector introspect"), "log:\n{}", cli_log);
    assert!(!cli_log.contains("supergraph build local"), "log:\n{}", cli_log);

    let docker_log = sandbox.docker_log();
    assert!(!docker_log.contains("compose down -v"), "deployment never started");
    assert!(docker_log.contains("network rm"), "network released:\n{}", docker_log);

    assert!(!sandbox.project_dir.exists(), "project dir cleared");
}

/// One unit's failure leaves its neighbors untouched; the aggregate names
/// exactly the failing unit.
#[tokio::test]
async fn unit_failures_are_isolated() {
    let sandbox = Sandbox::new();
    sandbox.add_connector("alpha", json!({}));
    sandbox.add_connector("fail-at-build", json!({}));
    sandbox.add_connector("zeta", json!({}));

    let report = run_glob(&sandbox, sandbox.config()).await;

    assert_eq!(report.passed, vec!["acme/alpha", "acme/zeta"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].unit, "acme/fail-at-build");
    assert_eq!(report.failed[0].stage.as_deref(), Some("build_local"));
    assert_eq!(report.total, 3);
}

/// A setup-compose stack comes up before connector registration and goes
/// down after the deployment, before the network.
#[tokio::test]
async fn setup_stack_wraps_the_unit() {
    let sandbox = Sandbox::new();
    sandbox.add_connector(
        "with-deps",
        json!({"setup_compose_file_path": "setup-compose.yaml"}),
    );
    sandbox.add_setup_compose("with-deps");

    let report = run_glob(&sandbox, sandbox.config()).await;
    assert!(report.is_success(), "failures: {:?}", report.failed);

    let docker_log = sandbox.docker_log();
    assert_order(
        &docker_log,
        &[
            "docker network create hub-test-network",
            "--project-name setup-with-deps up --build -d --wait",
            "ctx=",
            "ps --format json",
            "docker compose down -v",
            "--project-name setup-with-deps down -v",
            "docker network rm hub-test-network",
        ],
    );
    assert!(
        docker_log.contains("app/connector/with_deps"),
        "setup stack sees the connector context dir:\n{}",
        docker_log
    );
}

/// Cancellation before the run starts skips every unit but still reports
/// them.
#[tokio::test]
async fn cancelled_run_skips_remaining_units() {
    let sandbox = Sandbox::new();
    sandbox.add_connector("alpha", json!({}));
    sandbox.add_connector("beta", json!({}));

    let discovery = Discoverer::new(&sandbox.registry)
        .glob("*")
        .expect("discovery succeeds");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = Orchestrator::new(sandbox.config(), cancel)
        .run(discovery)
        .await
        .expect("run completes");

    assert_eq!(report.skipped, vec!["acme/alpha", "acme/beta"]);
    assert!(report.passed.is_empty());
    assert!(sandbox.cli_log().is_empty(), "no CLI calls for skipped units");
}

/// With an access token configured, the run logs in once before any unit.
#[tokio::test]
async fn run_level_login_happens_once() {
    let sandbox = Sandbox::new();
    sandbox.add_connector("alpha", json!({}));
    sandbox.add_connector("beta", json!({}));

    let mut config = sandbox.config();
    config.access_token = Some("tok-123".to_string());

    let report = run_glob(&sandbox, config).await;
    assert!(report.is_success(), "failures: {:?}", report.failed);

    let log = sandbox.cli_log();
    assert_eq!(log.matches("hub auth login --pat tok-123").count(), 1);
    assert_order(&log, &["auth login", "supergraph init"]);
}

mod extended {
    use super::*;
    use axum::extract::Json;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::Router;
    use hubtest_harness::CloudConfig;
    use serde_json::Value;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub endpoint");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve stub");
        });
        format!("http://{}", addr)
    }

    fn control_plane_stub(token_for: &'static str) -> Router {
        Router::new()
            .route(
                "/v1/graphql",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    let authorized = headers
                        .get("authorization")
                        .map(|v| v == "pat test-pat")
                        .unwrap_or(false);
                    let name = body
                        .pointer("/variables/name")
                        .and_then(|n| n.as_str())
                        .unwrap_or_default();
                    if authorized && name == "cloud-proj-1" {
                        Json(json!({"data": {"hub_projects": [{"id": "proj-7"}]}}))
                    } else {
                        Json(json!({"data": {"hub_projects": []}}))
                    }
                }),
            )
            .route(
                "/hub/project/token",
                post(move |headers: HeaderMap| async move {
                    let project = headers
                        .get("x-hub-project-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    if project == token_for {
                        Json(json!({"token": "scoped-token"}))
                    } else {
                        Json(json!({}))
                    }
                }),
            )
    }

    /// The extended phase needs both the run-level switch and the unit's
    /// own opt-in; either one alone keeps the unit local.
    #[tokio::test]
    async fn extended_phase_requires_both_switches() {
        let sandbox = Sandbox::new();
        sandbox.add_connector("alpha", json!({"run_cloud_tests": true}));

        let report = run_glob(&sandbox, sandbox.config()).await;
        assert!(report.is_success(), "failures: {:?}", report.failed);
        assert!(!sandbox.cli_log().contains("project init"));

        let sandbox = Sandbox::new();
        sandbox.add_connector("alpha", json!({}));
        let mut config = sandbox.config();
        config.cloud_enabled = true;

        let report = run_glob(&sandbox, config).await;
        assert!(report.is_success(), "failures: {:?}", report.failed);
        assert!(!sandbox.cli_log().contains("project init"));
    }

    /// Opted-in units run the extended phase and delete the remote
    /// project afterwards.
    #[tokio::test]
    async fn extended_phase_provisions_and_cleans_up() {
        let sandbox = Sandbox::new();
        sandbox.add_connector("alpha", json!({"run_cloud_tests": true}));

        let base = serve(control_plane_stub("proj-7")).await;
        let mut config = sandbox.config();
        config.cloud_enabled = true;
        config.cloud = CloudConfig {
            auth_endpoint: base.clone(),
            data_endpoint: base,
        };

        let report = run_glob(&sandbox, config).await;
        assert!(report.is_success(), "failures: {:?}", report.failed);
        assert_eq!(report.passed, vec!["acme/alpha"]);

        assert_order(
            &sandbox.cli_log(),
            &[
                "hub run docker-start",
                "hub project init --out json",
                "hub auth print-pat",
                "hub supergraph build create --out json",
                "hub project delete cloud-proj-1 -f",
            ],
        );
    }

    /// An extended-phase failure is recorded separately and never
    /// invalidates the unit's local pass.
    #[tokio::test]
    async fn extended_failure_preserves_local_pass() {
        let sandbox = Sandbox::new();
        sandbox.add_connector("alpha", json!({"run_cloud_tests": true}));

        // Token endpoint never matches, so the token fetch fails.
        let base = serve(control_plane_stub("other-project")).await;
        let mut config = sandbox.config();
        config.cloud_enabled = true;
        config.cloud = CloudConfig {
            auth_endpoint: base.clone(),
            data_endpoint: base,
        };

        let report = run_glob(&sandbox, config).await;

        assert_eq!(report.passed, vec!["acme/alpha"]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].extended);
        assert_eq!(report.failed[0].stage.as_deref(), Some("extended_phase"));
        assert!(!report.is_success());

        // The half-provisioned remote project is still deleted.
        assert!(sandbox.cli_log().contains("hub project delete cloud-proj-1 -f"));
    }
}
