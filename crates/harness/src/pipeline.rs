//! Pipeline orchestration
//!
//! Drives one connector at a time through a fixed stage sequence: project
//! scaffolding, optional dependency services, connector registration and
//! introspection, metadata tracking, local build and deployment, snapshot
//! verification, and an optional extended phase against a remote build.
//! A failing stage short-circuits to teardown; teardown always runs and
//! each of its steps is independently best-effort. One unit's failure
//! never stops the units after it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hubtest_common::{Error, Outcome, Result, RunReport, TestUnit};

use crate::cloud::{CloudClient, CloudConfig, ACCESS_TOKEN_HEADER};
use crate::controlplane::ControlPlane;
use crate::discover::Discovery;
use crate::docker::{ComposeStatusProbe, Docker};
use crate::env;
use crate::health::HealthPoller;
use crate::process::ProcessRunner;
use crate::snapshot::SnapshotRunner;

/// Port the local engine publishes when the deployment starts
pub const DEFAULT_ENGINE_PORT: u16 = 3280;
/// Delay between deployment start and the first test request
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(10);
/// Docker network shared by the deployment and setup stacks
pub const DEFAULT_NETWORK: &str = "hub-test-network";

/// Delay between remote build creation and the first test request
pub const DEFAULT_BUILD_SETTLE: Duration = Duration::from_secs(10);

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    SetupDependencies,
    ConnectorInit,
    Introspect,
    TrackModels,
    TrackCommands,
    TrackRelationships,
    BuildLocal,
    RunDeployment,
    AwaitReady,
    RunSnapshotTests,
    ExtendedPhase,
    Teardown,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::SetupDependencies => "setup_dependencies",
            Stage::ConnectorInit => "connector_init",
            Stage::Introspect => "introspect",
            Stage::TrackModels => "track_models",
            Stage::TrackCommands => "track_commands",
            Stage::TrackRelationships => "track_relationships",
            Stage::BuildLocal => "build_local",
            Stage::RunDeployment => "run_deployment",
            Stage::AwaitReady => "await_ready",
            Stage::RunSnapshotTests => "run_snapshot_tests",
            Stage::ExtendedPhase => "extended_phase",
            Stage::Teardown => "teardown",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error attributed to the stage it happened in
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub source: Error,
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stage, self.source)
    }
}

pub type StageResult = std::result::Result<(), StageFailure>;

fn at_stage<T>(stage: Stage, result: Result<T>) -> std::result::Result<T, StageFailure> {
    result.map_err(|source| StageFailure { stage, source })
}

/// Run-level settings shared by every unit
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Control-plane CLI binary
    pub cli_path: PathBuf,
    /// Container runtime binary
    pub docker_path: PathBuf,
    /// Scratch directory rebuilt for every unit
    pub project_dir: PathBuf,
    /// Port the local engine listens on
    pub engine_port: u16,
    /// Settle delay before local snapshot tests start
    pub settle: Duration,
    /// Settle delay after a remote build before testing it
    pub build_settle: Duration,
    pub network: String,
    /// Master switch for the extended phase; units still opt in via
    /// `run_cloud_tests`
    pub cloud_enabled: bool,
    pub cloud: CloudConfig,
    /// Personal access token for the run-level `auth login`
    pub access_token: Option<String>,
    pub health: HealthPoller,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cli_path: PathBuf::from("hub"),
            docker_path: PathBuf::from("docker"),
            project_dir: std::env::temp_dir().join("hubtest-project"),
            engine_port: DEFAULT_ENGINE_PORT,
            settle: DEFAULT_SETTLE,
            build_settle: DEFAULT_BUILD_SETTLE,
            network: DEFAULT_NETWORK.to_string(),
            cloud_enabled: false,
            cloud: CloudConfig::default(),
            access_token: None,
            health: HealthPoller::default(),
        }
    }
}

/// Externally allocated resources held by one unit, released in reverse
/// order during teardown
#[derive(Debug, Default)]
pub struct RunningResources {
    pub project_dir_created: bool,
    pub network_created: bool,
    /// Compose file and project name of the dependency stack
    pub setup_stack: Option<(PathBuf, String)>,
    pub deployment_started: bool,
    /// Name of the provisioned remote project
    pub remote_project: Option<String>,
}

/// Everything one unit's pipeline needs, owned for the unit's duration
pub struct UnitContext {
    pub unit: TestUnit,
    pub config: OrchestratorConfig,
    pub control: ControlPlane,
    pub docker: Docker,
    pub cancel: CancellationToken,
    pub resources: RunningResources,
}

impl UnitContext {
    fn new(unit: TestUnit, config: OrchestratorConfig, cancel: CancellationToken) -> Self {
        let runner = ProcessRunner::new(cancel.clone());
        let control = ControlPlane::new(&config.cli_path, &config.project_dir, runner.clone());
        let docker = Docker::new(&config.docker_path, runner);
        Self {
            unit,
            config,
            control,
            docker,
            cancel,
            resources: RunningResources::default(),
        }
    }
}

/// Pipeline variant for one connector. The standard sequence lives in
/// [`ConnectorFixture`]; connectors with special needs register their own
/// implementation under their name.
#[async_trait]
pub trait Fixture: Send + Sync {
    /// Init through AwaitReady
    async fn setup(&self, ctx: &mut UnitContext) -> StageResult;
    /// Snapshot verification against the local deployment
    async fn test_local(&self, ctx: &mut UnitContext) -> StageResult;
    /// Remote build plus snapshot verification against it
    async fn test_cloud(&self, ctx: &mut UnitContext) -> StageResult;
    /// Best-effort release of everything setup acquired
    async fn teardown(&self, ctx: &mut UnitContext);
}

/// Fixture registrations keyed by connector name
pub struct FixtureRegistry {
    fixtures: HashMap<String, Arc<dyn Fixture>>,
    fallback: Arc<dyn Fixture>,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self {
            fixtures: HashMap::new(),
            fallback: Arc::new(ConnectorFixture),
        }
    }

    pub fn register(&mut self, connector: impl Into<String>, fixture: Arc<dyn Fixture>) {
        self.fixtures.insert(connector.into(), fixture);
    }

    pub fn get(&self, connector: &str) -> Arc<dyn Fixture> {
        self.fixtures
            .get(connector)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for FixtureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs every discovered unit through its fixture and aggregates outcomes
pub struct Orchestrator {
    config: OrchestratorConfig,
    fixtures: FixtureRegistry,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            fixtures: FixtureRegistry::new(),
            cancel,
        }
    }

    pub fn with_fixtures(mut self, fixtures: FixtureRegistry) -> Self {
        self.fixtures = fixtures;
        self
    }

    /// Run all discovered units. Units failed at discovery go straight
    /// into the report; a cancellation request skips the units not yet
    /// started but still tears down the one in flight.
    pub async fn run(&self, discovery: Discovery) -> Result<RunReport> {
        let started = Instant::now();
        let unit_count = discovery.units.len();

        let mut report = RunReport::new();
        report.total = unit_count + discovery.failures.len();
        for outcome in discovery.failures {
            report.record(outcome);
        }

        // One login per run; every unit shares the session.
        if let Some(token) = &self.config.access_token {
            let runner = ProcessRunner::new(self.cancel.clone());
            let control = ControlPlane::new(&self.config.cli_path, &self.config.project_dir, runner);
            control.auth_login(token).await?;
            info!("Control-plane login succeeded");
        }

        for (index, unit) in discovery.units.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled, skipping {}", unit.id());
                report.skip(unit.id());
                continue;
            }

            info!("[{}/{}] Testing {}", index + 1, unit_count, unit.id());
            for outcome in self.run_unit(unit).await {
                report.record(outcome);
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    async fn run_unit(&self, unit: TestUnit) -> Vec<Outcome> {
        let started = Instant::now();
        let id = unit.id();
        let extended = self.config.cloud_enabled && unit.config.run_cloud_tests;
        let fixture = self.fixtures.get(&unit.name);
        let mut ctx = UnitContext::new(unit, self.config.clone(), self.cancel.clone());

        let mut outcomes = Vec::new();

        let local = match fixture.setup(&mut ctx).await {
            Ok(()) => fixture.test_local(&mut ctx).await,
            Err(failure) => Err(failure),
        };

        match &local {
            Ok(()) => {
                info!("{} passed local verification", id);
                outcomes.push(Outcome::passed(&id, started.elapsed().as_millis() as u64));
            }
            Err(failure) => {
                error!("{} failed at {}: {}", id, failure.stage, failure.source);
                outcomes.push(Outcome::failed(
                    &id,
                    failure.stage.as_str(),
                    &failure.source,
                    started.elapsed().as_millis() as u64,
                ));
            }
        }

        // The extended phase needs the local deployment's project, so it
        // runs before teardown and only after a clean local pass. Its
        // failure does not invalidate that pass.
        if local.is_ok() && extended && !self.cancel.is_cancelled() {
            let extended_started = Instant::now();
            match fixture.test_cloud(&mut ctx).await {
                Ok(()) => info!("{} passed extended verification", id),
                Err(failure) => {
                    error!("{} failed extended phase at {}: {}", id, failure.stage, failure.source);
                    outcomes.push(Outcome::extended_failed(
                        &id,
                        failure.stage.as_str(),
                        &failure.source,
                        extended_started.elapsed().as_millis() as u64,
                    ));
                }
            }
        }

        fixture.teardown(&mut ctx).await;
        outcomes
    }
}

/// The standard connector pipeline
#[derive(Debug, Default, Clone)]
pub struct ConnectorFixture;

impl ConnectorFixture {
    async fn init(&self, ctx: &mut UnitContext) -> Result<()> {
        reset_dir(&ctx.config.project_dir)?;
        ctx.resources.project_dir_created = true;

        ctx.docker.network_create(&ctx.config.network).await?;
        ctx.resources.network_created = true;

        if let Some(project) = ctx.control.supergraph_init().await? {
            debug!("Scaffolded local project {}", project);
        }
        ctx.control.patch_context_scripts()?;
        Ok(())
    }

    async fn start_setup_stack(&self, ctx: &mut UnitContext, compose: &Path) -> Result<()> {
        let project = ctx.unit.setup_project_name();
        let context_dir = ctx
            .config
            .project_dir
            .join("app")
            .join("connector")
            .join(ctx.unit.sanitized_name());
        let env = vec![(
            "CONNECTOR_CONTEXT_DIR".to_string(),
            context_dir.display().to_string(),
        )];

        // Recorded before launch so a half-started stack still gets downed.
        ctx.resources.setup_stack = Some((compose.to_path_buf(), project.clone()));
        ctx.docker.compose_up(compose, &project, &env).await?;

        let probe = ComposeStatusProbe::new(ctx.docker.clone(), compose, project.as_str());
        let report = ctx.config.health.wait_until_ready(&probe).await?;
        if !report.healthy {
            warn!(
                "Continuing with unhealthy services: {}",
                report.unhealthy.join(", ")
            );
        }
        Ok(())
    }

    async fn register_connector(&self, ctx: &mut UnitContext) -> Result<()> {
        let resolved = env::resolve(&ctx.unit.config, &ctx.unit.name)?;
        ctx.control
            .connector_init(
                &ctx.unit.sanitized_name(),
                &ctx.unit.hub_ref(),
                ctx.unit.config.port,
                &resolved,
            )
            .await
    }

    async fn await_ready(&self, ctx: &UnitContext) -> Result<()> {
        info!(
            "Waiting {}s for the deployment to settle",
            ctx.config.settle.as_secs()
        );
        tokio::select! {
            _ = tokio::time::sleep(ctx.config.settle) => Ok(()),
            _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    async fn run_cloud(&self, ctx: &mut UnitContext) -> Result<()> {
        info!("Starting extended verification for {}", ctx.unit.id());

        let project = ctx.control.project_init().await?;
        ctx.resources.remote_project = Some(project.clone());

        let pat = ctx.control.print_pat().await?;
        let cloud = CloudClient::new(ctx.config.cloud.clone());
        let project_id = cloud.project_id(&project, &pat).await?;

        let build_url = ctx.control.build_create().await?;
        debug!("Remote build at {}", build_url);
        tokio::time::sleep(ctx.config.build_settle).await;

        let token = cloud.project_token(&project_id, &pat).await?;
        let runner = SnapshotRunner::new(build_url).with_header(ACCESS_TOKEN_HEADER, token);
        runner.run_all(&ctx.unit.snapshots_path()).await
    }
}

#[async_trait]
impl Fixture for ConnectorFixture {
    async fn setup(&self, ctx: &mut UnitContext) -> StageResult {
        at_stage(Stage::Init, self.init(ctx).await)?;

        if let Some(compose) = ctx.unit.setup_compose_path() {
            at_stage(
                Stage::SetupDependencies,
                self.start_setup_stack(ctx, &compose).await,
            )?;
        }

        at_stage(Stage::ConnectorInit, self.register_connector(ctx).await)?;

        let name = ctx.unit.sanitized_name();
        at_stage(Stage::Introspect, ctx.control.connector_introspect(&name).await)?;
        at_stage(Stage::TrackModels, ctx.control.track_models(&name).await)?;
        at_stage(Stage::TrackCommands, ctx.control.track_commands(&name).await)?;
        at_stage(
            Stage::TrackRelationships,
            ctx.control.track_relationships(&name).await,
        )?;
        at_stage(Stage::BuildLocal, ctx.control.build_local().await)?;

        ctx.resources.deployment_started = true;
        at_stage(Stage::RunDeployment, ctx.control.start_deployment().await)?;

        at_stage(Stage::AwaitReady, self.await_ready(ctx).await)
    }

    async fn test_local(&self, ctx: &mut UnitContext) -> StageResult {
        let endpoint = format!("http://localhost:{}/graphql", ctx.config.engine_port);
        let runner = SnapshotRunner::new(endpoint);
        at_stage(
            Stage::RunSnapshotTests,
            runner.run_all(&ctx.unit.snapshots_path()).await,
        )
    }

    async fn test_cloud(&self, ctx: &mut UnitContext) -> StageResult {
        at_stage(Stage::ExtendedPhase, self.run_cloud(ctx).await)
    }

    async fn teardown(&self, ctx: &mut UnitContext) {
        info!("Tearing down {}", ctx.unit.id());
        let control = ctx.control.detached();
        let docker = ctx.docker.detached();

        if let Some(project) = ctx.resources.remote_project.take() {
            if let Err(e) = control.project_delete(&project).await {
                warn!("Teardown: cannot delete remote project {}: {}", project, e);
            }
        }

        if ctx.resources.deployment_started {
            ctx.resources.deployment_started = false;
            if let Err(e) = docker.compose_down_in(control.project_dir()).await {
                warn!("Teardown: cannot stop local deployment: {}", e);
            }
        }

        if let Some((file, project)) = ctx.resources.setup_stack.take() {
            if let Err(e) = docker.compose_down(&file, &project).await {
                warn!("Teardown: cannot stop setup stack {}: {}", project, e);
            }
        }

        if ctx.resources.network_created {
            ctx.resources.network_created = false;
            if let Err(e) = docker.network_remove(&ctx.config.network).await {
                warn!("Teardown: cannot remove network {}: {}", ctx.config.network, e);
            }
        }

        if ctx.resources.project_dir_created {
            ctx.resources.project_dir_created = false;
            if let Err(e) = remove_dir(&ctx.config.project_dir) {
                warn!("Teardown: cannot clear project directory: {}", e);
            }
        }
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

fn remove_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    Ok(())
}
