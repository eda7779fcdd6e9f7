//! hubtest CLI - Main Entry Point
//!
//! Discovers connector test units in a registry checkout and drives them
//! through the staged pipeline: scaffold, introspect, build, deploy,
//! snapshot tests, teardown.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

mod output;

use hubtest_harness::{CloudConfig, Discoverer, Orchestrator, OrchestratorConfig};

/// hubtest - end-to-end tests for connector hub registries
#[derive(Parser)]
#[command(name = "hubtest")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Registry checkout to discover connectors in
    #[arg(long, env = "HUB_REGISTRY_ROOT", default_value = "registry", global = true)]
    registry_root: PathBuf,

    /// Control-plane CLI binary
    #[arg(long, env = "HUB_CLI_PATH", default_value = "hub", global = true)]
    cli_path: PathBuf,

    /// Container runtime binary
    #[arg(long, default_value = "docker", global = true)]
    docker_path: PathBuf,

    /// Scratch project directory, recreated for every unit
    #[arg(long, env = "HUB_PROJECT_DIR", default_value = "hubtest-project", global = true)]
    project_dir: PathBuf,

    /// Port the local engine listens on
    #[arg(long, env = "HUB_ENGINE_PORT", default_value_t = 3280, global = true)]
    engine_port: u16,

    /// Seconds to wait after the local deployment starts
    #[arg(long, default_value_t = 10, global = true)]
    settle_secs: u64,

    /// Personal access token for the control plane
    #[arg(long, env = "HUB_PAT", hide_env_values = true, global = true)]
    pat: Option<String>,

    /// Enable the extended cloud phase for units that opt in
    #[arg(long, env = "HUB_RUN_CLOUD_TESTS", global = true)]
    cloud: bool,

    /// Auth endpoint for the extended phase
    #[arg(
        long,
        env = "HUB_AUTH_ENDPOINT",
        default_value = "https://auth.hub.dev",
        global = true
    )]
    auth_endpoint: String,

    /// Data endpoint for the extended phase
    #[arg(
        long,
        env = "HUB_DATA_ENDPOINT",
        default_value = "https://data.hub.dev",
        global = true
    )]
    data_endpoint: String,

    /// Write the run report to this file as JSON
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test every connector whose name matches a glob pattern
    Glob {
        /// Pattern over connector names, or namespace/name when it
        /// contains a slash
        #[arg(default_value = "*", env = "HUB_SELECTOR")]
        pattern: String,
    },

    /// Test the units listed in a CI job file
    Jobs {
        /// JSON array of job entries
        file: PathBuf,
    },

    /// Test a single connector
    Unit {
        /// Connector spec in the form namespace/name:version
        spec: String,
    },

    /// List the units a pattern resolves to, without running them
    List {
        #[arg(default_value = "*", env = "HUB_SELECTOR")]
        pattern: String,
    },
}

impl Cli {
    fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            cli_path: self.cli_path.clone(),
            docker_path: self.docker_path.clone(),
            project_dir: self.project_dir.clone(),
            engine_port: self.engine_port,
            settle: Duration::from_secs(self.settle_secs),
            cloud_enabled: self.cloud,
            cloud: CloudConfig {
                auth_endpoint: self.auth_endpoint.clone(),
                data_endpoint: self.data_endpoint.clone(),
            },
            access_token: self.pat.clone(),
            ..OrchestratorConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match run(cli).await {
        // Unit failures are part of the summary, not a CLI error.
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let discoverer = Discoverer::new(&cli.registry_root);

    let discovery = match &cli.command {
        Commands::List { pattern } => {
            let discovery = discoverer.glob(pattern)?;
            for failure in &discovery.failures {
                output::print_warning(&format!(
                    "{}: {}",
                    failure.unit,
                    failure.error.as_deref().unwrap_or("failed to load")
                ));
            }
            output::print_units(&discovery.units, cli.format);
            return Ok(true);
        }
        Commands::Glob { pattern } => discoverer.glob(pattern)?,
        Commands::Jobs { file } => discoverer.from_job_file(file)?,
        Commands::Unit { spec } => discoverer.single(spec)?,
    };

    if discovery.is_empty() {
        output::print_warning("No matching test units");
        return Ok(true);
    }

    output::print_info(&format!(
        "Testing {} unit(s) from {}",
        discovery.units.len(),
        cli.registry_root.display()
    ));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the unit in flight before exiting");
            interrupt.cancel();
            // A second interrupt exits without teardown.
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    let orchestrator = Orchestrator::new(cli.orchestrator_config(), cancel);
    let report = orchestrator.run(discovery).await?;

    if let Some(path) = &cli.output {
        let written = report.write_json(path)?;
        output::print_info(&format!("Report written to {}", written.display()));
    }

    output::print_report(&report, cli.format);
    Ok(report.is_success())
}
