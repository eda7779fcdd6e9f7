//! hubtest Harness
//!
//! End-to-end pipeline for connector hub registries: discovers connectors
//! carrying a test config, then drives each one through the control-plane
//! CLI and the container runtime up to snapshot verification, with
//! guaranteed teardown in between units.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Orchestrator (pipeline)                  │
//! │   Discoverer ──▶ [TestUnit, ...]                             │
//! │   per unit:                                                  │
//! │     Fixture::setup      init → deps → register → introspect │
//! │                         → track → build → deploy → settle   │
//! │     Fixture::test_local snapshot replay vs local engine     │
//! │     Fixture::test_cloud remote build + snapshot replay      │
//! │     Fixture::teardown   best-effort release, always runs    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ControlPlane (CLI)   Docker (compose/network)   CloudClient │
//! │             └──────────── ProcessRunner ────────────┘        │
//! │         EnvResolver        HealthPoller       SnapshotRunner │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod cloud;
pub mod controlplane;
pub mod discover;
pub mod docker;
pub mod env;
pub mod health;
pub mod pipeline;
pub mod process;
pub mod snapshot;

// Re-export the surface the CLI drives
pub use cloud::{CloudClient, CloudConfig};
pub use controlplane::ControlPlane;
pub use discover::{Discoverer, Discovery};
pub use docker::Docker;
pub use env::ResolvedEnvironment;
pub use health::{HealthPoller, HealthReport};
pub use pipeline::{
    ConnectorFixture, Fixture, FixtureRegistry, Orchestrator, OrchestratorConfig, Stage,
    StageFailure, UnitContext,
};
pub use process::{ExecOptions, ExecOutput, ProcessRunner};
pub use snapshot::{SnapshotCase, SnapshotRunner};
