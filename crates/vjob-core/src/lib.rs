//! Job orchestration and monitoring engine.
//!
//! This crate provides:
//! - A durable, per-job locked job store with crash-atomic snapshots
//! - Adapter traits for the remote task launcher, status provider and output catalog
//! - One monitor loop per running job, driving the status state machine
//! - A reconciler that imports outputs and recovers untracked remote tasks
//! - The submission and query facade used by the HTTP layer

pub mod adapters;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod reconciler;
pub mod service;
pub mod snapshot;
pub mod store;

#[cfg(test)]
mod scenario_tests;
#[cfg(test)]
mod testing;

pub use adapters::{
    CatalogError, ContainerExit, ExitSignal, LaunchError, LaunchRequest, OutputCatalog,
    StatusQueryError, TaskLauncher, TaskSnapshot, TaskStatusProvider,
};
pub use config::{MonitorConfig, NotFoundResolution, OrchestratorConfig};
pub use error::{OrchestratorError, OrchestratorResult};
pub use logging::JobLogger;
pub use monitor::{MonitorExit, MonitorRegistry};
pub use reconciler::{ReconcileReport, Reconciler};
pub use service::Orchestrator;
pub use snapshot::SnapshotFile;
pub use store::{JobMutation, JobStore, SnapshotJobStore};
