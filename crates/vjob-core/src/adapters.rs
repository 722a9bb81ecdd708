//! Interfaces to the remote execution system and output storage.
//!
//! The engine only ever talks to these traits. Concrete implementations live
//! in `vjob-tasks` (container tasks) and `vjob-storage` (object storage).

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use vjob_models::{JobId, ResourceTier, TaskHandle};

/// Environment variable carrying the job ID into the remote task.
pub const ENV_JOB_ID: &str = "JOB_ID";
/// Environment variable carrying the input key into the remote task.
pub const ENV_INPUT_KEY: &str = "INPUT_KEY";
pub const ENV_RESOURCE_TIER: &str = "RESOURCE_TIER";
pub const ENV_OUTPUT_PREFIX: &str = "OUTPUT_PREFIX";

/// Remote statuses after which a task never changes again.
pub const TERMINAL_REMOTE_STATUSES: &[&str] = &["STOPPED", "DELETED"];

/// Parameters for starting one unit of remote work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub job_id: JobId,
    pub input_ref: String,
    pub resource_tier: ResourceTier,
    /// Where the worker writes its outputs (`output/<namespace>/`)
    pub output_prefix: String,
}

impl LaunchRequest {
    /// Environment handed to the remote task; also used for recovery.
    pub fn environment(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ENV_JOB_ID.to_string(), self.job_id.to_string()),
            (ENV_INPUT_KEY.to_string(), self.input_ref.clone()),
            (ENV_RESOURCE_TIER.to_string(), self.resource_tier.to_string()),
            (ENV_OUTPUT_PREFIX.to_string(), self.output_prefix.clone()),
        ])
    }
}

/// The remote system refused to start work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct LaunchError {
    pub reason: String,
}

impl LaunchError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A status query that did not produce an answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusQueryError {
    /// The orchestrator is not allowed to observe the task.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Network failure, throttling or a server-side error.
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl StatusQueryError {
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, StatusQueryError::Permission(_))
    }
}

/// Exit information for one container of a task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerExit {
    pub name: String,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
}

/// How a stopped task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitSignal {
    Clean,
    Failed(Option<String>),
}

/// Point-in-time view of a remote task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskSnapshot {
    pub handle: TaskHandle,
    /// Remote lifecycle status (e.g. `PROVISIONING`, `RUNNING`, `STOPPED`)
    pub last_status: String,
    pub stop_reason: Option<String>,
    pub containers: Vec<ContainerExit>,
    /// Correlation value attached at launch time
    pub started_by: Option<String>,
    /// Environment overrides attached at launch time
    pub environment: BTreeMap<String, String>,
}

impl TaskSnapshot {
    pub fn is_terminal(&self) -> bool {
        TERMINAL_REMOTE_STATUSES
            .iter()
            .any(|s| self.last_status.eq_ignore_ascii_case(s))
    }

    /// Clean only when containers reported and every one exited with 0.
    pub fn exit_signal(&self) -> ExitSignal {
        let all_clean = !self.containers.is_empty()
            && self.containers.iter().all(|c| c.exit_code == Some(0));
        if all_clean {
            return ExitSignal::Clean;
        }

        let mut reasons = Vec::new();
        if let Some(reason) = &self.stop_reason {
            reasons.push(reason.clone());
        }
        for container in &self.containers {
            match (container.exit_code, &container.reason) {
                (Some(0), _) => {}
                (code, Some(reason)) => reasons.push(format!(
                    "container {} exited with {}: {}",
                    container.name,
                    code.map(|c| c.to_string()).unwrap_or_else(|| "no exit code".into()),
                    reason
                )),
                (Some(code), None) => {
                    reasons.push(format!("container {} exited with {}", container.name, code))
                }
                (None, None) => {}
            }
        }

        if reasons.is_empty() {
            ExitSignal::Failed(None)
        } else {
            ExitSignal::Failed(Some(reasons.join("; ")))
        }
    }

    /// Job ID recorded at launch, from `startedBy` or the task environment.
    pub fn recovered_job_id(&self) -> Option<JobId> {
        self.started_by
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.environment.get(ENV_JOB_ID).map(String::as_str))
            .map(JobId::from)
    }

    /// Input key recorded at launch.
    pub fn recovered_input_ref(&self) -> Option<String> {
        self.environment.get(ENV_INPUT_KEY).cloned()
    }
}

/// Starts remote work.
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    /// Returns once the remote system accepted the work, not when it finished.
    async fn launch(&self, request: &LaunchRequest) -> Result<TaskHandle, LaunchError>;
}

/// Answers questions about remote tasks.
#[async_trait]
pub trait TaskStatusProvider: Send + Sync {
    /// `Ok(None)` means the handle is unknown to the remote system.
    async fn describe(&self, handle: &TaskHandle)
        -> Result<Option<TaskSnapshot>, StatusQueryError>;

    /// Handles of tasks that are currently active.
    async fn list_active(&self) -> Result<Vec<TaskHandle>, StatusQueryError>;
}

/// Output catalog listing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Output catalog error: {0}")]
pub struct CatalogError(pub String);

/// Lists output namespaces already present in durable storage.
#[async_trait]
pub trait OutputCatalog: Send + Sync {
    /// Common prefixes directly below `prefix` (e.g. `output/xyz/`).
    async fn list_namespaces(&self, prefix: &str) -> Result<Vec<String>, CatalogError>;
}
