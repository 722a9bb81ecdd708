//! Job definitions and the job status state machine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ResourceTier;

/// Result type for job model operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors raised when a mutation would break a job invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Task handle already set to {existing}")]
    HandleAlreadySet { existing: TaskHandle },

    #[error("Unknown job status: {0}")]
    UnknownStatus(String),
}

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque reference to a unit of remote work (e.g. an ECS task ARN).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(pub String);

impl TaskHandle {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the handle (the task id part of an ARN).
    pub fn short_id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, remote launch not yet confirmed
    #[default]
    Pending,
    /// Remote task accepted and being watched
    Running,
    /// Remote task finished cleanly
    Completed,
    /// Launch or remote task failed
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal edge.
    ///
    /// `Running -> Running` is the only lateral move and is a no-op.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(JobError::UnknownStatus(s.to_string())),
        }
    }
}

/// How a job record came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobOrigin {
    /// Created through job submission
    #[default]
    Submitted,
    /// Synthesized from outputs already present in storage
    ImportedOutput,
    /// Recovered from an active remote task nobody was tracking
    RecoveredTask,
}

/// A single progress log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// A transcoding job and its tracked lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Storage key of the artifact being processed
    pub input_ref: String,

    /// Current status
    #[serde(default)]
    pub status: JobStatus,

    /// Remote task handle, set once launch succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_handle: Option<TaskHandle>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Append-only progress log
    #[serde(default)]
    pub logs: Vec<LogEntry>,

    /// Resource sizing hint used at launch
    #[serde(default)]
    pub resource_tier: ResourceTier,

    /// Output locations (only once completed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<BTreeMap<String, String>>,

    /// Final failure reason (if failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Set once the watcher lost visibility and stopped polling
    #[serde(default)]
    pub monitor_degraded: bool,

    #[serde(default)]
    pub origin: JobOrigin,
}

impl Job {
    /// Create a new pending job.
    pub fn new(input_ref: impl Into<String>, resource_tier: ResourceTier) -> Self {
        Self::with_id(JobId::new(), input_ref, resource_tier)
    }

    /// Create a pending job with a caller-chosen ID.
    pub fn with_id(id: JobId, input_ref: impl Into<String>, resource_tier: ResourceTier) -> Self {
        let now = Utc::now();
        Self {
            id,
            input_ref: input_ref.into(),
            status: JobStatus::Pending,
            task_handle: None,
            created_at: now,
            updated_at: now,
            logs: Vec::new(),
            resource_tier,
            outputs: None,
            error_message: None,
            monitor_degraded: false,
            origin: JobOrigin::Submitted,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append a log line stamped with the current time.
    pub fn append_log(&mut self, message: impl Into<String>) {
        self.logs.push(LogEntry::now(message));
        self.updated_at = Utc::now();
    }

    /// Attach the remote task handle.
    ///
    /// Re-attaching the same handle is a no-op; a different one is rejected.
    pub fn attach_handle(&mut self, handle: TaskHandle) -> JobResult<()> {
        match &self.task_handle {
            Some(existing) if *existing == handle => Ok(()),
            Some(existing) => Err(JobError::HandleAlreadySet {
                existing: existing.clone(),
            }),
            None => {
                self.task_handle = Some(handle);
                self.updated_at = Utc::now();
                Ok(())
            }
        }
    }

    /// Move to `next` if the edge is legal.
    pub fn transition(&mut self, next: JobStatus) -> JobResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the job completed and attach its outputs.
    pub fn complete(
        &mut self,
        outputs: BTreeMap<String, String>,
        message: impl Into<String>,
    ) -> JobResult<()> {
        self.transition(JobStatus::Completed)?;
        self.outputs = Some(outputs);
        self.append_log(message);
        Ok(())
    }

    /// Mark the job failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> JobResult<()> {
        let reason = reason.into();
        self.transition(JobStatus::Failed)?;
        self.append_log(format!("Job failed: {}", reason));
        self.error_message = Some(reason);
        Ok(())
    }

    /// Summary view used by job listings (logs omitted).
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id.clone(),
            status: self.status,
            created_at: self.created_at,
            input_ref: self.input_ref.clone(),
        }
    }
}

/// Compact listing entry for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub input_ref: String,
}
