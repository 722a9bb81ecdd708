//! Job-scoped tracing.
//!
//! Every event carries the job ID and the operation that emitted it. Once a
//! remote task is known its handle is carried too, both on events and on the
//! span the job's background task runs in.

use tracing::{debug, error, info, warn, Span};
use vjob_models::{JobId, JobStatus, TaskHandle};

/// Placeholder recorded while no remote task is attached.
const NO_TASK: &str = "-";

#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    operation: &'static str,
    task_handle: Option<TaskHandle>,
}

impl JobLogger {
    /// Logger for one job and operation (`submit` or `monitor`).
    pub fn new(job_id: &JobId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.clone(),
            operation,
            task_handle: None,
        }
    }

    /// Carry `handle` on every later event and on the current span.
    pub fn attach_task(&mut self, handle: &TaskHandle) {
        Span::current().record("task_handle", handle.as_str());
        self.task_handle = Some(handle.clone());
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    pub fn task_handle(&self) -> Option<&TaskHandle> {
        self.task_handle.as_ref()
    }

    fn handle(&self) -> &str {
        self.task_handle
            .as_ref()
            .map(TaskHandle::as_str)
            .unwrap_or(NO_TASK)
    }

    pub fn started(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            task_handle = self.handle(),
            "Job started: {}", message
        );
    }

    /// A remote status that does not change the job.
    pub fn remote_status(&self, remote_status: &str) {
        debug!(
            job_id = %self.job_id,
            operation = self.operation,
            task_handle = self.handle(),
            remote_status,
            "Remote task active"
        );
    }

    /// The job is moving to `status`.
    pub fn transition(&self, status: JobStatus, message: &str) {
        if status == JobStatus::Failed {
            error!(
                job_id = %self.job_id,
                operation = self.operation,
                task_handle = self.handle(),
                status = %status,
                "Job {}: {}", status, message
            );
        } else {
            info!(
                job_id = %self.job_id,
                operation = self.operation,
                task_handle = self.handle(),
                status = %status,
                "Job {}: {}", status, message
            );
        }
    }

    pub fn query_failed(&self, attempt: u32, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            task_handle = self.handle(),
            attempt,
            "Status query failed: {}", message
        );
    }

    pub fn warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            task_handle = self.handle(),
            "Job warning: {}", message
        );
    }

    pub fn error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = self.operation,
            task_handle = self.handle(),
            "Job error: {}", message
        );
    }

    /// Span for the job's background task. `task_handle` is filled in by
    /// [`JobLogger::attach_task`] when the handle is not known yet.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = self.operation,
            task_handle = self.handle(),
        )
    }
}
