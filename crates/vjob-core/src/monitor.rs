//! Per-job monitor loop.
//!
//! Each running job gets one background task that polls the remote task
//! status and drives the job through `running -> {completed, failed}`.
//! The decision for a single observation is made by [`evaluate`], which has no
//! side effects; the loop only sleeps, queries and applies decisions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, Instrument};

use vjob_models::{Job, JobId, JobStatus, OutputLayout, TaskHandle};

use crate::adapters::{ExitSignal, StatusQueryError, TaskSnapshot, TaskStatusProvider};
use crate::config::{MonitorConfig, NotFoundResolution};
use crate::error::OrchestratorResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::store::JobStore;

/// Why a monitor loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    Completed,
    Failed,
    /// Visibility lost; the job stays running
    Degraded,
    /// The job was already terminal when the loop looked at it
    AlreadyTerminal,
    /// The job has no remote task to watch
    MissingHandle,
    Shutdown,
    StoreError,
}

/// Consecutive miss and error counters for one watcher.
#[derive(Debug, Default)]
pub struct PollTracker {
    consecutive_misses: u32,
    consecutive_errors: u32,
    /// Job log length when the current run of misses started
    logs_at_first_miss: Option<usize>,
}

impl PollTracker {
    /// A successful observation resets both counters.
    pub fn record_success(&mut self) {
        if self.consecutive_errors > 0 {
            debug!(
                "Status queries recovered after {} consecutive failures",
                self.consecutive_errors
            );
        }
        self.consecutive_misses = 0;
        self.consecutive_errors = 0;
        self.logs_at_first_miss = None;
    }

    fn record_miss(&mut self, log_count: usize) -> u32 {
        self.consecutive_errors = 0;
        self.consecutive_misses += 1;
        self.logs_at_first_miss.get_or_insert(log_count);
        self.consecutive_misses
    }

    fn record_failure(&mut self) -> u32 {
        self.consecutive_errors += 1;
        self.consecutive_errors
    }

    pub fn miss_count(&self) -> u32 {
        self.consecutive_misses
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_errors
    }
}

/// What to do with one status observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Task is alive; record its status and keep polling
    Active { remote_status: String },
    Complete { remote_status: String },
    Fail {
        remote_status: String,
        reason: Option<String>,
    },
    /// Handle not found, below the threshold
    Missing { misses: u32 },
    /// Handle not found often enough to settle the job heuristically
    ResolveMissing { misses: u32, completed: bool },
    /// Transient query failure; retry next tick
    Retry { attempt: u32, error: String },
    /// Stop polling and leave the job running
    Degrade { reason: String },
}

impl Decision {
    fn is_final(&self) -> bool {
        matches!(
            self,
            Decision::Complete { .. }
                | Decision::Fail { .. }
                | Decision::ResolveMissing { .. }
                | Decision::Degrade { .. }
        )
    }
}

/// Decide what one observation means for the job.
///
/// `log_count` is the job's current log length, used by the log-count
/// heuristic when a handle stops resolving.
pub fn evaluate(
    observation: &Result<Option<TaskSnapshot>, StatusQueryError>,
    tracker: &mut PollTracker,
    log_count: usize,
    config: &MonitorConfig,
) -> Decision {
    match observation {
        Ok(Some(snapshot)) => {
            tracker.record_success();
            let remote_status = snapshot.last_status.clone();
            if !snapshot.is_terminal() {
                return Decision::Active { remote_status };
            }
            match snapshot.exit_signal() {
                ExitSignal::Clean => Decision::Complete { remote_status },
                ExitSignal::Failed(reason) => Decision::Fail {
                    remote_status,
                    reason,
                },
            }
        }
        Ok(None) => {
            let misses = tracker.record_miss(log_count);
            if misses < config.not_found_threshold.max(1) {
                return Decision::Missing { misses };
            }
            let logs_before = tracker.logs_at_first_miss.unwrap_or(log_count);
            let completed = match config.not_found_resolution {
                NotFoundResolution::InferFromLogs { min_log_lines } => logs_before >= min_log_lines,
                NotFoundResolution::AssumeCompleted => true,
                NotFoundResolution::AssumeFailed => false,
            };
            Decision::ResolveMissing { misses, completed }
        }
        Err(StatusQueryError::Permission(msg)) => Decision::Degrade {
            reason: format!("permission denied while querying task status: {}", msg),
        },
        Err(StatusQueryError::Transient(msg)) => {
            let attempt = tracker.record_failure();
            if attempt >= config.max_consecutive_errors.max(1) {
                Decision::Degrade {
                    reason: format!(
                        "status query failed {} consecutive times, last error: {}",
                        attempt, msg
                    ),
                }
            } else {
                Decision::Retry {
                    attempt,
                    error: msg.clone(),
                }
            }
        }
    }
}

fn poll_outcome(observation: &Result<Option<TaskSnapshot>, StatusQueryError>) -> &'static str {
    match observation {
        Ok(Some(snapshot)) if snapshot.is_terminal() => "terminal",
        Ok(Some(_)) => "active",
        Ok(None) => "not_found",
        Err(StatusQueryError::Permission(_)) => "permission_error",
        Err(StatusQueryError::Transient(_)) => "transient_error",
    }
}

/// Interval plus a uniform random jitter.
fn next_delay(config: &MonitorConfig) -> Duration {
    let jitter_ms = config.poll_jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return config.poll_interval;
    }
    config.poll_interval + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
}

/// The watcher for one job.
struct Monitor {
    job_id: JobId,
    store: Arc<dyn JobStore>,
    status: Arc<dyn TaskStatusProvider>,
    config: MonitorConfig,
    layout: OutputLayout,
    logger: JobLogger,
}

impl Monitor {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> MonitorExit {
        let (handle, mut log_count) = match self.store.get(&self.job_id).await {
            Ok(job) if job.is_terminal() => return MonitorExit::AlreadyTerminal,
            Ok(job) if job.monitor_degraded => return MonitorExit::Degraded,
            Ok(job) => match job.task_handle {
                Some(handle) => (handle, job.logs.len()),
                None => {
                    self.logger.warning("No task handle attached, nothing to monitor");
                    return MonitorExit::MissingHandle;
                }
            },
            Err(e) => {
                self.logger.error(&format!("Failed to load job: {}", e));
                return MonitorExit::StoreError;
            }
        };

        self.logger.attach_task(&handle);
        self.logger
            .started(&format!("Monitoring remote task {}", handle.short_id()));
        let mut tracker = PollTracker::default();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return MonitorExit::Shutdown;
                    }
                    continue;
                }
                _ = tokio::time::sleep(next_delay(&self.config)) => {}
            }

            let observation = self.status.describe(&handle).await;
            metrics::record_poll(poll_outcome(&observation));
            let decision = evaluate(&observation, &mut tracker, log_count, &self.config);
            let is_final = decision.is_final();

            match self.apply(&handle, decision).await {
                Ok(job) => {
                    log_count = job.logs.len();
                    if job.is_terminal() && !is_final {
                        return MonitorExit::AlreadyTerminal;
                    }
                    if is_final {
                        return match job.status {
                            JobStatus::Completed => MonitorExit::Completed,
                            JobStatus::Failed => MonitorExit::Failed,
                            _ => MonitorExit::Degraded,
                        };
                    }
                }
                Err(e) => {
                    self.logger.error(&format!("Failed to record status: {}", e));
                    return MonitorExit::StoreError;
                }
            }
        }
    }

    async fn apply(&self, handle: &TaskHandle, decision: Decision) -> OrchestratorResult<Job> {
        let layout = self.layout.clone();
        let short_id = handle.short_id().to_string();

        match decision {
            Decision::Active { remote_status } => {
                self.logger.remote_status(&remote_status);
                self.update(move |job| {
                    if job.status == JobStatus::Pending {
                        job.transition(JobStatus::Running)?;
                    }
                    job.append_log(format!("Remote task status: {}", remote_status));
                    Ok(())
                })
                .await
            }
            Decision::Complete { remote_status } => {
                self.logger.transition(
                    JobStatus::Completed,
                    &format!("remote task {} exited cleanly", short_id),
                );
                self.update(move |job| {
                    job.append_log(format!("Remote task status: {}", remote_status));
                    let outputs = layout.outputs_for(&job.input_ref);
                    let message = format!(
                        "Transcode completed, outputs under {}",
                        layout.output_dir_for(&job.input_ref)
                    );
                    job.complete(outputs, message)
                })
                .await
            }
            Decision::Fail {
                remote_status,
                reason,
            } => {
                let reason =
                    reason.unwrap_or_else(|| "remote task stopped without a clean exit".into());
                self.logger
                    .transition(JobStatus::Failed, &format!("remote task failed: {}", reason));
                self.update(move |job| {
                    job.append_log(format!("Remote task status: {}", remote_status));
                    job.fail(reason)
                })
                .await
            }
            Decision::Missing { misses } => {
                let threshold = self.config.not_found_threshold;
                self.update(move |job| {
                    job.append_log(format!(
                        "Remote task {} not found ({}/{})",
                        short_id, misses, threshold
                    ));
                    Ok(())
                })
                .await
            }
            Decision::ResolveMissing { misses, completed } => {
                self.logger.warning(&format!(
                    "remote task {} not found after {} checks, settling heuristically",
                    short_id, misses
                ));
                self.update(move |job| {
                    let note = format!(
                        "Remote task {} no longer exists after {} checks; outcome inferred heuristically",
                        short_id, misses
                    );
                    job.append_log(note);
                    if completed {
                        let outputs = layout.outputs_for(&job.input_ref);
                        job.complete(outputs, "Assumed completed (heuristic)")
                    } else {
                        job.fail("remote task disappeared before completing (heuristic)")
                    }
                })
                .await
            }
            Decision::Retry { attempt, error } => {
                self.logger.query_failed(attempt, &error);
                self.update(move |job| {
                    job.append_log(format!("Status query failed (attempt {}): {}", attempt, error));
                    Ok(())
                })
                .await
            }
            Decision::Degrade { reason } => {
                self.logger
                    .warning(&format!("monitoring degraded: {}", reason));
                metrics::record_monitor_degraded();
                self.update(move |job| {
                    job.append_log(format!(
                        "Warning: status checks stopped ({}); job left running, remote outcome unknown",
                        reason
                    ));
                    job.monitor_degraded = true;
                    Ok(())
                })
                .await
            }
        }
    }

    /// Apply `f` unless the job already reached a terminal status.
    async fn update<F>(&self, f: F) -> OrchestratorResult<Job>
    where
        F: FnOnce(&mut Job) -> vjob_models::JobResult<()> + Send + 'static,
    {
        self.store
            .update(
                &self.job_id,
                Box::new(move |job| {
                    if job.is_terminal() {
                        return Ok(());
                    }
                    f(job)
                }),
            )
            .await
    }
}

/// Owns the watcher tasks, at most one per job.
pub struct MonitorRegistry {
    store: Arc<dyn JobStore>,
    status: Arc<dyn TaskStatusProvider>,
    config: MonitorConfig,
    layout: OutputLayout,
    watchers: Mutex<HashMap<JobId, JoinHandle<MonitorExit>>>,
    shutdown: watch::Sender<bool>,
}

impl MonitorRegistry {
    pub fn new(
        store: Arc<dyn JobStore>,
        status: Arc<dyn TaskStatusProvider>,
        config: MonitorConfig,
        layout: OutputLayout,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            status,
            config,
            layout,
            watchers: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Start watching `job_id`. Returns `false` if a live watcher already exists
    /// or the registry is shutting down.
    pub async fn watch(&self, job_id: &JobId) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }

        let mut watchers = self.watchers.lock().await;
        watchers.retain(|_, handle| !handle.is_finished());
        if watchers.contains_key(job_id) {
            return false;
        }

        let logger = JobLogger::new(job_id, "monitor");
        let span = logger.span();
        let monitor = Monitor {
            job_id: job_id.clone(),
            store: Arc::clone(&self.store),
            status: Arc::clone(&self.status),
            config: self.config.clone(),
            layout: self.layout.clone(),
            logger,
        };
        let shutdown = self.shutdown.subscribe();
        let id = job_id.clone();
        let handle = tokio::spawn(
            async move {
                let exit = monitor.run(shutdown).await;
                if exit == MonitorExit::StoreError {
                    error!(job_id = %id, "Monitor stopped on a store error");
                } else {
                    debug!(job_id = %id, exit = ?exit, "Monitor stopped");
                }
                exit
            }
            .instrument(span),
        );

        watchers.insert(job_id.clone(), handle);
        true
    }

    /// Whether a live watcher exists for `job_id`.
    pub async fn is_watching(&self, job_id: &JobId) -> bool {
        self.watchers
            .lock()
            .await
            .get(job_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn active_count(&self) -> usize {
        let mut watchers = self.watchers.lock().await;
        watchers.retain(|_, handle| !handle.is_finished());
        watchers.len()
    }

    /// Wait for the watcher of `job_id` to stop and return its exit reason.
    pub async fn join(&self, job_id: &JobId) -> Option<MonitorExit> {
        let handle = self.watchers.lock().await.remove(job_id)?;
        handle.await.ok()
    }

    /// Signal every watcher to stop and wait for them.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<_> = self.watchers.lock().await.drain().collect();
        for (job_id, handle) in handles {
            if let Err(e) = handle.await {
                error!(job_id = %job_id, "Monitor task panicked: {}", e);
            }
        }
    }
}
