//! Submission and query facade.
//!
//! `Orchestrator` wires the store, the adapters, the monitor registry and the
//! reconciler together. It is what the HTTP layer holds.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use vjob_models::{Job, JobId, JobStatus, JobSummary, ResourceTier};

use crate::adapters::{LaunchRequest, OutputCatalog, TaskLauncher, TaskStatusProvider};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::monitor::MonitorRegistry;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::snapshot::SnapshotFile;
use crate::store::{spawn_flusher, JobStore, SnapshotJobStore};

/// Job orchestration entry point. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    launcher: Arc<dyn TaskLauncher>,
    monitors: Arc<MonitorRegistry>,
    reconciler: Arc<Reconciler>,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        launcher: Arc<dyn TaskLauncher>,
        status: Arc<dyn TaskStatusProvider>,
        catalog: Arc<dyn OutputCatalog>,
    ) -> Self {
        let monitors = Arc::new(MonitorRegistry::new(
            Arc::clone(&store),
            Arc::clone(&status),
            config.monitor.clone(),
            config.layout.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            status,
            catalog,
            Arc::clone(&monitors),
            config.layout.clone(),
            config.launch_timeout,
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config,
                store,
                launcher,
                monitors,
                reconciler,
                shutdown,
            }),
        }
    }

    /// Build with the store described by `config.snapshot_path`.
    pub async fn open(
        config: OrchestratorConfig,
        launcher: Arc<dyn TaskLauncher>,
        status: Arc<dyn TaskStatusProvider>,
        catalog: Arc<dyn OutputCatalog>,
    ) -> OrchestratorResult<Self> {
        let store: Arc<dyn JobStore> = match &config.snapshot_path {
            Some(path) => Arc::new(SnapshotJobStore::open(SnapshotFile::new(path)).await?),
            None => Arc::new(SnapshotJobStore::in_memory()),
        };
        Ok(Self::new(config, store, launcher, status, catalog))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn monitors(&self) -> &MonitorRegistry {
        &self.inner.monitors
    }

    /// Start the periodic flusher and the delayed startup reconciliation.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let flusher = spawn_flusher(
            Arc::clone(&self.inner.store),
            self.inner.config.flush_interval,
            self.inner.shutdown.subscribe(),
        );
        let startup = Arc::clone(&self.inner.reconciler)
            .spawn_startup(self.inner.config.reconcile_startup_delay);
        vec![flusher, startup]
    }

    /// Create a job and launch its remote task.
    ///
    /// Launch failures are reported synchronously; the job is already
    /// recorded as failed when the error is returned.
    pub async fn submit(&self, input_ref: &str, tier: ResourceTier) -> OrchestratorResult<JobId> {
        validate_input_ref(input_ref)?;

        let job = self.inner.store.create(input_ref, tier).await?;
        metrics::record_job_submitted(tier.as_str());
        let mut logger = JobLogger::new(&job.id, "submit");
        logger.started(&format!("{} ({} tier)", input_ref, tier));

        let layout = &self.inner.config.layout;
        let request = LaunchRequest {
            job_id: job.id.clone(),
            input_ref: job.input_ref.clone(),
            resource_tier: tier,
            output_prefix: layout.output_dir_for(&job.input_ref),
        };

        let timeout = self.inner.config.launch_timeout;
        let launched =
            match tokio::time::timeout(timeout, self.inner.launcher.launch(&request)).await {
                Ok(Ok(handle)) => Ok(handle),
                Ok(Err(e)) => Err(e.reason),
                Err(_) => Err(format!("launch timed out after {:?}", timeout)),
            };

        match launched {
            Ok(handle) => {
                logger.attach_task(&handle);
                logger.transition(JobStatus::Running, "remote task accepted");
                self.inner
                    .store
                    .update(
                        &job.id,
                        Box::new(move |job| {
                            job.attach_handle(handle.clone())?;
                            job.transition(JobStatus::Running)?;
                            job.append_log(format!("Launched remote task {}", handle));
                            Ok(())
                        }),
                    )
                    .await?;
                self.inner.monitors.watch(&job.id).await;
                Ok(job.id)
            }
            Err(reason) => {
                logger.transition(JobStatus::Failed, &format!("launch failed: {}", reason));
                let failure = reason.clone();
                self.inner
                    .store
                    .update(
                        &job.id,
                        Box::new(move |job| {
                            if job.status == JobStatus::Pending {
                                job.fail(format!("launch failed: {}", failure))?;
                            }
                            Ok(())
                        }),
                    )
                    .await?;
                Err(OrchestratorError::launch(&job.id, reason))
            }
        }
    }

    /// Fetch one job.
    ///
    /// Terminal jobs with almost no history get representative log lines
    /// filled in; status and handle are never touched.
    pub async fn get(&self, id: &JobId) -> OrchestratorResult<Job> {
        let job = self.inner.store.get(id).await?;
        if !job.is_terminal() || job.logs.len() >= 2 {
            return Ok(job);
        }

        let output_dir = self.inner.config.layout.output_dir_for(&job.input_ref);
        self.inner
            .store
            .update(
                id,
                Box::new(move |job| {
                    let lines = match job.status {
                        JobStatus::Completed => vec![
                            format!("Processing {}", job.input_ref),
                            format!("Outputs available under {}", output_dir),
                        ],
                        JobStatus::Failed => vec![
                            format!("Processing {}", job.input_ref),
                            "Remote processing did not complete".to_string(),
                        ],
                        _ => Vec::new(),
                    };
                    let existing = job.logs.len();
                    for line in lines.into_iter().skip(existing) {
                        job.append_log(line);
                    }
                    Ok(())
                }),
            )
            .await
    }

    pub async fn list(&self) -> OrchestratorResult<Vec<JobSummary>> {
        Ok(self
            .inner
            .store
            .list()
            .await?
            .iter()
            .map(Job::summary)
            .collect())
    }

    pub async fn reconcile(&self) -> OrchestratorResult<ReconcileReport> {
        self.inner.reconciler.reconcile().await
    }

    /// Restart watchers lost across a restart. Returns the number of jobs touched.
    pub async fn resume_monitors(&self) -> OrchestratorResult<usize> {
        self.inner.reconciler.resume_monitors().await
    }

    /// Stop every watcher, stop the flusher and write a final snapshot.
    pub async fn shutdown(&self) -> OrchestratorResult<()> {
        info!("Stopping job monitors");
        self.inner.monitors.shutdown().await;
        let _ = self.inner.shutdown.send(true);
        self.inner.store.flush().await
    }
}

fn validate_input_ref(input_ref: &str) -> OrchestratorResult<()> {
    if input_ref.trim().is_empty() {
        return Err(OrchestratorError::invalid_input("input_ref must not be empty"));
    }
    if input_ref.starts_with('/') || input_ref.split('/').any(|segment| segment == "..") {
        return Err(OrchestratorError::invalid_input(format!(
            "input_ref must be a relative storage key: {}",
            input_ref
        )));
    }
    Ok(())
}
