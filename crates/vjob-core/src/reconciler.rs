//! Reconciliation between the job store and the outside world.
//!
//! Two scans bring the store back in line with reality after restarts or
//! out-of-band work:
//! - outputs already present in storage without a job become completed jobs
//! - active remote tasks nobody tracks are attached to their job (or a new
//!   one) and get a monitor
//!
//! A pass also restarts monitors for running jobs that lost their watcher and
//! fails pending jobs whose launch can no longer complete. Every step is
//! idempotent, so running a pass twice without remote changes is a no-op.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vjob_models::{
    Job, JobId, JobOrigin, JobStatus, OutputLayout, ResourceTier, TaskHandle,
};

use crate::adapters::{OutputCatalog, TaskSnapshot, TaskStatusProvider, ENV_RESOURCE_TIER};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics;
use crate::monitor::MonitorRegistry;
use crate::store::JobStore;

/// Failure reason for pending jobs whose launch never finished.
pub const STALE_LAUNCH_REASON: &str = "orchestrator restarted before launch completed";

/// Pending jobs older than this many launch timeouts are treated as abandoned.
const STALE_LAUNCH_FACTOR: u32 = 2;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Completed jobs synthesized from existing outputs
    pub imported_outputs: usize,
    /// Running jobs created for untracked remote tasks
    pub recovered_tasks: usize,
    /// Existing jobs that were attached, resumed or failed
    pub updated_jobs: usize,
}

impl ReconcileReport {
    /// Number of jobs created or updated.
    pub fn total(&self) -> usize {
        self.imported_outputs + self.recovered_tasks + self.updated_jobs
    }
}

pub struct Reconciler {
    store: Arc<dyn JobStore>,
    status: Arc<dyn TaskStatusProvider>,
    catalog: Arc<dyn OutputCatalog>,
    monitors: Arc<MonitorRegistry>,
    layout: OutputLayout,
    launch_timeout: Duration,
    /// One pass at a time
    pass: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn JobStore>,
        status: Arc<dyn TaskStatusProvider>,
        catalog: Arc<dyn OutputCatalog>,
        monitors: Arc<MonitorRegistry>,
        layout: OutputLayout,
        launch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            status,
            catalog,
            monitors,
            layout,
            launch_timeout,
            pass: Mutex::new(()),
        }
    }

    /// Run both scans and the resume step.
    ///
    /// A failing catalog or status provider is logged and skipped; store
    /// errors abort the pass.
    pub async fn reconcile(&self) -> OrchestratorResult<ReconcileReport> {
        let _pass = self.pass.lock().await;

        let imported_outputs = self.import_outputs().await?;
        let (recovered_tasks, attached) = self.recover_tasks().await?;
        let updated_jobs = attached + self.resume_monitors_locked().await?;

        let report = ReconcileReport {
            imported_outputs,
            recovered_tasks,
            updated_jobs,
        };
        metrics::record_reconciled("imported_output", imported_outputs);
        metrics::record_reconciled("recovered_task", recovered_tasks);
        metrics::record_reconciled("updated", updated_jobs);
        info!(
            imported_outputs,
            recovered_tasks,
            updated_jobs,
            "Reconciliation pass finished"
        );
        Ok(report)
    }

    /// Restart watchers for running jobs and fail stale pending jobs.
    ///
    /// Returns the number of jobs touched.
    pub async fn resume_monitors(&self) -> OrchestratorResult<usize> {
        let _pass = self.pass.lock().await;
        self.resume_monitors_locked().await
    }

    /// Run one pass after `delay`.
    pub fn spawn_startup(self: Arc<Self>, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match self.reconcile().await {
                Ok(report) => info!(total = report.total(), "Startup reconciliation complete"),
                Err(e) => error!("Startup reconciliation failed: {}", e),
            }
        })
    }

    async fn import_outputs(&self) -> OrchestratorResult<usize> {
        let prefixes = match self.catalog.list_namespaces(&self.layout.output_prefix).await {
            Ok(prefixes) => prefixes,
            Err(e) => {
                warn!("Skipping completed-output scan: {}", e);
                return Ok(0);
            }
        };

        let jobs = self.store.list().await?;
        let mut imported = 0;
        for prefix in prefixes {
            let Some(namespace) = self.layout.namespace_from_prefix(&prefix) else {
                continue;
            };
            if jobs.iter().any(|job| self.references(job, &namespace)) {
                continue;
            }

            if self.store.insert(self.imported_job(&namespace)).await? {
                info!(namespace = %namespace, "Imported completed job from existing outputs");
                imported += 1;
            }
        }
        Ok(imported)
    }

    /// Best-effort match: the derived namespace, or a substring of the input.
    fn references(&self, job: &Job, namespace: &str) -> bool {
        self.layout.namespace_for(&job.input_ref) == namespace || job.input_ref.contains(namespace)
    }

    fn imported_job(&self, namespace: &str) -> Job {
        let input_ref = self.layout.reconstruct_input_ref(namespace);
        let output_dir = self.layout.output_dir_for(&input_ref);
        let mut job = Job::with_id(
            JobId::from(format!("import-{}", namespace)),
            input_ref.clone(),
            ResourceTier::default(),
        );
        job.origin = JobOrigin::ImportedOutput;
        job.status = JobStatus::Completed;
        job.outputs = Some(self.layout.outputs_for(&input_ref));
        job.append_log(format!("Imported from existing outputs under {}", output_dir));
        job.append_log("Transcode completed before this orchestrator tracked it");
        job
    }

    /// Returns `(jobs created, existing jobs attached)`.
    async fn recover_tasks(&self) -> OrchestratorResult<(usize, usize)> {
        let handles = match self.status.list_active().await {
            Ok(handles) => handles,
            Err(e) => {
                warn!("Skipping active-task scan: {}", e);
                return Ok((0, 0));
            }
        };

        let tracked: HashSet<TaskHandle> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter_map(|job| job.task_handle)
            .collect();

        let mut created = 0;
        let mut attached = 0;
        for handle in handles.into_iter().filter(|h| !tracked.contains(h)) {
            let snapshot = match self.status.describe(&handle).await {
                Ok(Some(snapshot)) if !snapshot.is_terminal() => snapshot,
                Ok(_) => continue,
                Err(e) => {
                    warn!(task_handle = %handle, "Could not describe untracked task: {}", e);
                    continue;
                }
            };

            let existing = match snapshot.recovered_job_id() {
                Some(id) => match self.store.get(&id).await {
                    Ok(job) => Some(job),
                    Err(OrchestratorError::NotFound(_)) => None,
                    Err(e) => return Err(e),
                },
                None => None,
            };

            match existing {
                Some(job) => {
                    if self.attach(job, handle).await? {
                        attached += 1;
                    }
                }
                None => {
                    if self.create_recovered(&snapshot).await? {
                        created += 1;
                    }
                }
            }
        }
        Ok((created, attached))
    }

    /// Attach an untracked task to the job that launched it.
    async fn attach(&self, job: Job, handle: TaskHandle) -> OrchestratorResult<bool> {
        if job.is_terminal() || job.task_handle.is_some() {
            warn!(
                job_id = %job.id,
                task_handle = %handle,
                status = %job.status,
                "Untracked task names a job that cannot take it"
            );
            return Ok(false);
        }

        let message = format!("Recovered remote task {}", handle);
        let id = job.id.clone();
        self.store
            .update(
                &id,
                Box::new(move |job| {
                    job.attach_handle(handle)?;
                    if job.status == JobStatus::Pending {
                        job.transition(JobStatus::Running)?;
                    }
                    job.append_log(message);
                    Ok(())
                }),
            )
            .await?;
        self.monitors.watch(&id).await;
        info!(job_id = %id, "Attached untracked remote task to existing job");
        Ok(true)
    }

    async fn create_recovered(&self, snapshot: &TaskSnapshot) -> OrchestratorResult<bool> {
        let handle = snapshot.handle.clone();
        let id = snapshot
            .recovered_job_id()
            .unwrap_or_else(|| JobId::from(format!("task-{}", handle.short_id())));
        let input_ref = snapshot
            .recovered_input_ref()
            .unwrap_or_else(|| format!("unknown/{}", handle.short_id()));
        let tier = snapshot
            .environment
            .get(ENV_RESOURCE_TIER)
            .and_then(|t| t.parse().ok())
            .unwrap_or_default();

        let mut job = Job::with_id(id.clone(), input_ref, tier);
        job.origin = JobOrigin::RecoveredTask;
        job.attach_handle(handle.clone())?;
        job.transition(JobStatus::Running)?;
        job.append_log(format!("Recovered untracked remote task {}", handle));
        job.append_log(format!("Remote task status: {}", snapshot.last_status));

        if !self.store.insert(job).await? {
            return Ok(false);
        }
        self.monitors.watch(&id).await;
        info!(job_id = %id, task_handle = %handle, "Created job for untracked remote task");
        Ok(true)
    }

    async fn resume_monitors_locked(&self) -> OrchestratorResult<usize> {
        // A launch still in flight has up to one launch_timeout left; allow two.
        let stale_before = Utc::now()
            - chrono::Duration::from_std(self.launch_timeout * STALE_LAUNCH_FACTOR)
                .unwrap_or(chrono::Duration::zero());
        let mut touched = 0;

        for job in self.store.list().await? {
            match job.status {
                JobStatus::Running if !job.monitor_degraded && job.task_handle.is_some() => {
                    if !self.monitors.is_watching(&job.id).await && self.monitors.watch(&job.id).await {
                        info!(job_id = %job.id, "Resumed monitor for running job");
                        touched += 1;
                    }
                }
                JobStatus::Pending if job.task_handle.is_none() && job.created_at <= stale_before => {
                    let updated = self
                        .store
                        .update(
                            &job.id,
                            Box::new(|job| {
                                if job.status == JobStatus::Pending && job.task_handle.is_none() {
                                    job.fail(STALE_LAUNCH_REASON)?;
                                }
                                Ok(())
                            }),
                        )
                        .await?;
                    if updated.error_message.as_deref() == Some(STALE_LAUNCH_REASON) {
                        warn!(job_id = %job.id, "Failed pending job whose launch never completed");
                        touched += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{LaunchRequest, StatusQueryError};
    use crate::store::SnapshotJobStore;
    use crate::testing::{self, FakeCatalog, ScriptedStatus};

    struct Fixture {
        store: Arc<SnapshotJobStore>,
        status: Arc<ScriptedStatus>,
        catalog: Arc<FakeCatalog>,
        monitors: Arc<MonitorRegistry>,
        reconciler: Reconciler,
    }

    fn fixture(launch_timeout: Duration) -> Fixture {
        let store = Arc::new(SnapshotJobStore::in_memory());
        let status = ScriptedStatus::new();
        let catalog = FakeCatalog::new(&[]);
        let monitors = Arc::new(MonitorRegistry::new(
            store.clone(),
            status.clone(),
            testing::fast_monitor_config(),
            OutputLayout::default(),
        ));
        let reconciler = Reconciler::new(
            store.clone(),
            status.clone(),
            catalog.clone(),
            Arc::clone(&monitors),
            OutputLayout::default(),
            launch_timeout,
        );
        Fixture {
            store,
            status,
            catalog,
            monitors,
            reconciler,
        }
    }

    fn launched_task(handle: &str, job_id: &str, started_by: bool) -> TaskSnapshot {
        let request = LaunchRequest {
            job_id: JobId::from(job_id),
            input_ref: "raw/movie.mp4".into(),
            resource_tier: ResourceTier::Premium,
            output_prefix: "output/movie/".into(),
        };
        TaskSnapshot {
            handle: TaskHandle::new(handle),
            last_status: "RUNNING".into(),
            started_by: started_by.then(|| job_id.to_string()),
            environment: request.environment(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_imports_unknown_output_namespaces_once() {
        let f = fixture(Duration::from_secs(30));
        f.catalog.set(&["output/xyz/", "output/a/"]);
        f.store
            .create("raw/a.mp4", ResourceTier::Standard)
            .await
            .unwrap();

        let first = f.reconciler.reconcile().await.unwrap();
        assert_eq!(first.imported_outputs, 1);

        let job = f.store.get(&JobId::from("import-xyz")).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.origin, JobOrigin::ImportedOutput);
        assert_eq!(job.input_ref, "raw/xyz.mp4");
        assert!(job.outputs.unwrap().values().all(|o| o.starts_with("output/xyz/")));

        let second = f.reconciler.reconcile().await.unwrap();
        assert_eq!(second.total(), 0);
        assert_eq!(f.store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_catalog_failure_does_not_stop_task_scan() {
        let f = fixture(Duration::from_secs(30));
        f.catalog.fail("bucket unreachable");
        f.status.set_active(&["arn:task/abc"]);
        f.status.script(
            "arn:task/abc",
            vec![Ok(Some(launched_task("arn:task/abc", "job-77", true)))],
        );

        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.imported_outputs, 0);
        assert_eq!(report.recovered_tasks, 1);

        let job = f.store.get(&JobId::from("job-77")).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.origin, JobOrigin::RecoveredTask);
        assert_eq!(job.input_ref, "raw/movie.mp4");
        assert_eq!(job.resource_tier, ResourceTier::Premium);
        assert!(f.monitors.is_watching(&job.id).await);
        f.monitors.shutdown().await;
    }

    #[tokio::test]
    async fn test_task_without_correlation_gets_synthesized_id() {
        let f = fixture(Duration::from_secs(30));
        f.status.set_active(&["arn:aws:ecs:eu-west-1:1:task/c/deadbeef"]);
        f.status.script(
            "arn:aws:ecs:eu-west-1:1:task/c/deadbeef",
            vec![testing::active("arn:aws:ecs:eu-west-1:1:task/c/deadbeef", "RUNNING")],
        );

        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.recovered_tasks, 1);
        assert!(f.store.get(&JobId::from("task-deadbeef")).await.is_ok());

        let again = f.reconciler.reconcile().await.unwrap();
        assert_eq!(again.total(), 0);
        f.monitors.shutdown().await;
    }

    #[tokio::test]
    async fn test_recovered_id_attaches_to_pending_job() {
        let f = fixture(Duration::from_secs(30));
        let job = f.store.create("raw/movie.mp4", ResourceTier::Premium).await.unwrap();
        f.status.set_active(&["T9"]);
        f.status.script(
            "T9",
            vec![Ok(Some(launched_task("T9", job.id.as_str(), false)))],
        );

        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.recovered_tasks, 0);
        assert_eq!(report.updated_jobs, 1);

        let job = f.store.get(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.task_handle, Some(TaskHandle::new("T9")));
        f.monitors.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_provider_failure_is_skipped() {
        let f = fixture(Duration::from_secs(30));
        f.status.fail_active(StatusQueryError::permission("ecs:ListTasks"));
        f.catalog.set(&["output/xyz/"]);

        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.imported_outputs, 1);
        assert_eq!(report.recovered_tasks, 0);
    }

    #[tokio::test]
    async fn test_stale_pending_jobs_fail_and_running_jobs_resume() {
        let f = fixture(Duration::ZERO);
        let stale = f.store.create("raw/a.mp4", ResourceTier::Standard).await.unwrap();

        let running = f.store.create("raw/b.mp4", ResourceTier::Standard).await.unwrap();
        f.store
            .update(
                &running.id,
                Box::new(|job| {
                    job.attach_handle(TaskHandle::new("T2"))?;
                    job.transition(JobStatus::Running)
                }),
            )
            .await
            .unwrap();
        f.status.script("T2", vec![testing::active("T2", "RUNNING")]);

        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.updated_jobs, 2);

        let stale = f.store.get(&stale.id).await.unwrap();
        assert_eq!(stale.status, JobStatus::Failed);
        assert_eq!(stale.error_message.as_deref(), Some(STALE_LAUNCH_REASON));
        assert!(f.monitors.is_watching(&running.id).await);

        let again = f.reconciler.resume_monitors().await.unwrap();
        assert_eq!(again, 0);
        f.monitors.shutdown().await;
    }

    #[tokio::test]
    async fn test_pending_job_within_grace_margin_is_left_alone() {
        let f = fixture(Duration::from_secs(10));

        let mut recent = Job::new("raw/recent.mp4", ResourceTier::Standard);
        recent.created_at = Utc::now() - chrono::Duration::seconds(15);
        let recent_id = recent.id.clone();
        assert!(f.store.insert(recent).await.unwrap());

        let mut abandoned = Job::new("raw/old.mp4", ResourceTier::Standard);
        abandoned.created_at = Utc::now() - chrono::Duration::seconds(25);
        let abandoned_id = abandoned.id.clone();
        assert!(f.store.insert(abandoned).await.unwrap());

        let touched = f.reconciler.resume_monitors().await.unwrap();
        assert_eq!(touched, 1);

        let recent = f.store.get(&recent_id).await.unwrap();
        assert_eq!(recent.status, JobStatus::Pending);
        assert!(recent.error_message.is_none());

        let abandoned = f.store.get(&abandoned_id).await.unwrap();
        assert_eq!(abandoned.status, JobStatus::Failed);
        assert_eq!(abandoned.error_message.as_deref(), Some(STALE_LAUNCH_REASON));
    }
}
