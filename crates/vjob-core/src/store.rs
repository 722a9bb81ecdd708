//! Job store.
//!
//! The store is the only shared mutable state in the engine. Read-modify-write
//! of a job is serialized by a per-job lock; different jobs never contend.
//! Every committed change marks the store dirty for the periodic flusher, and
//! a change that moves a job into a terminal status is written to the
//! snapshot before it is committed.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use vjob_models::{Job, JobId, JobResult, ResourceTier};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics;
use crate::snapshot::SnapshotFile;

/// A change applied to one job under its lock.
///
/// The mutation runs on a copy; if it returns an error nothing is committed.
pub type JobMutation = Box<dyn FnOnce(&mut Job) -> JobResult<()> + Send>;

/// Durable record of every known job, keyed by job ID.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a pending job with a fresh ID.
    async fn create(&self, input_ref: &str, tier: ResourceTier) -> OrchestratorResult<Job>;

    /// Insert a fully formed job. Returns `false` if the ID is already known.
    async fn insert(&self, job: Job) -> OrchestratorResult<bool>;

    async fn get(&self, id: &JobId) -> OrchestratorResult<Job>;

    /// All jobs. Callers must not rely on the order.
    async fn list(&self) -> OrchestratorResult<Vec<Job>>;

    /// Atomically read, mutate and write back one job.
    async fn update(&self, id: &JobId, mutation: JobMutation) -> OrchestratorResult<Job>;

    /// Persist pending changes, if any.
    async fn flush(&self) -> OrchestratorResult<()>;
}

/// In-memory job table backed by an optional snapshot file.
pub struct SnapshotJobStore {
    jobs: RwLock<BTreeMap<JobId, Job>>,
    locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
    snapshot: Option<SnapshotFile>,
    /// Serializes snapshot writers so a later write always contains earlier ones.
    flush_lock: Mutex<()>,
    dirty: AtomicBool,
}

impl SnapshotJobStore {
    /// Store without persistence.
    pub fn in_memory() -> Self {
        Self::with_jobs(BTreeMap::new(), None)
    }

    /// Open a store backed by `snapshot`, loading any existing jobs.
    pub async fn open(snapshot: SnapshotFile) -> OrchestratorResult<Self> {
        let jobs = snapshot.load().await?;
        info!(
            path = %snapshot.path().display(),
            jobs = jobs.len(),
            "Opened job store"
        );
        Ok(Self::with_jobs(jobs, Some(snapshot)))
    }

    fn with_jobs(jobs: BTreeMap<JobId, Job>, snapshot: Option<SnapshotFile>) -> Self {
        let locks = jobs
            .keys()
            .map(|id| (id.clone(), Arc::new(Mutex::new(()))))
            .collect();
        Self {
            jobs: RwLock::new(jobs),
            locks: Mutex::new(locks),
            snapshot,
            flush_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    async fn lock_for(&self, id: &JobId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    async fn commit(&self, job: Job) {
        self.jobs.write().await.insert(job.id.clone(), job);
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Write a snapshot that includes `job`, then commit it.
    async fn commit_durably(&self, job: Job) -> OrchestratorResult<()> {
        let Some(snapshot) = &self.snapshot else {
            self.commit(job).await;
            return Ok(());
        };

        let _flush = self.flush_lock.lock().await;
        self.dirty.store(false, Ordering::SeqCst);

        let mut image = self.jobs.read().await.clone();
        image.insert(job.id.clone(), job.clone());

        if let Err(e) = snapshot.write(image).await {
            self.dirty.store(true, Ordering::SeqCst);
            error!(job_id = %job.id, status = %job.status, "Failed to persist terminal transition: {}", e);
            return Err(OrchestratorError::persistence(format!(
                "job {} not committed: {}",
                job.id, e
            )));
        }

        self.jobs.write().await.insert(job.id.clone(), job);
        Ok(())
    }
}

#[async_trait]
impl JobStore for SnapshotJobStore {
    async fn create(&self, input_ref: &str, tier: ResourceTier) -> OrchestratorResult<Job> {
        let job = Job::new(input_ref, tier);
        self.lock_for(&job.id).await;
        self.commit(job.clone()).await;
        debug!(job_id = %job.id, input_ref = %job.input_ref, "Created job");
        Ok(job)
    }

    async fn insert(&self, job: Job) -> OrchestratorResult<bool> {
        let lock = self.lock_for(&job.id).await;
        let _guard = lock.lock().await;

        if self.jobs.read().await.contains_key(&job.id) {
            return Ok(false);
        }

        if job.is_terminal() {
            self.commit_durably(job).await?;
        } else {
            self.commit(job).await;
        }
        Ok(true)
    }

    async fn get(&self, id: &JobId) -> OrchestratorResult<Job> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found(id))
    }

    async fn list(&self) -> OrchestratorResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn update(&self, id: &JobId, mutation: JobMutation) -> OrchestratorResult<Job> {
        if !self.jobs.read().await.contains_key(id) {
            return Err(OrchestratorError::not_found(id));
        }

        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let current = self.get(id).await?;
        let mut next = current.clone();
        mutation(&mut next)?;

        if !current.is_terminal() && next.is_terminal() {
            self.commit_durably(next.clone()).await?;
        } else {
            self.commit(next.clone()).await;
        }

        if next.status != current.status {
            metrics::record_transition(next.status.as_str());
        }
        Ok(next)
    }

    async fn flush(&self) -> OrchestratorResult<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };

        let _flush = self.flush_lock.lock().await;
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let image = self.jobs.read().await.clone();
        if let Err(e) = snapshot.write(image).await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }
}

/// Periodically flush `store` until `shutdown` flips, then flush once more.
pub fn spawn_flusher(
    store: Arc<dyn JobStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = store.flush().await {
                        error!("Periodic job snapshot flush failed: {}", e);
                    }
                }
            }
        }

        if let Err(e) = store.flush().await {
            error!("Final job snapshot flush failed: {}", e);
        }
    })
}
