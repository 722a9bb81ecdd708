//! Durable job snapshot file.
//!
//! The whole job table is written as one versioned JSON document. Writes go
//! to a temp file in the target directory which is fsynced and then renamed
//! over the previous snapshot, so a crash leaves either the old or the new
//! file and never a torn one.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vjob_models::{Job, JobId};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics;

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    version: u32,
    saved_at: DateTime<Utc>,
    jobs: BTreeMap<JobId, Job>,
}

/// Location of the snapshot on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all jobs. A missing file is an empty store.
    pub async fn load(&self) -> OrchestratorResult<BTreeMap<JobId, Job>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No job snapshot found, starting empty");
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        let document = decode(&bytes)?;
        info!(
            path = %self.path.display(),
            jobs = document.jobs.len(),
            saved_at = %document.saved_at,
            "Loaded job snapshot"
        );
        Ok(document.jobs)
    }

    /// Atomically replace the snapshot with `jobs`.
    pub async fn write(&self, jobs: BTreeMap<JobId, Job>) -> OrchestratorResult<()> {
        let document = SnapshotDocument {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            jobs,
        };
        let payload = serde_json::to_vec_pretty(&document)?;
        let path = self.path.clone();
        let count = document.jobs.len();
        let start = Instant::now();

        tokio::task::spawn_blocking(move || write_atomic(&path, &payload))
            .await
            .map_err(|e| OrchestratorError::persistence(format!("Snapshot writer panicked: {}", e)))??;

        metrics::record_snapshot_write(start.elapsed().as_secs_f64());
        debug!(path = %self.path.display(), jobs = count, "Wrote job snapshot");
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> OrchestratorResult<SnapshotDocument> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let version = value.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
    if version != u64::from(SNAPSHOT_VERSION) {
        return Err(OrchestratorError::persistence(format!(
            "Unsupported snapshot version {} (expected {})",
            version, SNAPSHOT_VERSION
        )));
    }
    Ok(serde_json::from_value(value)?)
}

fn write_atomic(path: &Path, payload: &[u8]) -> OrchestratorResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(payload)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| OrchestratorError::persistence(format!("Failed to rename snapshot: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vjob_models::{JobStatus, ResourceTier, TaskHandle};

    fn sample_jobs() -> BTreeMap<JobId, Job> {
        let mut done = Job::new("raw/a.mp4", ResourceTier::Premium);
        done.attach_handle(TaskHandle::new("T1")).unwrap();
        done.transition(JobStatus::Running).unwrap();
        done.append_log("Remote task status: RUNNING");
        done.complete(
            BTreeMap::from([("master".into(), "output/a/master.m3u8".into())]),
            "Transcode completed",
        )
        .unwrap();

        let pending = Job::new("raw/b.mp4", ResourceTier::Economy);

        BTreeMap::from([(done.id.clone(), done), (pending.id.clone(), pending)])
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("jobs.json"));
        assert!(file.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_preserves_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("nested/jobs.json"));
        let jobs = sample_jobs();

        file.write(jobs.clone()).await.unwrap();
        let loaded = file.load().await.unwrap();
        assert_eq!(loaded, jobs);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("jobs.json"));

        file.write(sample_jobs()).await.unwrap();
        file.write(BTreeMap::new()).await.unwrap();
        assert!(file.load().await.unwrap().is_empty());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temp files must not be left behind");
    }

    #[tokio::test]
    async fn test_unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, r#"{"version": 99, "saved_at": "2024-01-01T00:00:00Z", "jobs": {}}"#)
            .unwrap();

        let err = SnapshotFile::new(&path).load().await.unwrap_err();
        assert!(err.is_persistence());
        assert!(err.to_string().contains("99"));
    }
}
