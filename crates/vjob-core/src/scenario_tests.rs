//! End-to-end scenarios through the orchestrator facade with scripted adapters.

use std::sync::Arc;

use vjob_models::{JobId, JobStatus, ResourceTier};

use crate::error::OrchestratorError;
use crate::monitor::MonitorExit;
use crate::service::Orchestrator;
use crate::snapshot::SnapshotFile;
use crate::store::{JobStore, SnapshotJobStore};
use crate::testing::{self, FakeCatalog, FakeLauncher, ScriptedStatus};

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<SnapshotJobStore>,
    status: Arc<ScriptedStatus>,
    catalog: Arc<FakeCatalog>,
}

fn harness(launcher: Arc<FakeLauncher>) -> Harness {
    harness_with_store(launcher, Arc::new(SnapshotJobStore::in_memory()))
}

fn harness_with_store(launcher: Arc<FakeLauncher>, store: Arc<SnapshotJobStore>) -> Harness {
    let status = ScriptedStatus::new();
    let catalog = FakeCatalog::new(&[]);
    let orchestrator = Orchestrator::new(
        testing::fast_config(),
        store.clone(),
        launcher,
        status.clone(),
        catalog.clone(),
    );
    Harness {
        orchestrator,
        store,
        status,
        catalog,
    }
}

fn log_messages(job: &vjob_models::Job) -> Vec<&str> {
    job.logs.iter().map(|l| l.message.as_str()).collect()
}

#[tokio::test]
async fn scenario_active_then_clean_exit_completes() {
    let h = harness(FakeLauncher::accepting("T1"));
    h.status.script(
        "T1",
        vec![
            testing::active("T1", "PROVISIONING"),
            testing::active("T1", "RUNNING"),
            testing::stopped_clean("T1"),
        ],
    );

    let id = h.orchestrator.submit("raw/a.mp4", ResourceTier::Standard).await.unwrap();
    assert_eq!(h.orchestrator.monitors().join(&id).await, Some(MonitorExit::Completed));

    let job = h.orchestrator.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let outputs = job.outputs.clone().unwrap();
    assert!(!outputs.is_empty());
    assert_eq!(outputs["master"], "output/a/master.m3u8");
    assert!(outputs.values().all(|o| o.starts_with("output/a/")));

    let messages = log_messages(&job);
    assert!(messages.contains(&"Remote task status: PROVISIONING"));
    assert!(messages.contains(&"Remote task status: RUNNING"));
    assert!(messages.last().unwrap().contains("completed"));
}

#[tokio::test]
async fn scenario_launch_refused_fails_immediately() {
    let h = harness(FakeLauncher::refusing("quota exceeded"));

    let err = h.orchestrator.submit("raw/b.mp4", ResourceTier::Economy).await.unwrap_err();
    let OrchestratorError::Launch { job_id, reason } = err else {
        panic!("expected launch error");
    };
    assert_eq!(reason, "quota exceeded");

    let job = h.store.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.task_handle.is_none());
    assert!(log_messages(&job).iter().any(|m| m.contains("quota exceeded")));
    assert_eq!(h.orchestrator.monitors().active_count().await, 0);
}

#[tokio::test]
async fn scenario_permission_errors_degrade_once() {
    let h = harness(FakeLauncher::accepting("T3"));
    h.status.script(
        "T3",
        vec![
            testing::permission_denied(),
            testing::permission_denied(),
            testing::permission_denied(),
        ],
    );

    let id = h.orchestrator.submit("raw/c.mp4", ResourceTier::Standard).await.unwrap();
    assert_eq!(h.orchestrator.monitors().join(&id).await, Some(MonitorExit::Degraded));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(h.status.calls_for("T3"), 1);
    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.monitor_degraded);
    let warnings = log_messages(&job)
        .iter()
        .filter(|m| m.starts_with("Warning"))
        .count();
    assert_eq!(warnings, 1);

    // Degraded jobs are not picked up again by a reconciliation pass.
    assert_eq!(h.orchestrator.reconcile().await.unwrap().total(), 0);
    assert_eq!(h.status.calls_for("T3"), 1);
}

#[tokio::test]
async fn scenario_existing_outputs_are_imported_once() {
    let h = harness(FakeLauncher::accepting("T4"));
    h.catalog.set(&["output/xyz/"]);

    let first = h.orchestrator.reconcile().await.unwrap();
    assert_eq!(first.imported_outputs, 1);
    assert_eq!(first.total(), 1);

    let job = h.orchestrator.get(&JobId::from("import-xyz")).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.input_ref.contains("xyz"));
    assert!(job.outputs.unwrap().values().all(|o| o.contains("xyz")));

    let second = h.orchestrator.reconcile().await.unwrap();
    assert_eq!(second.total(), 0);
    assert_eq!(h.orchestrator.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn remote_failure_records_reason() {
    let h = harness(FakeLauncher::accepting("T5"));
    h.status.script(
        "T5",
        vec![
            testing::active("T5", "RUNNING"),
            testing::stopped_failed("T5", 137, "OutOfMemoryError"),
        ],
    );

    let id = h.orchestrator.submit("raw/e.mp4", ResourceTier::Economy).await.unwrap();
    assert_eq!(h.orchestrator.monitors().join(&id).await, Some(MonitorExit::Failed));

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.outputs.is_none());
    assert!(job.error_message.unwrap().contains("OutOfMemoryError"));
}

#[tokio::test]
async fn logs_never_shrink_while_monitored() {
    let h = harness(FakeLauncher::accepting("T6"));
    h.status.script(
        "T6",
        vec![
            testing::active("T6", "PENDING"),
            testing::transient(),
            testing::active("T6", "RUNNING"),
            testing::not_found(),
            testing::active("T6", "RUNNING"),
            testing::stopped_clean("T6"),
        ],
    );

    let id = h.orchestrator.submit("raw/f.mp4", ResourceTier::Standard).await.unwrap();
    let mut last_len = 0;
    let mut last_status = JobStatus::Running;
    loop {
        let job = h.store.get(&id).await.unwrap();
        assert!(job.logs.len() >= last_len);
        assert!(last_status.can_transition_to(job.status) || last_status == job.status);
        last_len = job.logs.len();
        last_status = job.status;
        if job.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    assert_eq!(last_status, JobStatus::Completed);
}

#[tokio::test]
async fn restart_resumes_monitoring_from_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");

    let first = harness_with_store(
        FakeLauncher::accepting("T7"),
        Arc::new(SnapshotJobStore::open(SnapshotFile::new(&path)).await.unwrap()),
    );
    first.status.script("T7", vec![testing::active("T7", "RUNNING")]);
    let id = first.orchestrator.submit("raw/g.mp4", ResourceTier::Standard).await.unwrap();
    first.orchestrator.shutdown().await.unwrap();

    let second = harness_with_store(
        FakeLauncher::accepting("unused"),
        Arc::new(SnapshotJobStore::open(SnapshotFile::new(&path)).await.unwrap()),
    );
    second.status.script("T7", vec![testing::stopped_clean("T7")]);
    assert_eq!(second.orchestrator.resume_monitors().await.unwrap(), 1);
    assert_eq!(
        second.orchestrator.monitors().join(&id).await,
        Some(MonitorExit::Completed)
    );

    let third = SnapshotJobStore::open(SnapshotFile::new(&path)).await.unwrap();
    assert_eq!(third.get(&id).await.unwrap().status, JobStatus::Completed);
}
