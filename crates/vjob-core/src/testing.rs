//! Scripted adapter fakes shared by the unit and scenario tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use metrics::{
    Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};

use vjob_models::TaskHandle;

use crate::adapters::{
    CatalogError, ContainerExit, LaunchError, LaunchRequest, OutputCatalog, StatusQueryError,
    TaskLauncher, TaskSnapshot, TaskStatusProvider,
};
use crate::config::{MonitorConfig, NotFoundResolution, OrchestratorConfig};
use crate::metrics::names as metrics_names;

pub type Observation = Result<Option<TaskSnapshot>, StatusQueryError>;

/// Monitor settings that poll as fast as the runtime allows.
pub fn fast_monitor_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(1),
        poll_jitter: Duration::ZERO,
        not_found_threshold: 3,
        not_found_resolution: NotFoundResolution::InferFromLogs { min_log_lines: 5 },
        max_consecutive_errors: 4,
    }
}

pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        monitor: fast_monitor_config(),
        launch_timeout: Duration::from_millis(200),
        snapshot_path: None,
        ..Default::default()
    }
}

pub fn active(handle: &str, status: &str) -> Observation {
    Ok(Some(TaskSnapshot {
        handle: TaskHandle::new(handle),
        last_status: status.into(),
        ..Default::default()
    }))
}

pub fn stopped_clean(handle: &str) -> Observation {
    Ok(Some(TaskSnapshot {
        handle: TaskHandle::new(handle),
        last_status: "STOPPED".into(),
        stop_reason: Some("Essential container in task exited".into()),
        containers: vec![ContainerExit {
            name: "transcoder".into(),
            exit_code: Some(0),
            reason: None,
        }],
        ..Default::default()
    }))
}

pub fn stopped_failed(handle: &str, code: i32, reason: &str) -> Observation {
    Ok(Some(TaskSnapshot {
        handle: TaskHandle::new(handle),
        last_status: "STOPPED".into(),
        stop_reason: None,
        containers: vec![ContainerExit {
            name: "transcoder".into(),
            exit_code: Some(code),
            reason: Some(reason.into()),
        }],
        ..Default::default()
    }))
}

pub fn not_found() -> Observation {
    Ok(None)
}

pub fn permission_denied() -> Observation {
    Err(StatusQueryError::permission("not authorized to perform ecs:DescribeTasks"))
}

pub fn transient() -> Observation {
    Err(StatusQueryError::transient("connection reset"))
}

enum LaunchScript {
    Accept(TaskHandle),
    Refuse(String),
    Hang,
}

/// Launcher that accepts, refuses or never answers.
pub struct FakeLauncher {
    script: LaunchScript,
    requests: Mutex<Vec<LaunchRequest>>,
}

impl FakeLauncher {
    pub fn accepting(handle: &str) -> Arc<Self> {
        Self::with(LaunchScript::Accept(TaskHandle::new(handle)))
    }

    pub fn refusing(reason: &str) -> Arc<Self> {
        Self::with(LaunchScript::Refuse(reason.into()))
    }

    pub fn hanging() -> Arc<Self> {
        Self::with(LaunchScript::Hang)
    }

    fn with(script: LaunchScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskLauncher for FakeLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<TaskHandle, LaunchError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.script {
            LaunchScript::Accept(handle) => Ok(handle.clone()),
            LaunchScript::Refuse(reason) => Err(LaunchError::new(reason.clone())),
            LaunchScript::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Status provider replaying a per-handle script.
///
/// The last scripted observation repeats once the script runs out; handles
/// without a script are not found.
#[derive(Default)]
pub struct ScriptedStatus {
    scripts: Mutex<HashMap<TaskHandle, VecDeque<Observation>>>,
    calls: Mutex<HashMap<TaskHandle, usize>>,
    active: Mutex<Option<Result<Vec<TaskHandle>, StatusQueryError>>>,
    list_calls: AtomicUsize,
}

impl ScriptedStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, handle: &str, observations: Vec<Observation>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(TaskHandle::new(handle), observations.into());
    }

    pub fn set_active(&self, handles: &[&str]) {
        *self.active.lock().unwrap() =
            Some(Ok(handles.iter().map(|h| TaskHandle::new(*h)).collect()));
    }

    pub fn fail_active(&self, error: StatusQueryError) {
        *self.active.lock().unwrap() = Some(Err(error));
    }

    pub fn calls_for(&self, handle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&TaskHandle::new(handle))
            .copied()
            .unwrap_or(0)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStatusProvider for ScriptedStatus {
    async fn describe(&self, handle: &TaskHandle) -> Observation {
        *self.calls.lock().unwrap().entry(handle.clone()).or_default() += 1;

        let mut scripts = self.scripts.lock().unwrap();
        let Some(script) = scripts.get_mut(handle) else {
            return Ok(None);
        };
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or(Ok(None))
        }
    }

    async fn list_active(&self) -> Result<Vec<TaskHandle>, StatusQueryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.active.lock().unwrap().clone().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Catalog returning a fixed set of namespace prefixes.
#[derive(Default)]
pub struct FakeCatalog {
    namespaces: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
}

impl FakeCatalog {
    pub fn new(prefixes: &[&str]) -> Arc<Self> {
        let catalog = Self::default();
        catalog.set(prefixes);
        Arc::new(catalog)
    }

    pub fn set(&self, prefixes: &[&str]) {
        *self.namespaces.lock().unwrap() = prefixes.iter().map(|p| p.to_string()).collect();
    }

    pub fn fail(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.into());
    }
}

#[async_trait]
impl OutputCatalog for FakeCatalog {
    async fn list_namespaces(&self, prefix: &str) -> Result<Vec<String>, CatalogError> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(CatalogError(message));
        }
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Recorder that keeps the `status` label of every job transition counted.
#[derive(Clone, Default)]
pub struct TransitionRecorder {
    statuses: Arc<Mutex<Vec<String>>>,
}

impl TransitionRecorder {
    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }
}

struct TransitionCounter {
    status: Option<String>,
    statuses: Arc<Mutex<Vec<String>>>,
}

impl CounterFn for TransitionCounter {
    fn increment(&self, value: u64) {
        if let Some(status) = &self.status {
            let mut statuses = self.statuses.lock().unwrap();
            for _ in 0..value {
                statuses.push(status.clone());
            }
        }
    }

    fn absolute(&self, _value: u64) {}
}

impl Recorder for TransitionRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        let status = (key.name() == metrics_names::JOB_TRANSITIONS_TOTAL)
            .then(|| {
                key.labels()
                    .find(|label| label.key() == "status")
                    .map(|label| label.value().to_string())
            })
            .flatten();
        Counter::from_arc(Arc::new(TransitionCounter {
            status,
            statuses: Arc::clone(&self.statuses),
        }))
    }

    fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}
