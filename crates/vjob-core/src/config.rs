//! Orchestrator configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vjob_models::OutputLayout;

/// How a task handle that stopped resolving is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundResolution {
    /// Completed if the job already logged at least `min_log_lines`, failed otherwise.
    InferFromLogs { min_log_lines: usize },
    AssumeCompleted,
    AssumeFailed,
}

impl Default for NotFoundResolution {
    fn default() -> Self {
        Self::InferFromLogs { min_log_lines: 5 }
    }
}

impl NotFoundResolution {
    /// Parse `infer`, `completed` or `failed`; `min_log_lines` applies to `infer`.
    pub fn parse(policy: &str, min_log_lines: usize) -> Option<Self> {
        match policy.trim().to_lowercase().as_str() {
            "infer" | "logs" => Some(Self::InferFromLogs { min_log_lines }),
            "completed" | "complete" => Some(Self::AssumeCompleted),
            "failed" | "fail" => Some(Self::AssumeFailed),
            _ => None,
        }
    }
}

/// Per-job watcher configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base interval between status queries
    pub poll_interval: Duration,
    /// Upper bound of the random delay added to each interval
    pub poll_jitter: Duration,
    /// Consecutive "not found" answers before the job is settled
    pub not_found_threshold: u32,
    pub not_found_resolution: NotFoundResolution,
    /// Consecutive transient query failures before degrading
    pub max_consecutive_errors: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            poll_jitter: Duration::from_secs(2),
            not_found_threshold: 3,
            not_found_resolution: NotFoundResolution::default(),
            max_consecutive_errors: 10,
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub monitor: MonitorConfig,
    /// Upper bound on the remote launch round trip
    pub launch_timeout: Duration,
    /// Interval of the periodic snapshot flush
    pub flush_interval: Duration,
    /// Delay before the startup reconciliation pass
    pub reconcile_startup_delay: Duration,
    /// Snapshot file location (`None` keeps jobs in memory only)
    pub snapshot_path: Option<PathBuf>,
    pub layout: OutputLayout,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            launch_timeout: Duration::from_secs(30),
            flush_interval: Duration::from_secs(10),
            reconcile_startup_delay: Duration::from_secs(5),
            snapshot_path: Some(PathBuf::from("data/jobs.json")),
            layout: OutputLayout::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let monitor_defaults = MonitorConfig::default();

        let min_log_lines = env_parse("VJOB_NOT_FOUND_MIN_LOGS").unwrap_or(5);
        let not_found_resolution = std::env::var("VJOB_NOT_FOUND_POLICY")
            .ok()
            .and_then(|p| NotFoundResolution::parse(&p, min_log_lines))
            .unwrap_or(NotFoundResolution::InferFromLogs { min_log_lines });

        let input_prefix =
            std::env::var("VJOB_INPUT_PREFIX").unwrap_or_else(|_| defaults.layout.input_prefix.clone());
        let output_prefix = std::env::var("VJOB_OUTPUT_PREFIX")
            .unwrap_or_else(|_| defaults.layout.output_prefix.clone());

        let snapshot_path = match std::env::var("VJOB_SNAPSHOT_PATH") {
            Ok(p) if p.is_empty() || p == "memory" => None,
            Ok(p) => Some(PathBuf::from(p)),
            Err(_) => defaults.snapshot_path,
        };

        Self {
            monitor: MonitorConfig {
                poll_interval: Duration::from_secs(
                    env_parse("VJOB_POLL_INTERVAL_SECS").unwrap_or(5),
                ),
                poll_jitter: Duration::from_millis(env_parse("VJOB_POLL_JITTER_MS").unwrap_or(2000)),
                not_found_threshold: env_parse("VJOB_NOT_FOUND_THRESHOLD")
                    .unwrap_or(monitor_defaults.not_found_threshold),
                not_found_resolution,
                max_consecutive_errors: env_parse("VJOB_MAX_CONSECUTIVE_ERRORS")
                    .unwrap_or(monitor_defaults.max_consecutive_errors),
            },
            launch_timeout: Duration::from_secs(env_parse("VJOB_LAUNCH_TIMEOUT_SECS").unwrap_or(30)),
            flush_interval: Duration::from_secs(env_parse("VJOB_FLUSH_INTERVAL_SECS").unwrap_or(10)),
            reconcile_startup_delay: Duration::from_secs(
                env_parse("VJOB_RECONCILE_DELAY_SECS").unwrap_or(5),
            ),
            snapshot_path,
            layout: OutputLayout::new(input_prefix, output_prefix),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
