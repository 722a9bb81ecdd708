//! Orchestrator metrics collection.
//!
//! Recorded through the `metrics` facade; the API binary installs the
//! Prometheus exporter that renders them.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "vjob_jobs_submitted_total";
    pub const JOB_TRANSITIONS_TOTAL: &str = "vjob_job_transitions_total";
    pub const STATUS_POLLS_TOTAL: &str = "vjob_status_polls_total";
    pub const MONITORS_DEGRADED_TOTAL: &str = "vjob_monitors_degraded_total";
    pub const RECONCILED_JOBS_TOTAL: &str = "vjob_reconciled_jobs_total";
    pub const SNAPSHOT_WRITE_SECONDS: &str = "vjob_snapshot_write_seconds";
}

pub fn record_job_submitted(tier: &str) {
    counter!(names::JOBS_SUBMITTED_TOTAL, "tier" => tier.to_string()).increment(1);
}

/// Record a job entering `status`.
pub fn record_transition(status: &str) {
    counter!(names::JOB_TRANSITIONS_TOTAL, "status" => status.to_string()).increment(1);
}

/// Record one status query; `outcome` is `active`, `terminal`, `not_found` or an error kind.
pub fn record_poll(outcome: &'static str) {
    counter!(names::STATUS_POLLS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_monitor_degraded() {
    counter!(names::MONITORS_DEGRADED_TOTAL).increment(1);
}

/// Record jobs created or updated by reconciliation; `kind` names the scan.
pub fn record_reconciled(kind: &'static str, count: usize) {
    if count > 0 {
        counter!(names::RECONCILED_JOBS_TOTAL, "kind" => kind).increment(count as u64);
    }
}

pub fn record_snapshot_write(duration_secs: f64) {
    histogram!(names::SNAPSHOT_WRITE_SECONDS).record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        for name in [
            names::JOBS_SUBMITTED_TOTAL,
            names::JOB_TRANSITIONS_TOTAL,
            names::STATUS_POLLS_TOTAL,
            names::MONITORS_DEGRADED_TOTAL,
            names::RECONCILED_JOBS_TOTAL,
            names::SNAPSHOT_WRITE_SECONDS,
        ] {
            assert!(name.starts_with("vjob_"));
        }
    }
}
