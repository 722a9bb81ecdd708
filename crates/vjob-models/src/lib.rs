//! Shared data models for the vjob orchestrator.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their status state machine and progress logs
//! - Resource tiers used to size remote tasks
//! - The deterministic output layout of transcoded artifacts

pub mod job;
pub mod outputs;
pub mod resource_tier;

// Re-export common types
pub use job::{
    Job, JobError, JobId, JobOrigin, JobResult, JobStatus, JobSummary, LogEntry, TaskHandle,
};
pub use outputs::OutputLayout;
pub use resource_tier::{ResourceTier, ResourceTierParseError};
