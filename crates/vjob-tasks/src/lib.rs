//! Remote task execution on ECS.
//!
//! This crate provides:
//! - `EcsTaskClient`, launching one Fargate task per job
//! - Task status queries and active-task listing for the monitor and reconciler
//! - Classification of SDK errors into permission and transient failures

pub mod classify;
pub mod client;
pub mod config;
pub mod error;

pub use client::EcsTaskClient;
pub use config::EcsConfig;
pub use error::{TaskError, TaskResult};
