//! S3-compatible storage client.
//!
//! This crate provides:
//! - Object upload/download and existence checks
//! - Prefix and common-prefix listing (used to discover finished outputs)
//! - The `OutputCatalog` implementation consumed by the reconciler

pub mod client;
pub mod error;

pub use client::{ObjectInfo, S3Client, S3Config};
pub use error::{StorageError, StorageResult};
