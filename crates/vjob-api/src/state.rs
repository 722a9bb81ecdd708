//! Application state.

use std::sync::Arc;

use vjob_core::{Orchestrator, OrchestratorConfig};
use vjob_storage::S3Client;
use vjob_tasks::EcsTaskClient;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub orchestrator: Orchestrator,
    /// Object storage, probed by the readiness check
    pub storage: Option<Arc<S3Client>>,
}

impl AppState {
    /// Create application state backed by S3 and ECS.
    pub async fn new(
        config: ApiConfig,
        orchestrator_config: OrchestratorConfig,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let storage = Arc::new(S3Client::from_env().await?);
        let tasks = Arc::new(EcsTaskClient::from_env().await?);

        let orchestrator =
            Orchestrator::open(orchestrator_config, tasks.clone(), tasks, storage.clone()).await?;

        Ok(Self {
            config,
            orchestrator,
            storage: Some(storage),
        })
    }

    /// State around an already built orchestrator, without a storage probe.
    pub fn with_orchestrator(config: ApiConfig, orchestrator: Orchestrator) -> Self {
        Self {
            config,
            orchestrator,
            storage: None,
        }
    }
}
