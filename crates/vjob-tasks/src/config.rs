//! ECS task client configuration.

use crate::error::{TaskError, TaskResult};

/// Where and how transcode tasks are launched.
#[derive(Debug, Clone)]
pub struct EcsConfig {
    /// Cluster name or ARN
    pub cluster: String,
    /// Task definition family, `family:revision` or ARN
    pub task_definition: String,
    /// Container receiving the job environment
    pub container_name: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub assign_public_ip: bool,
    pub region: String,
}

impl EcsConfig {
    /// Create config from environment variables.
    pub fn from_env() -> TaskResult<Self> {
        let subnets = parse_list(&std::env::var("ECS_SUBNETS").unwrap_or_default());
        if subnets.is_empty() {
            return Err(TaskError::config_error("ECS_SUBNETS not set"));
        }

        Ok(Self {
            cluster: std::env::var("ECS_CLUSTER")
                .map_err(|_| TaskError::config_error("ECS_CLUSTER not set"))?,
            task_definition: std::env::var("ECS_TASK_DEFINITION")
                .map_err(|_| TaskError::config_error("ECS_TASK_DEFINITION not set"))?,
            container_name: std::env::var("ECS_CONTAINER_NAME")
                .unwrap_or_else(|_| "transcoder".to_string()),
            subnets,
            security_groups: parse_list(&std::env::var("ECS_SECURITY_GROUPS").unwrap_or_default()),
            assign_public_ip: std::env::var("ECS_ASSIGN_PUBLIC_IP")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        })
    }
}

/// Comma-separated list, blanks dropped.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "enabled"
    )
}
