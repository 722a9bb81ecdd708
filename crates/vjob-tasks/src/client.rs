//! ECS client implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ecs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, ContainerOverride, DesiredStatus, KeyValuePair,
    LaunchType, NetworkConfiguration, Task, TaskOverride,
};
use aws_sdk_ecs::Client;
use aws_types::region::Region;
use tracing::{debug, info, warn};

use vjob_core::{
    ContainerExit, LaunchError, LaunchRequest, StatusQueryError, TaskLauncher, TaskSnapshot,
    TaskStatusProvider,
};
use vjob_models::TaskHandle;

use crate::classify::{self, MISSING_REASON};
use crate::config::EcsConfig;
use crate::error::{TaskError, TaskResult};

/// ECS rejects `startedBy` values longer than this.
const MAX_STARTED_BY_LEN: usize = 36;

/// Launches and observes one Fargate task per job.
#[derive(Clone)]
pub struct EcsTaskClient {
    client: Client,
    config: EcsConfig,
}

impl EcsTaskClient {
    pub async fn new(config: EcsConfig) -> TaskResult<Self> {
        if config.subnets.is_empty() {
            return Err(TaskError::config_error("at least one subnet is required"));
        }

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        Ok(Self {
            client: Client::new(&sdk_config),
            config,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> TaskResult<Self> {
        let config = EcsConfig::from_env()?;
        Self::new(config).await
    }

    pub fn config(&self) -> &EcsConfig {
        &self.config
    }

    fn network_configuration(&self) -> TaskResult<NetworkConfiguration> {
        let security_groups = if self.config.security_groups.is_empty() {
            None
        } else {
            Some(self.config.security_groups.clone())
        };
        let assign_public_ip = if self.config.assign_public_ip {
            AssignPublicIp::Enabled
        } else {
            AssignPublicIp::Disabled
        };

        let vpc = AwsVpcConfiguration::builder()
            .set_subnets(Some(self.config.subnets.clone()))
            .set_security_groups(security_groups)
            .assign_public_ip(assign_public_ip)
            .build()
            .map_err(|e| TaskError::invalid_request(e.to_string()))?;

        Ok(NetworkConfiguration::builder()
            .awsvpc_configuration(vpc)
            .build())
    }

    /// Job environment on the transcoder container, sizing from the tier.
    fn task_override(&self, request: &LaunchRequest) -> TaskOverride {
        let environment = request
            .environment()
            .into_iter()
            .map(|(name, value)| KeyValuePair::builder().name(name).value(value).build())
            .collect();

        let container = ContainerOverride::builder()
            .name(self.config.container_name.clone())
            .set_environment(Some(environment))
            .build();

        TaskOverride::builder()
            .cpu(request.resource_tier.task_cpu().to_string())
            .memory(request.resource_tier.task_memory_mib().to_string())
            .container_overrides(container)
            .build()
    }
}

#[async_trait]
impl TaskLauncher for EcsTaskClient {
    async fn launch(&self, request: &LaunchRequest) -> Result<TaskHandle, LaunchError> {
        let network = self
            .network_configuration()
            .map_err(|e| LaunchError::new(e.to_string()))?;

        let mut run = self
            .client
            .run_task()
            .cluster(&self.config.cluster)
            .task_definition(&self.config.task_definition)
            .launch_type(LaunchType::Fargate)
            .count(1)
            .network_configuration(network)
            .overrides(self.task_override(request));
        // Longer IDs are still recoverable from the JOB_ID environment variable.
        if request.job_id.as_str().len() <= MAX_STARTED_BY_LEN {
            run = run.started_by(request.job_id.as_str());
        }

        let output = run.send().await.map_err(|e| {
            let (_, _, context) = error_parts(&e);
            LaunchError::new(context)
        })?;

        if let Some(failure) = output.failures().first() {
            let reason = match (failure.reason(), failure.detail()) {
                (Some(reason), Some(detail)) => format!("{}: {}", reason, detail),
                (Some(reason), None) => reason.to_string(),
                _ => "RunTask reported a failure without a reason".to_string(),
            };
            warn!(job_id = %request.job_id, "RunTask refused: {}", reason);
            return Err(LaunchError::new(reason));
        }

        let arn = output
            .tasks()
            .first()
            .and_then(|task| task.task_arn())
            .ok_or_else(|| LaunchError::new("RunTask returned no task"))?;

        info!(job_id = %request.job_id, task_handle = %arn, "Started ECS task");
        Ok(TaskHandle::new(arn))
    }
}

#[async_trait]
impl TaskStatusProvider for EcsTaskClient {
    async fn describe(
        &self,
        handle: &TaskHandle,
    ) -> Result<Option<TaskSnapshot>, StatusQueryError> {
        let output = self
            .client
            .describe_tasks()
            .cluster(&self.config.cluster)
            .tasks(handle.as_str())
            .send()
            .await
            .map_err(|e| {
                let (code, message, context) = error_parts(&e);
                classify::status_error(code.as_deref(), message.as_deref(), &context)
            })?;

        if let Some(task) = output.tasks().first() {
            return Ok(Some(snapshot_from_task(task)));
        }

        match output.failures().first() {
            Some(failure) if failure.reason() == Some(MISSING_REASON) => {
                debug!(task_handle = %handle, "Task not found");
                Ok(None)
            }
            Some(failure) => Err(classify::status_error(
                None,
                failure.reason(),
                "DescribeTasks reported a failure",
            )),
            None => Ok(None),
        }
    }

    async fn list_active(&self) -> Result<Vec<TaskHandle>, StatusQueryError> {
        let mut handles = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_tasks()
                .cluster(&self.config.cluster)
                .desired_status(DesiredStatus::Running)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| {
                    let (code, message, context) = error_parts(&e);
                    classify::status_error(code.as_deref(), message.as_deref(), &context)
                })?;

            handles.extend(output.task_arns().iter().map(|arn| TaskHandle::new(arn.as_str())));

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(count = handles.len(), "Listed active ECS tasks");
        Ok(handles)
    }
}

/// Error code, message and full display context of an SDK error.
fn error_parts<E>(err: &SdkError<E>) -> (Option<String>, Option<String>, String)
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    (
        err.code().map(String::from),
        err.message().map(String::from),
        DisplayErrorContext(err).to_string(),
    )
}

fn snapshot_from_task(task: &Task) -> TaskSnapshot {
    let containers = task
        .containers()
        .iter()
        .map(|c| ContainerExit {
            name: c.name().unwrap_or_default().to_string(),
            exit_code: c.exit_code(),
            reason: c.reason().map(String::from),
        })
        .collect();

    let mut environment = BTreeMap::new();
    if let Some(overrides) = task.overrides() {
        for container in overrides.container_overrides() {
            for pair in container.environment() {
                if let (Some(name), Some(value)) = (pair.name(), pair.value()) {
                    environment.insert(name.to_string(), value.to_string());
                }
            }
        }
    }

    TaskSnapshot {
        handle: TaskHandle::new(task.task_arn().unwrap_or_default()),
        last_status: task.last_status().unwrap_or("UNKNOWN").to_string(),
        stop_reason: task.stopped_reason().map(String::from),
        containers,
        started_by: task.started_by().map(String::from),
        environment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ecs::types::Container;
    use vjob_core::ExitSignal;
    use vjob_models::JobId;

    #[test]
    fn test_snapshot_from_stopped_task() {
        let task = Task::builder()
            .task_arn("arn:aws:ecs:us-east-1:123:task/media/abc123")
            .last_status("STOPPED")
            .stopped_reason("Essential container in task exited")
            .started_by("job-1")
            .containers(
                Container::builder()
                    .name("transcoder")
                    .exit_code(1)
                    .reason("ffmpeg returned 1")
                    .build(),
            )
            .overrides(
                TaskOverride::builder()
                    .container_overrides(
                        ContainerOverride::builder()
                            .name("transcoder")
                            .environment(KeyValuePair::builder().name("JOB_ID").value("job-1").build())
                            .environment(
                                KeyValuePair::builder()
                                    .name("INPUT_KEY")
                                    .value("raw/a.mp4")
                                    .build(),
                            )
                            .build(),
                    )
                    .build(),
            )
            .build();

        let snapshot = snapshot_from_task(&task);
        assert_eq!(snapshot.handle.short_id(), "abc123");
        assert!(snapshot.is_terminal());
        assert!(matches!(snapshot.exit_signal(), ExitSignal::Failed(Some(r)) if r.contains("ffmpeg")));
        assert_eq!(snapshot.recovered_job_id(), Some(JobId::from("job-1")));
        assert_eq!(snapshot.recovered_input_ref().as_deref(), Some("raw/a.mp4"));
    }

    #[test]
    fn test_snapshot_of_running_task() {
        let task = Task::builder()
            .task_arn("arn:task/xyz")
            .last_status("RUNNING")
            .build();

        let snapshot = snapshot_from_task(&task);
        assert!(!snapshot.is_terminal());
        assert!(snapshot.containers.is_empty());
        assert!(snapshot.started_by.is_none());
    }
}
