//! Task client error types.

use thiserror::Error;

pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Failed to configure task client: {0}")]
    ConfigError(String),

    #[error("Invalid launch request: {0}")]
    InvalidRequest(String),
}

impl TaskError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
