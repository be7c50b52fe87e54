// ABOUTME: Error types for sandbox container operations
// ABOUTME: Engine failures carry the operation that failed; absence is reported separately

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    /// Docker daemon unreachable or client misconfigured
    #[error("Docker connection error: {0}")]
    Connection(String),

    /// Container (or exec) does not exist
    #[error("Container not found: {0}")]
    NotFound(String),

    /// Any other engine-level failure, tagged with the failing operation
    #[error("Failed to {operation}: {message}")]
    Engine {
        operation: &'static str,
        message: String,
    },

    #[error("Failed to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("Command `{command}` exited with code {exit_code}: {stderr}")]
    ExecFailed {
        command: String,
        exit_code: i64,
        stderr: String,
    },

    #[error("Exec {0} was detached unexpectedly")]
    Detached(String),

    #[error("Output relay error: {0}")]
    Relay(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SandboxError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SandboxError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
