// ABOUTME: Container engine trait and the specifications passed across it
// ABOUTME: Abstracts create/start/exec/attach/wait/remove so the orchestrator can run against any engine

use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::path::PathBuf;

pub mod docker;

pub use docker::DockerEngine;

/// Bind mount from a host path into the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub sandbox_path: String,
    pub readonly: bool,
}

impl BindMount {
    pub fn readonly(host_path: impl Into<PathBuf>, sandbox_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            sandbox_path: sandbox_path.into(),
            readonly: true,
        }
    }

    pub fn read_write(host_path: impl Into<PathBuf>, sandbox_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            sandbox_path: sandbox_path.into(),
            readonly: false,
        }
    }

    /// Docker bind syntax, relabelled for SELinux hosts (`z`)
    pub fn to_bind(&self) -> String {
        format!(
            "{}:{}:{},z",
            self.host_path.display(),
            self.sandbox_path,
            if self.readonly { "ro" } else { "rw" }
        )
    }
}

/// How the sandbox's own primary process is wired to the outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    /// Nothing attached; work happens through exec sessions
    #[default]
    Detached,
    /// TTY with stdin kept open and all streams attached
    Interactive,
}

/// Everything needed to create a sandbox container, minus its name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxSpec {
    pub image: String,
    /// Ordered `NAME=VALUE` entries, passed to the engine verbatim
    pub env: Vec<String>,
    pub command: Option<Vec<String>>,
    pub mounts: Vec<BindMount>,
    /// `host:address` entries added to the sandbox's hosts file
    pub extra_hosts: Vec<String>,
    pub network: Option<String>,
    pub labels: HashMap<String, String>,
    pub stdio: StdioMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
    /// Raw TTY output, already merged by the sandbox's terminal
    Console,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamType,
    pub data: Vec<u8>,
}

impl OutputChunk {
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: StreamType::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: StreamType::Stderr,
            data: data.into(),
        }
    }

    pub fn console(data: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: StreamType::Console,
            data: data.into(),
        }
    }
}

/// Framed output of an exec session or an attached container
pub type OutputStream = BoxStream<'static, Result<OutputChunk>>;

/// Container engine operations consumed by the sandbox lifecycle.
///
/// Implementations report a missing container as `SandboxError::NotFound`
/// so callers can treat absence as success where that is the desired end state.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Whether the named container exists and is running
    async fn is_running(&self, name: &str) -> Result<bool>;

    /// Check if an image exists locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull an image from its registry
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Force-remove a container and its anonymous volumes
    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Create a container under a fixed name, returning its id
    async fn create_container(&self, name: &str, spec: &SandboxSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Create an exec session with stdout and stderr attached, returning its id
    async fn create_exec(&self, container: &str, env: &[String], command: &[String])
        -> Result<String>;

    /// Start an exec session and hand back its framed output
    async fn start_exec(&self, exec_id: &str) -> Result<OutputStream>;

    /// Exit code of a finished exec session, if the engine reported one
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>>;

    /// Attach to a container's primary stream, replaying output since start
    async fn attach_container(&self, container: &str) -> Result<OutputStream>;

    /// Block until the container is no longer running, returning its exit code
    async fn wait_container(&self, container: &str) -> Result<i64>;
}
