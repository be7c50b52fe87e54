// ABOUTME: Sandbox container management for fnserve
// ABOUTME: Engine seam, lifecycle of the fixed-name sandbox, console relay and cancellation watcher

pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod relay;
pub mod watcher;

pub use engine::{
    BindMount, ContainerEngine, DockerEngine, OutputChunk, OutputStream, SandboxSpec, StdioMode,
    StreamType,
};
pub use error::{Result, SandboxError};
pub use lifecycle::{ExecOutput, SandboxHandle, SandboxLifecycle, WaitOutcome};
pub use relay::{Console, RelayStats};
pub use watcher::{CancellationWatcher, TeardownTrigger};
