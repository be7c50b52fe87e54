// ABOUTME: Output relay from sandbox streams to the operator's console
// ABOUTME: Demultiplexes framed stdout/stderr, or passes a TTY stream straight through

use crate::engine::{OutputStream, StreamType};
use crate::Result;
use futures::StreamExt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

type Writer = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Operator-facing output destinations.
///
/// Cheap to clone; clones write to the same destinations, so a relay task can
/// own one while the primary flow keeps announcing progress through another.
#[derive(Clone)]
pub struct Console {
    stdout: Writer,
    stderr: Writer,
}

impl Console {
    pub fn new<O, E>(stdout: O, stderr: E) -> Self
    where
        O: AsyncWrite + Send + Unpin + 'static,
        E: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            stdout: Arc::new(Mutex::new(Box::new(stdout))),
            stderr: Arc::new(Mutex::new(Box::new(stderr))),
        }
    }

    /// The process's own stdout and stderr
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdout(), tokio::io::stderr())
    }

    pub async fn write_stdout(&self, data: &[u8]) -> io::Result<()> {
        write_flush(&self.stdout, data).await
    }

    pub async fn write_stderr(&self, data: &[u8]) -> io::Result<()> {
        write_flush(&self.stderr, data).await
    }

    /// Print a status line on stdout
    pub async fn announce(&self, line: &str) -> io::Result<()> {
        let mut out = self.stdout.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await
    }
}

async fn write_flush(writer: &Writer, data: &[u8]) -> io::Result<()> {
    let mut out = writer.lock().await;
    out.write_all(data).await?;
    out.flush().await
}

/// Bytes copied per destination by a relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
}

/// Copy a framed stream to the console until it ends.
///
/// Stderr frames go to stderr; stdout and raw console frames go to stdout.
/// Order is preserved within each destination.
pub async fn demux(mut stream: OutputStream, console: &Console) -> Result<RelayStats> {
    let mut stats = RelayStats::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        match chunk.stream {
            StreamType::Stderr => {
                console.write_stderr(&chunk.data).await?;
                stats.stderr_bytes += chunk.data.len() as u64;
            }
            StreamType::Stdout | StreamType::Console => {
                console.write_stdout(&chunk.data).await?;
                stats.stdout_bytes += chunk.data.len() as u64;
            }
        }
    }

    Ok(stats)
}

/// Copy every frame of a single-stream (TTY) attachment to stdout.
pub async fn passthrough(mut stream: OutputStream, console: &Console) -> Result<u64> {
    let mut copied = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        console.write_stdout(&chunk.data).await?;
        copied += chunk.data.len() as u64;
    }

    Ok(copied)
}
