// ABOUTME: Lifecycle of the single sandbox container bound to a well-known name
// ABOUTME: Restart (remove-then-create), one-shot exec, streamed exec, attach-and-wait and teardown

use crate::engine::{ContainerEngine, OutputStream, SandboxSpec, StreamType};
use crate::relay::{self, Console, RelayStats};
use crate::{Result, SandboxError};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A started sandbox container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    pub name: String,
}

/// Captured result of a one-shot exec
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// How an attach-and-wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(i64),
    Cancelled,
}

/// Single-slot sandbox table keyed by a fixed container name.
///
/// The engine holds the only state: there is at most one container under
/// `name`, and `restart` replaces it rather than reusing it.
#[derive(Clone)]
pub struct SandboxLifecycle {
    engine: Arc<dyn ContainerEngine>,
    name: String,
}

impl SandboxLifecycle {
    pub fn new(engine: Arc<dyn ContainerEngine>, name: impl Into<String>) -> Self {
        Self {
            engine,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove any container under the fixed name, then create and start a new one.
    ///
    /// Removal is acknowledged before creation starts, so two instances never
    /// overlap under the same name.
    pub async fn restart(&self, spec: &SandboxSpec) -> Result<SandboxHandle> {
        self.remove_existing().await?;
        self.ensure_image(&spec.image).await?;

        info!("Creating sandbox {} from {}", self.name, spec.image);
        let id = self.engine.create_container(&self.name, spec).await?;
        self.engine.start_container(&id).await?;
        debug!("Started sandbox {} ({})", self.name, id);

        Ok(SandboxHandle {
            id,
            name: self.name.clone(),
        })
    }

    /// Force-remove the sandbox and its volumes. Absence counts as success.
    pub async fn teardown(&self) -> Result<()> {
        self.remove_existing().await?;
        info!("Removed sandbox {}", self.name);
        Ok(())
    }

    async fn remove_existing(&self) -> Result<()> {
        match self.engine.remove_container(&self.name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Sandbox {} already absent", self.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.engine.image_exists(image).await? {
            debug!("Image {} already exists locally", image);
            return Ok(());
        }
        self.engine.pull_image(image).await
    }

    /// Run a command to completion inside the sandbox.
    ///
    /// A non-zero exit is an error carrying the captured stderr; nothing is retried.
    pub async fn exec_once(
        &self,
        handle: &SandboxHandle,
        env: &[String],
        command: &[String],
    ) -> Result<ExecOutput> {
        debug!("Executing in {}: {:?}", handle.name, command);

        let exec_id = self.engine.create_exec(&handle.id, env, command).await?;
        let mut stream = self.engine.start_exec(&exec_id).await?;

        let mut output = ExecOutput::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            match chunk.stream {
                StreamType::Stderr => output.stderr.extend_from_slice(&chunk.data),
                StreamType::Stdout | StreamType::Console => {
                    output.stdout.extend_from_slice(&chunk.data)
                }
            }
        }

        output.exit_code = self
            .engine
            .exec_exit_code(&exec_id)
            .await?
            .ok_or_else(|| SandboxError::Engine {
                operation: "inspect exec",
                message: format!("no exit code reported for `{}`", command.join(" ")),
            })?;
        if output.exit_code != 0 {
            return Err(SandboxError::ExecFailed {
                command: command.join(" "),
                exit_code: output.exit_code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }

    /// Start a long-running command and relay its output until the stream drains.
    ///
    /// The copy runs on its own task; this call returns once that task has
    /// consumed the whole stream (the process exited or the sandbox went away).
    pub async fn exec_and_stream(
        &self,
        handle: &SandboxHandle,
        env: &[String],
        command: &[String],
        console: &Console,
    ) -> Result<RelayStats> {
        debug!("Streaming exec in {}: {:?}", handle.name, command);

        let exec_id = self.engine.create_exec(&handle.id, env, command).await?;
        let stream = self.engine.start_exec(&exec_id).await?;

        let relay_console = console.clone();
        let relay = tokio::spawn(async move { relay::demux(stream, &relay_console).await });

        let stats = relay.await??;
        debug!(
            "Exec stream drained ({} bytes stdout, {} bytes stderr)",
            stats.stdout_bytes, stats.stderr_bytes
        );
        Ok(stats)
    }

    /// Attach to the sandbox's own primary stream and wait for it to exit,
    /// racing against `cancel`.
    pub async fn attach_and_wait(
        &self,
        handle: &SandboxHandle,
        cancel: &CancellationToken,
        console: &Console,
    ) -> Result<WaitOutcome> {
        let stream = self.engine.attach_container(&handle.id).await?;
        let relay = spawn_passthrough(stream, console.clone());

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            code = self.engine.wait_container(&handle.id) => Some(code),
        };

        match waited {
            Some(Ok(code)) => {
                info!("Sandbox {} exited with code {}", handle.name, code);
                match relay.await? {
                    Ok(copied) => debug!("Relayed {} bytes from {}", copied, handle.name),
                    Err(e) => warn!("Output relay for {} ended early: {}", handle.name, e),
                }
                Ok(WaitOutcome::Exited(code))
            }
            Some(Err(e)) => {
                relay.abort();
                Err(e)
            }
            None => {
                debug!("Wait on {} cancelled", handle.name);
                relay.abort();
                Ok(WaitOutcome::Cancelled)
            }
        }
    }
}

fn spawn_passthrough(
    stream: OutputStream,
    console: Console,
) -> tokio::task::JoinHandle<Result<u64>> {
    tokio::spawn(async move { relay::passthrough(stream, &console).await })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::OutputChunk;
    use crate::relay::tests::capture;
    use async_trait::async_trait;
    use futures::stream;
    use mockall::{mock, predicate::eq, Sequence};
    use pretty_assertions::assert_eq;

    mock! {
        pub Engine {}

        #[async_trait]
        impl ContainerEngine for Engine {
            async fn is_running(&self, name: &str) -> Result<bool>;
            async fn image_exists(&self, image: &str) -> Result<bool>;
            async fn pull_image(&self, image: &str) -> Result<()>;
            async fn remove_container(&self, name: &str) -> Result<()>;
            async fn create_container(&self, name: &str, spec: &SandboxSpec) -> Result<String>;
            async fn start_container(&self, id: &str) -> Result<()>;
            async fn create_exec(&self, container: &str, env: &[String], command: &[String]) -> Result<String>;
            async fn start_exec(&self, exec_id: &str) -> Result<OutputStream>;
            async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>>;
            async fn attach_container(&self, container: &str) -> Result<OutputStream>;
            async fn wait_container(&self, container: &str) -> Result<i64>;
        }
    }

    fn not_found() -> SandboxError {
        SandboxError::NotFound("No such container: relay".to_string())
    }

    fn spec() -> SandboxSpec {
        SandboxSpec {
            image: "supabase/deno-relay:v1.5.0".to_string(),
            ..Default::default()
        }
    }

    fn handle() -> SandboxHandle {
        SandboxHandle {
            id: "abc123".to_string(),
            name: "relay".to_string(),
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_restart_removes_before_create() {
        let mut engine = MockEngine::new();
        let mut seq = Sequence::new();

        engine
            .expect_remove_container()
            .with(eq("relay"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_image_exists()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(true));
        engine
            .expect_create_container()
            .withf(|name, _| name == "relay")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("abc123".to_string()));
        engine
            .expect_start_container()
            .with(eq("abc123"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let lifecycle = SandboxLifecycle::new(Arc::new(engine), "relay");
        let handle = lifecycle.restart(&spec()).await.unwrap();

        assert_eq!(handle.id, "abc123");
        assert_eq!(handle.name, "relay");
    }

    #[tokio::test]
    async fn test_restart_tolerates_absent_container_and_pulls_missing_image() {
        let mut engine = MockEngine::new();
        engine
            .expect_remove_container()
            .times(1)
            .returning(|_| Err(not_found()));
        engine.expect_image_exists().returning(|_| Ok(false));
        engine
            .expect_pull_image()
            .with(eq("supabase/deno-relay:v1.5.0"))
            .times(1)
            .returning(|_| Ok(()));
        engine
            .expect_create_container()
            .returning(|_, _| Ok("abc123".to_string()));
        engine.expect_start_container().returning(|_| Ok(()));

        let lifecycle = SandboxLifecycle::new(Arc::new(engine), "relay");
        assert!(lifecycle.restart(&spec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_restart_fails_when_removal_fails() {
        let mut engine = MockEngine::new();
        engine.expect_remove_container().returning(|_| {
            Err(SandboxError::Engine {
                operation: "remove container",
                message: "daemon unreachable".to_string(),
            })
        });
        engine.expect_create_container().times(0);

        let lifecycle = SandboxLifecycle::new(Arc::new(engine), "relay");
        let err = lifecycle.restart(&spec()).await.unwrap_err();
        assert!(err.to_string().contains("daemon unreachable"));
    }

    #[tokio::test]
    async fn test_restart_fails_when_pull_fails() {
        let mut engine = MockEngine::new();
        engine.expect_remove_container().returning(|_| Ok(()));
        engine.expect_image_exists().returning(|_| Ok(false));
        engine.expect_pull_image().returning(|image| {
            Err(SandboxError::ImagePull {
                image: image.to_string(),
                message: "manifest unknown".to_string(),
            })
        });
        engine.expect_create_container().times(0);

        let lifecycle = SandboxLifecycle::new(Arc::new(engine), "relay");
        let err = lifecycle.restart(&spec()).await.unwrap_err();
        assert!(matches!(err, SandboxError::ImagePull { .. }));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let mut engine = MockEngine::new();
        let mut seq = Sequence::new();
        engine
            .expect_remove_container()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_remove_container()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(not_found()));

        let lifecycle = SandboxLifecycle::new(Arc::new(engine), "relay");
        assert!(lifecycle.teardown().await.is_ok());
        assert!(lifecycle.teardown().await.is_ok());
    }

    #[tokio::test]
    async fn test_exec_once_collects_output() {
        let mut engine = MockEngine::new();
        engine
            .expect_create_exec()
            .withf(|container, env, command| {
                container == "abc123"
                    && env == ["FOO=bar".to_string()]
                    && command == ["deno".to_string(), "cache".to_string()]
            })
            .returning(|_, _, _| Ok("exec1".to_string()));
        engine.expect_start_exec().returning(|_| {
            Ok(stream::iter(vec![
                Ok(OutputChunk::stdout("Download ok\n")),
                Ok(OutputChunk::stderr("Check file\n")),
            ])
            .boxed())
        });
        engine
            .expect_exec_exit_code()
            .with(eq("exec1"))
            .returning(|_| Ok(Some(0)));

        let lifecycle = SandboxLifecycle::new(Arc::new(engine), "relay");
        let output = lifecycle
            .exec_once(&handle(), &strings(&["FOO=bar"]), &strings(&["deno", "cache"]))
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, b"Download ok\n".to_vec());
        assert_eq!(output.stderr, b"Check file\n".to_vec());
    }

    #[tokio::test]
    async fn test_exec_once_non_zero_exit_is_error() {
        let mut engine = MockEngine::new();
        engine
            .expect_create_exec()
            .returning(|_, _, _| Ok("exec1".to_string()));
        engine.expect_start_exec().returning(|_| {
            Ok(stream::iter(vec![Ok(OutputChunk::stderr(
                "error: Module not found\n",
            ))])
            .boxed())
        });
        engine.expect_exec_exit_code().returning(|_| Ok(Some(1)));

        let lifecycle = SandboxLifecycle::new(Arc::new(engine), "relay");
        let err = lifecycle
            .exec_once(&handle(), &[], &strings(&["deno", "cache", "index.ts"]))
            .await
            .unwrap_err();

        match err {
            SandboxError::ExecFailed {
                command,
                exit_code,
                stderr,
            } => {
                assert_eq!(command, "deno cache index.ts");
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "error: Module not found");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_exec_once_missing_exit_code_is_error() {
        let mut engine = MockEngine::new();
        engine
            .expect_create_exec()
            .returning(|_, _, _| Ok("exec1".to_string()));
        engine
            .expect_start_exec()
            .returning(|_| Ok(stream::iter(Vec::<crate::Result<OutputChunk>>::new()).boxed()));
        engine.expect_exec_exit_code().returning(|_| Ok(None));

        let lifecycle = SandboxLifecycle::new(Arc::new(engine), "relay");
        let err = lifecycle
            .exec_once(&handle(), &[], &strings(&["deno", "cache", "index.ts"]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SandboxError::Engine {
                operation: "inspect exec",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_exec_and_stream_relays_until_drained() {
        let mut engine = MockEngine::new();
        engine
            .expect_create_exec()
            .returning(|_, _, _| Ok("exec2".to_string()));
        engine.expect_start_exec().with(eq("exec2")).returning(|_| {
            Ok(stream::iter(vec![
                Ok(OutputChunk::stdout("Listening on http://localhost:8000/\n")),
                Ok(OutputChunk::stderr("Watcher File change detected!\n")),
            ])
            .boxed())
        });

        let (console, out, err) = capture();
        let lifecycle = SandboxLifecycle::new(Arc::new(engine), "relay");
        let stats = lifecycle
            .exec_and_stream(&handle(), &[], &strings(&["deno", "run"]), &console)
            .await
            .unwrap();

        assert_eq!(out.contents(), "Listening on http://localhost:8000/\n");
        assert_eq!(err.contents(), "Watcher File change detected!\n");
        assert!(stats.stdout_bytes > 0 && stats.stderr_bytes > 0);
    }

    #[tokio::test]
    async fn test_attach_and_wait_returns_exit_code() {
        let mut engine = MockEngine::new();
        engine.expect_attach_container().returning(|_| {
            Ok(stream::iter(vec![Ok(OutputChunk::console("Serving functions\r\n"))]).boxed())
        });
        engine
            .expect_wait_container()
            .with(eq("abc123"))
            .returning(|_| Ok(137));

        let (console, out, _err) = capture();
        let lifecycle = SandboxLifecycle::new(Arc::new(engine), "relay");
        let outcome = lifecycle
            .attach_and_wait(&handle(), &CancellationToken::new(), &console)
            .await
            .unwrap();

        assert_eq!(outcome, WaitOutcome::Exited(137));
        assert_eq!(out.contents(), "Serving functions\r\n");
    }

    #[tokio::test]
    async fn test_attach_and_wait_observes_cancellation() {
        let mut engine = MockEngine::new();
        engine
            .expect_attach_container()
            .returning(|_| Ok(stream::pending().boxed()));
        engine
            .expect_wait_container()
            .returning(|_| Err(SandboxError::NotFound("never reached".to_string())));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let (console, _out, _err) = capture();
        let lifecycle = SandboxLifecycle::new(Arc::new(engine), "relay");
        let outcome = lifecycle
            .attach_and_wait(&handle(), &cancel, &console)
            .await
            .unwrap();

        assert_eq!(outcome, WaitOutcome::Cancelled);
    }
}
