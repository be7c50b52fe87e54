// ABOUTME: Background task that tears the sandbox down on cancellation or completion
// ABOUTME: Owns the only teardown call of a run, so both exit paths converge on it exactly once

use crate::lifecycle::SandboxLifecycle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What released the watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownTrigger {
    /// The caller's cancellation signal fired
    Cancelled,
    /// The primary flow finished serving
    Finished,
}

/// Supervised cleanup task spawned right after the sandbox starts.
///
/// Holds only the lifecycle (fixed name + engine) and the cancellation signal.
pub struct CancellationWatcher {
    cancel: CancellationToken,
    done: CancellationToken,
    task: JoinHandle<TeardownTrigger>,
}

impl CancellationWatcher {
    pub fn spawn(lifecycle: SandboxLifecycle, cancel: CancellationToken) -> Self {
        let done = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let trigger = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => TeardownTrigger::Cancelled,
                    _ = done.cancelled() => TeardownTrigger::Finished,
                };

                if trigger == TeardownTrigger::Cancelled {
                    info!("Cancellation received, removing sandbox {}", lifecycle.name());
                }
                // Teardown errors are logged, never propagated
                if let Err(e) = lifecycle.teardown().await {
                    debug!("Teardown of {} failed: {}", lifecycle.name(), e);
                }
                trigger
            })
        };

        Self { cancel, done, task }
    }

    /// Release the watcher after a normal finish and wait for its teardown.
    ///
    /// If cancellation already fired, this just joins the teardown in flight.
    pub async fn finish(self) -> Option<TeardownTrigger> {
        self.done.cancel();
        match self.task.await {
            Ok(trigger) => Some(trigger),
            Err(e) => {
                warn!("Sandbox watcher task failed: {}", e);
                None
            }
        }
    }

    /// Drop the watcher without tearing down, leaving the sandbox for the next restart.
    ///
    /// A teardown already started by cancellation is allowed to complete.
    pub async fn dismiss(self) {
        if self.cancel.is_cancelled() {
            let _ = self.task.await;
        } else {
            self.task.abort();
        }
    }
}
