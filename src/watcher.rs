use std::sync::Arc;

use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::process::{ProcessHandle, ProcessStatus};

/// Background task tied to one launched process. It blocks until the OS
/// process exits, then records on the handle whether the exit was expected
/// (preceded by a stop request) or a crash. A crash additionally invokes the
/// `on_crash` callback so the supervisor can react to it.
pub struct Watcher {
    handle: Arc<ProcessHandle>,
    task: JoinHandle<()>,
}

impl Watcher {
    pub fn spawn<F>(handle: Arc<ProcessHandle>, mut child: Child, on_crash: F) -> Self
    where
        F: FnOnce(&ProcessHandle) + Send + 'static,
    {
        let watched = Arc::clone(&handle);
        let task = tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    if watched.stop_was_requested() {
                        watched.advance_to(ProcessStatus::Stopped);
                        info!("process {watched} exited after a stop request");
                    } else {
                        watched.advance_to(ProcessStatus::Crashed);
                        error!(
                            "process {watched} exited unexpectedly with code {:?}",
                            status.code()
                        );
                        on_crash(&watched);
                    }
                }
                Err(err) => {
                    watched.advance_to(ProcessStatus::Crashed);
                    error!("failed to wait for process {watched}: {err}");
                    on_crash(&watched);
                }
            }
        });
        Self { handle, task }
    }

    pub fn handle(&self) -> Arc<ProcessHandle> {
        Arc::clone(&self.handle)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
