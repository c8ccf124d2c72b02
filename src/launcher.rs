use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Result;
use tokio::process::{Child, Command};
use tracing::info;

use crate::commands::ProcessSpec;
use crate::config::AppConfig;
use crate::errors::SvcgroupError;
use crate::ipc::{ProcessCommands, PROCESS_INDEX_ENV, SHARED_DIR_ENV};
use crate::logging::{open_log_writers, process_logs};
use crate::process::{ProcessHandle, ProcessStatus};

#[derive(Debug)]
pub struct Launched {
    pub handle: Arc<ProcessHandle>,
    pub child: Child,
}

/// Spawns one OS process per [`ProcessSpec`], wiring up its signal record,
/// log capture and process group.
pub struct Launcher {
    shared_dir: PathBuf,
    log_dir: PathBuf,
}

impl Launcher {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            shared_dir: config.shared_dir.clone(),
            log_dir: config.log_dir.clone(),
        }
    }

    pub fn launch(&self, spec: &ProcessSpec) -> Result<Launched> {
        let commands = Arc::new(ProcessCommands::new(&self.shared_dir, spec.ordinal)?);

        let logs = process_logs(&self.log_dir, &spec.key);
        let (stdout, stderr) = open_log_writers(&logs)?;

        let mut command = Command::new(&spec.program);
        #[cfg(unix)]
        {
            // Children get their own process group so stop/kill can target the full tree.
            unsafe {
                command.pre_exec(|| {
                    if nix::libc::setpgid(0, 0) == 0 {
                        Ok(())
                    } else {
                        Err(std::io::Error::last_os_error())
                    }
                });
            }
        }
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .env(SHARED_DIR_ENV, &self.shared_dir)
            .env(PROCESS_INDEX_ENV, spec.ordinal.to_string());

        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        if !spec.env.is_empty() {
            command.envs(&spec.env);
        }

        let mut child = command.spawn().map_err(|err| SvcgroupError::LaunchFailure {
            key: spec.key.clone(),
            reason: err.to_string(),
        })?;
        let pid = child.id().ok_or_else(|| SvcgroupError::LaunchFailure {
            key: spec.key.clone(),
            reason: "spawned child has no pid".to_string(),
        });
        let pid = match pid {
            Ok(pid) => pid,
            Err(err) => {
                let _ = child.start_kill();
                return Err(err.into());
            }
        };

        let handle = Arc::new(ProcessHandle::new(spec.key.clone(), pid, commands));
        handle.advance_to(ProcessStatus::Up);
        info!("launched process {handle}");

        Ok(Launched { handle, child })
    }
}
