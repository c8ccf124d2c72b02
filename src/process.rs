use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::trace;
#[cfg(unix)]
use tracing::warn;

use crate::ipc::ProcessCommands;

/// Per-process status. Only moves forward; `Stopped` and `Crashed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ProcessStatus {
    Starting = 0,
    Up = 1,
    Operational = 2,
    Stopped = 3,
    Crashed = 4,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessStatus::Stopped | ProcessStatus::Crashed)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProcessStatus::Starting,
            1 => ProcessStatus::Up,
            2 => ProcessStatus::Operational,
            3 => ProcessStatus::Stopped,
            _ => ProcessStatus::Crashed,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ProcessStatus::Starting => "starting",
            ProcessStatus::Up => "up",
            ProcessStatus::Operational => "operational",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Crashed => "crashed",
        };
        write!(f, "{value}")
    }
}

/// Handle over one launched OS process: its pid, its signal record, and its
/// supervisor-side status. Shared between the supervisor thread, the watcher
/// task of the process and the restart watcher, hence the atomics.
#[derive(Debug)]
pub struct ProcessHandle {
    key: String,
    pid: u32,
    commands: Arc<ProcessCommands>,
    status: AtomicU8,
    stop_requested: AtomicBool,
}

impl ProcessHandle {
    pub fn new(key: String, pid: u32, commands: Arc<ProcessCommands>) -> Self {
        Self {
            key,
            pid,
            commands,
            status: AtomicU8::new(ProcessStatus::Starting as u8),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn commands(&self) -> &ProcessCommands {
        &self.commands
    }

    pub fn status(&self) -> ProcessStatus {
        ProcessStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Moves the status forward. Backward moves and moves out of a terminal
    /// status are ignored; returns whether the status changed.
    pub fn advance_to(&self, target: ProcessStatus) -> bool {
        let result = self
            .status
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let current = ProcessStatus::from_u8(current);
                if current.is_terminal() || target <= current {
                    None
                } else {
                    Some(target as u8)
                }
            });
        match result {
            Ok(_) => {
                trace!("process {self} moved to status {target}");
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_crashed(&self) -> bool {
        self.status() == ProcessStatus::Crashed
    }

    pub fn stop_was_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Raises the stop flag on the signal record so a cooperative child shuts
    /// itself down, and records that the upcoming exit is expected.
    pub fn ask_for_graceful_stop(&self) -> anyhow::Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.commands.ask_for_stop()
    }

    /// Forcibly terminates the process, targeting its whole process group
    /// first so the full tree goes down with it. The exit is recorded as
    /// expected either way; the watcher observes the actual exit.
    pub fn kill(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if self.is_stopped() {
            return;
        }
        kill_process_tree(self.pid, &self.key);
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] (pid {})", self.key, self.pid)
    }
}

#[cfg(unix)]
fn kill_process_tree(pid: u32, key: &str) {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let os_pid = Pid::from_raw(pid as i32);
    let pgid = Pid::from_raw(-(pid as i32));

    match kill(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => {
            warn!("failed to kill process group of [{key}] (pid {pid}): {err}");
        }
    }
    match kill(os_pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => {
            warn!("failed to kill [{key}] (pid {pid}): {err}");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_tree(_pid: u32, _key: &str) {}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{ProcessHandle, ProcessStatus};
    use crate::ipc::ProcessCommands;

    #[test]
    fn status_only_moves_forward() {
        let (handle, shared) = fixture_handle("forward");

        assert_eq!(handle.status(), ProcessStatus::Starting);
        assert!(handle.advance_to(ProcessStatus::Up));
        assert!(handle.advance_to(ProcessStatus::Operational));
        assert!(
            !handle.advance_to(ProcessStatus::Up),
            "backward move must be ignored"
        );
        assert_eq!(handle.status(), ProcessStatus::Operational);

        let _ = fs::remove_dir_all(shared);
    }

    #[test]
    fn terminal_statuses_are_sticky() {
        let (handle, shared) = fixture_handle("terminal");

        assert!(handle.advance_to(ProcessStatus::Stopped));
        assert!(
            !handle.advance_to(ProcessStatus::Crashed),
            "stopped must not become crashed"
        );
        assert_eq!(handle.status(), ProcessStatus::Stopped);
        assert!(handle.is_stopped());
        assert!(!handle.is_crashed());

        let _ = fs::remove_dir_all(shared);
    }

    #[test]
    fn skipping_intermediate_statuses_is_allowed() {
        let (handle, shared) = fixture_handle("skip");

        // a crash can arrive straight from starting
        assert!(handle.advance_to(ProcessStatus::Crashed));
        assert!(handle.is_crashed());

        let _ = fs::remove_dir_all(shared);
    }

    #[test]
    fn graceful_stop_raises_the_flag_and_marks_expected_exit() {
        let (handle, shared) = fixture_handle("graceful");

        assert!(!handle.stop_was_requested());
        handle
            .ask_for_graceful_stop()
            .expect("failed to ask for a graceful stop");
        assert!(handle.stop_was_requested());
        assert!(handle.commands().asked_for_stop());

        let _ = fs::remove_dir_all(shared);
    }

    fn fixture_handle(prefix: &str) -> (ProcessHandle, PathBuf) {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock failure")
            .as_nanos();
        let shared = std::env::temp_dir().join(format!("svcgroup-process-{prefix}-{nonce}"));
        let commands =
            Arc::new(ProcessCommands::new(&shared, 1).expect("failed to create signal record"));
        (
            ProcessHandle::new("web".to_string(), u32::MAX - 1, commands),
            shared,
        )
    }
}
