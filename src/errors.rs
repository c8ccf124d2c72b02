use thiserror::Error;

#[derive(Debug, Error)]
pub enum SvcgroupError {
    #[error("failed to launch process [{key}]: {reason}")]
    LaunchFailure { key: String, reason: String },
    #[error("process group did not become operational within {0} seconds")]
    StartupTimeout(u64),
    #[error("process [{0}] exited before becoming operational")]
    ChildCrash(String),
    #[error("invalid group file: {0}")]
    InvalidGroupFile(String),
    #[error("invalid process key: {0}")]
    InvalidProcessKey(String),
    #[error("duplicate process key: {0}")]
    DuplicateProcessKey(String),
    #[error("group file defines no processes")]
    EmptyGroup,
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}
