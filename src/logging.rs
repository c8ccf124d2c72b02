use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Per-process stdout/stderr capture files.
#[derive(Debug, Clone)]
pub struct ProcessLogs {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

pub fn process_logs(log_dir: &Path, key: &str) -> ProcessLogs {
    ProcessLogs {
        stdout: log_dir.join(format!("{key}.out.log")),
        stderr: log_dir.join(format!("{key}.err.log")),
    }
}

/// Opens append-mode writers for a child's stdout and stderr. Files and their
/// directory stay private to the supervising user.
pub fn open_log_writers(logs: &ProcessLogs) -> Result<(File, File)> {
    if let Some(parent) = logs.stdout.parent() {
        ensure_private_dir(parent)?;
    }

    let stdout = open_append(&logs.stdout)?;
    let stderr = open_append(&logs.stderr)?;
    Ok((stdout, stderr))
}

fn open_append(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .with_context(|| format!("failed opening {}", path.display()))
}

fn ensure_private_dir(path: &Path) -> Result<()> {
    let existed = path.exists();
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if !existed {
            fs::set_permissions(path, fs::Permissions::from_mode(0o700))
                .with_context(|| format!("failed to set permissions on {}", path.display()))?;
        }
    }
    Ok(())
}
