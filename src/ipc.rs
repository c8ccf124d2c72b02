use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Environment variables handed to every launched child so it can locate its
/// own signal record.
pub const SHARED_DIR_ENV: &str = "SVCGROUP_SHARED_DIR";
pub const PROCESS_INDEX_ENV: &str = "SVCGROUP_PROCESS_INDEX";

/// Record index reserved for the supervisor itself. An external controller
/// writes the stop flag into this record to request a hard stop.
pub const SUPERVISOR_INDEX: usize = 0;

const OPERATIONAL_FLAG: &str = "operational";
const STOP_FLAG: &str = "stop.request";
const RESTART_FLAG: &str = "restart.request";

/// One durable signal record per managed process, addressed by its ordinal
/// index. The record is a directory of marker files so each flag can be set
/// and read independently by the child and the supervisor without either side
/// corrupting the other: creating and checking a file are both atomic at the
/// filesystem level, and the record outlives both processes.
#[derive(Debug, Clone)]
pub struct ProcessCommands {
    dir: PathBuf,
}

impl ProcessCommands {
    pub fn new(shared_dir: &Path, index: usize) -> Result<Self> {
        let dir = shared_dir.join(index.to_string());
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create signal record {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn set_operational(&self) -> Result<()> {
        self.raise(OPERATIONAL_FLAG)
    }

    pub fn is_operational(&self) -> bool {
        self.dir.join(OPERATIONAL_FLAG).exists()
    }

    pub fn ask_for_stop(&self) -> Result<()> {
        self.raise(STOP_FLAG)
    }

    pub fn asked_for_stop(&self) -> bool {
        self.dir.join(STOP_FLAG).exists()
    }

    pub fn ask_for_restart(&self) -> Result<()> {
        self.raise(RESTART_FLAG)
    }

    pub fn asked_for_restart(&self) -> bool {
        self.dir.join(RESTART_FLAG).exists()
    }

    /// Clears a consumed restart request so the same flag is not taken into
    /// account twice. A child that still wants a restart raises it again.
    pub fn acknowledge_ask_for_restart(&self) -> Result<()> {
        self.lower(RESTART_FLAG)
    }

    fn raise(&self, flag: &str) -> Result<()> {
        let path = self.dir.join(flag);
        fs::write(&path, b"1").with_context(|| format!("failed to raise {}", path.display()))
    }

    fn lower(&self, flag: &str) -> Result<()> {
        let path = self.dir.join(flag);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to lower {}", path.display()))
            }
        }
    }
}

/// Wipes every signal record. Stale flags left behind by a previous run must
/// never leak into a new start cycle.
pub fn reset_dir(shared_dir: &Path) -> Result<()> {
    if shared_dir.exists() {
        fs::remove_dir_all(shared_dir)
            .with_context(|| format!("failed to reset {}", shared_dir.display()))?;
    }
    fs::create_dir_all(shared_dir)
        .with_context(|| format!("failed to create {}", shared_dir.display()))
}
