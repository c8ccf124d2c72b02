use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_dir: PathBuf,
    pub group_file: PathBuf,
    /// Shared filesystem area holding the per-process signal records.
    pub shared_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Global bound on the wait for every process to report operational.
    pub startup_timeout: Duration,
    /// Per-process grace period before a stop escalates to a kill.
    pub termination_timeout: Duration,
    /// Poll interval of the restart and hard-stop watchers.
    pub watch_delay: Duration,
    pub enable_hard_stop: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let base_dir = env::var("SVCGROUP_HOME")
            .map(PathBuf::from)
            .ok()
            .unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(env::temp_dir)
                    .join("svcgroup")
            });
        let group_file = env::var("SVCGROUP_GROUP_FILE")
            .map(PathBuf::from)
            .ok()
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| base_dir.join("group.json"));

        let config = Self {
            shared_dir: base_dir.join("sharedmem"),
            log_dir: base_dir.join("logs"),
            group_file,
            startup_timeout: Duration::from_secs(
                env_u64("SVCGROUP_STARTUP_TIMEOUT_SECS", 120).max(1),
            ),
            termination_timeout: Duration::from_secs(
                env_u64("SVCGROUP_STOP_TIMEOUT_SECS", 60).max(1),
            ),
            watch_delay: Duration::from_millis(env_u64("SVCGROUP_WATCH_DELAY_MS", 500).max(10)),
            enable_hard_stop: env_flag("SVCGROUP_ENABLE_HARD_STOP"),
            base_dir,
        };
        config.ensure_layout()?;
        Ok(config)
    }

    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("failed to create {}", self.base_dir.display()))?;
        fs::create_dir_all(&self.shared_dir)
            .with_context(|| format!("failed to create {}", self.shared_dir.display()))?;
        fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("failed to create {}", self.log_dir.display()))?;
        Ok(())
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
