use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::errors::SvcgroupError;

/// Immutable description of one child to launch. Rebuilt from the
/// [`CommandSource`] for every start/restart cycle and never mutated.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub key: String,
    /// 1-based position in the group; defines start order. Index 0 is the
    /// supervisor's own signal record.
    pub ordinal: usize,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

/// Produces the ordered list of process specifications to launch. Called again
/// on every restart so configuration changes are picked up between cycles.
pub trait CommandSource: Send + Sync {
    fn fetch(&self) -> Result<Vec<ProcessSpec>>;
}

#[derive(Debug, Deserialize)]
struct GroupFile {
    processes: Vec<GroupEntry>,
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    key: String,
    command: String,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Command source backed by a JSON group definition file, re-read on every
/// fetch.
pub struct FileCommandSource {
    path: PathBuf,
}

impl FileCommandSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CommandSource for FileCommandSource {
    fn fetch(&self) -> Result<Vec<ProcessSpec>> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read group file {}", self.path.display()))?;
        let group: GroupFile = serde_json::from_str(&raw)
            .map_err(|err| SvcgroupError::InvalidGroupFile(err.to_string()))?;

        if group.processes.is_empty() {
            return Err(SvcgroupError::EmptyGroup.into());
        }

        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(group.processes.len());
        for (position, entry) in group.processes.into_iter().enumerate() {
            validate_process_key(&entry.key)?;
            if !seen.insert(entry.key.clone()) {
                return Err(SvcgroupError::DuplicateProcessKey(entry.key).into());
            }

            let (program, args) = parse_command_line(&entry.command)?;
            specs.push(ProcessSpec {
                key: entry.key,
                ordinal: position + 1,
                program,
                args,
                cwd: entry.cwd,
                env: entry.env,
            });
        }
        Ok(specs)
    }
}

fn parse_command_line(command_line: &str) -> Result<(String, Vec<String>)> {
    let tokens = shell_words::split(command_line)
        .map_err(|err| SvcgroupError::InvalidCommand(err.to_string()))?;

    if tokens.is_empty() {
        return Err(SvcgroupError::InvalidCommand("command cannot be empty".to_string()).into());
    }

    let program = tokens[0].clone();
    let args = tokens[1..].to_vec();
    Ok((program, args))
}

fn validate_process_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SvcgroupError::InvalidProcessKey("key cannot be empty".to_string()).into());
    }

    let valid = key
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');

    if !valid {
        return Err(SvcgroupError::InvalidProcessKey(key.to_string()).into());
    }
    Ok(())
}
