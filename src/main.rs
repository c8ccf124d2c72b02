mod cli;
mod commands;
mod config;
mod errors;
mod ipc;
mod launcher;
mod lifecycle;
mod logging;
mod process;
mod supervisor;
mod watcher;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::{CommandSource, FileCommandSource};
use crate::config::AppConfig;
use crate::lifecycle::{LifecycleListener, State};
use crate::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { group_file } => run(group_file).await,
        Commands::Validate { path } => validate(path),
    }
}

async fn run(group_file: Option<PathBuf>) -> Result<()> {
    let mut config = AppConfig::load()?;
    if let Some(path) = group_file {
        config.group_file = path;
    }
    info!(
        "supervising group {} from {}",
        config.group_file.display(),
        config.base_dir.display()
    );

    let source = Arc::new(FileCommandSource::new(config.group_file.clone()));
    let supervisor = Arc::new(Supervisor::new(
        config,
        source,
        vec![Box::new(GroupLifecycleListener)],
    ));

    supervisor.start().await?;

    tokio::select! {
        _ = supervisor.wait_until_stopped() => {}
        _ = termination_signal() => {
            info!("termination signal received, stopping process group");
            supervisor.stop().await;
        }
    }
    supervisor.wait_until_stopped().await;

    if let Some(reason) = supervisor.last_failure() {
        anyhow::bail!(reason);
    }
    Ok(())
}

fn validate(path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => AppConfig::load()?.group_file,
    };

    let source = FileCommandSource::new(path.clone());
    let specs = source.fetch()?;

    println!("Group definition: OK");
    println!("Path: {}", path.display());
    println!("Processes: {}", specs.len());
    for spec in &specs {
        println!("  {}. {} -> {}", spec.ordinal, spec.key, spec.program);
    }

    Ok(())
}

/// Logs every lifecycle transition of the supervised group.
struct GroupLifecycleListener;

impl LifecycleListener for GroupLifecycleListener {
    fn on_transition(&self, from: State, to: State) {
        info!("process group moved from {from} to {to}");
    }
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::warn!("failed to install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
