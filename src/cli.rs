use std::path::PathBuf;

use clap::{Parser, Subcommand};

const BUILD_VERSION: &str = env!("SVCGROUP_BUILD_VERSION");
const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
USAGE:
  {usage}

COMMANDS:
{subcommands}

OPTIONS:
{options}
{after-help}
";
const HELP_AFTER: &str = "\
Environment
  SVCGROUP_HOME                  base directory (default: platform data dir)
  SVCGROUP_GROUP_FILE            group definition file (default: <home>/group.json)
  SVCGROUP_STARTUP_TIMEOUT_SECS  wait for the group to become operational (default: 120)
  SVCGROUP_STOP_TIMEOUT_SECS     per-process grace period before a kill (default: 60)
  SVCGROUP_WATCH_DELAY_MS        restart/hard-stop poll interval (default: 500)
  SVCGROUP_ENABLE_HARD_STOP      watch the supervisor record for external stops

Examples
  svcgroup run
  svcgroup run --group-file ./group.json
  svcgroup validate ./group.json
";

#[derive(Debug, Parser)]
#[command(
    name = "svcgroup",
    version = BUILD_VERSION,
    about = "Svcgroup process group supervisor",
    help_template = HELP_TEMPLATE,
    after_help = HELP_AFTER
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the process group and supervise it until it stops
    Run {
        /// Group definition file, overrides SVCGROUP_GROUP_FILE
        #[arg(long = "group-file")]
        group_file: Option<PathBuf>,
    },
    /// Check a group definition file without launching anything
    Validate {
        /// File to check, defaults to the configured group file
        path: Option<PathBuf>,
    },
}
