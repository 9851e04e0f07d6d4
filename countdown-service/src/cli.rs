use std::path::PathBuf;

use clap::{Parser, Subcommand};

const HELP_EPILOG: &str = r#"Config resolution order:
  1) --config/-c PATH
  2) $COUNTDOWN_CONFIG
  3) XDG default: ~/.config/countdown-notifier/service.yaml (defaults if missing)

Start requests on stdin (serve mode), one per line:
  {"Id": "001"}
  002
"#;

#[derive(Debug, Parser)]
#[command(
    name = "countdown-service",
    version,
    about = "Per-task countdowns with live progress notifications",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Log notifications instead of showing them
    #[arg(long)]
    pub log_only: bool,
    /// Optional subcommand. Without one, serves start requests from stdin.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Read start requests from stdin until EOF or a shutdown signal
    Serve,
    /// Start countdowns for the given task ids and wait for them to finish
    Start {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Print the notification slots a task id resolves to
    Slot { id: String },
}
