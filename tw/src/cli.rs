//! CLI definitions for the controller binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// taskweave - MCP task orchestrator daemon
#[derive(Parser)]
#[command(
    name = "tw",
    about = "Turns user requests into verified MCP tool executions",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Controller subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the daemon
    Start {
        /// Run in the foreground instead of daemonizing
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon and MCP server status
    Status,

    /// Restart the daemon
    Restart,

    /// Internal: run as the daemon process (used by `start`)
    #[command(hide = true)]
    RunDaemon,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let cli = Cli::try_parse_from(["tw", "start", "--foreground"]).unwrap();
        assert!(matches!(cli.command, Command::Start { foreground: true }));
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from(["tw", "--log-level", "debug", "status"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["tw"]).is_err());
    }

    #[test]
    fn test_parse_stop_restart() {
        assert!(matches!(
            Cli::try_parse_from(["tw", "stop"]).unwrap().command,
            Command::Stop
        ));
        assert!(matches!(
            Cli::try_parse_from(["tw", "restart"]).unwrap().command,
            Command::Restart
        ));
    }
}
