//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::data_dir;

/// Local agent daemon
#[derive(Debug, Parser)]
#[command(name = "errand", version, about = "Local agent daemon: iterative planning, allowlisted shell tools")]
pub struct Cli {
    /// Path to the settings file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the daemon socket
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the daemon
    Start {
        /// Run in the foreground instead of detaching
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Check declared external tools for availability
    Tools,

    /// Run as the daemon process (internal)
    #[command(hide = true)]
    RunDaemon,
}

/// Default socket location
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(data_dir).join("errand.sock")
}

/// Daemon log file location
pub fn log_path() -> PathBuf {
    data_dir().join("logs").join("errand.log")
}
