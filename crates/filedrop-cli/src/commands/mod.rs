//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, it falls back to
/// defaults.
pub fn load_config() -> filedrop_core::config::Config {
    filedrop_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring config file: {e}");
        filedrop_core::config::Config::default()
    })
}

pub mod config;
pub mod send;
pub mod serve;

/// Filedrop - send a file over TCP, verified with MD5
#[derive(Parser)]
#[command(name = "filedrop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Run the receiver service until Ctrl-C
    Serve(ServeArgs),

    /// Send one file to a receiver
    Send(SendArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the serve command
#[derive(Parser)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory received files are written to
    #[arg(short, long)]
    pub save_dir: Option<PathBuf>,

    /// Connections served at once (1 = one after another)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Also append log lines to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Arguments for the send command
#[derive(Parser)]
pub struct SendArgs {
    /// File to send
    pub file: PathBuf,

    /// Receiver host name or address
    pub host: String,

    /// Receiver port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
