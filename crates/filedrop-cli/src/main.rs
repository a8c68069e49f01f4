//! Filedrop CLI - single-file upload over TCP with MD5 verification
//!
//! ## Quick Start
//!
//! ```bash
//! # Run a receiver (files land in ./received_files)
//! filedrop serve
//!
//! # Send a file to it (from another machine)
//! filedrop send ./document.pdf 192.168.1.20
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Command::Serve(args) => args.log_file.as_deref(),
        _ => None,
    };
    init_logging(log_file)?;

    match cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Send(args) => commands::send::run(args).await,
        Command::Config(args) => commands::config::run(&args),
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,filedrop=info,filedrop_core=info"));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}
