//! Send command implementation.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;

use filedrop_core::file::format_size;
use filedrop_core::progress::{TransferProgress, TransferState};
use filedrop_core::sender::{FileSender, SendReport};

use super::SendArgs;

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let mut config = super::load_config().sender;
    if let Some(port) = args.port {
        config.port = port;
    }

    if !args.quiet {
        crate::ui::print_banner();
        println!(
            "  Sending {} to {}:{}",
            args.file.display(),
            args.host,
            config.port
        );
        println!();
    }

    let sender = FileSender::new(config);
    let progress_handle = if args.quiet {
        None
    } else {
        Some(tokio::spawn(display_progress(sender.progress())))
    };

    let result = sender.send(&args.file, &args.host).await;
    drop(sender);

    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if let Some(hint) = e.suggestion() {
                eprintln!("  {hint}");
            }
            return Err(e).with_context(|| format!("Failed to send {}", args.file.display()));
        }
    };

    handle_report(&report, args.quiet)
}

fn handle_report(report: &SendReport, quiet: bool) -> Result<()> {
    println!("Server response: {}", report.reply_text);

    if !quiet {
        println!();
        println!(
            "  {} ({}) in {:.1}s, MD5 {}",
            report.file_name,
            format_size(report.bytes_sent),
            report.elapsed.as_secs_f64(),
            report.digest
        );
        println!();
    }

    if report.is_success() {
        Ok(())
    } else {
        anyhow::bail!("Receiver rejected {}: {}", report.file_name, report.reply)
    }
}

async fn display_progress(mut rx: watch::Receiver<TransferProgress>) {
    let mut last_state = TransferState::Preparing;

    loop {
        let changed = tokio::time::timeout(Duration::from_millis(250), rx.changed()).await;

        let progress = rx.borrow_and_update().clone();

        if progress.state != last_state {
            last_state = progress.state;

            match progress.state {
                TransferState::Connecting => println!("  Connecting..."),
                TransferState::Transferring => println!("  Starting transfer..."),
                TransferState::Verifying => {
                    print!("\r{}", crate::ui::progress_line(&progress));
                    println!();
                    println!("  Waiting for verification...");
                }
                TransferState::Failed => {
                    println!();
                    println!("  Transfer failed.");
                    break;
                }
                TransferState::Completed => break,
                TransferState::Preparing => {}
            }
        }

        if progress.state == TransferState::Transferring {
            print!("\r{}    ", crate::ui::progress_line(&progress));
            let _ = io::stdout().flush();
        }

        if matches!(changed, Ok(Err(_))) {
            break;
        }
    }
}
