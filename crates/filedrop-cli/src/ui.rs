//! UI utilities for the filedrop CLI.

use std::time::Duration;

use filedrop_core::file::format_size;
use filedrop_core::progress::{PeerProgress, TransferProgress, TransferState};

const RULE_WIDTH: usize = 37;

/// Print the version banner.
pub fn print_banner() {
    println!();
    println!("Filedrop v{}", filedrop_core::VERSION);
    println!("{}", "-".repeat(RULE_WIDTH));
    println!();
}

/// Render one progress line (without the leading carriage return).
pub fn progress_line(progress: &TransferProgress) -> String {
    format!(
        "  [{:>6.2}%] {} - {}/{} - {}/s - ETA: {}",
        progress.percentage(),
        progress.file_name,
        format_size(progress.bytes_transferred),
        format_size(progress.total_bytes),
        format_size(progress.speed_bps),
        format_eta(progress.eta)
    )
}

/// Render one line for a receiver-side progress event, or `None` for states
/// worth no output (header parsing, verifying).
pub fn peer_progress_line(event: &PeerProgress) -> Option<String> {
    let progress = &event.progress;
    match progress.state {
        TransferState::Transferring => Some(format!(
            "  {} {}",
            event.peer,
            progress_line(progress).trim_start()
        )),
        TransferState::Completed => Some(format!(
            "  {} {} verified ({})",
            event.peer,
            progress.file_name,
            format_size(progress.bytes_transferred)
        )),
        TransferState::Failed => Some(format!(
            "  {} {} failed after {}/{}",
            event.peer,
            progress.file_name,
            format_size(progress.bytes_transferred),
            format_size(progress.total_bytes)
        )),
        _ => None,
    }
}

/// Format an estimated time remaining as "M:SS", or "--" if unknown.
pub fn format_eta(eta: Option<Duration>) -> String {
    eta.map_or_else(
        || "--".to_string(),
        |remaining| {
            let total_secs = remaining.as_secs();
            format!("{}:{:02}", total_secs / 60, total_secs % 60)
        },
    )
}
