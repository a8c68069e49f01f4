//! Transfer progress reporting.
//!
//! Senders and receivers publish [`TransferProgress`] snapshots on a
//! `tokio::sync::watch` channel. Observers (the CLI progress line, tests)
//! subscribe and read the latest snapshot whenever they like; a slow
//! observer never slows the transfer down.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::watch;

/// Transfer state as seen by progress observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Computing the digest, before connecting
    Preparing,
    /// Connecting to the receiver
    Connecting,
    /// Body bytes are flowing
    Transferring,
    /// Body done, waiting for or computing the verdict
    Verifying,
    /// Transfer verified
    Completed,
    /// Transfer failed
    Failed,
}

impl TransferState {
    /// Whether no further updates will follow.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Progress information for a single-file transfer.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Current state
    pub state: TransferState,
    /// File name being transferred
    pub file_name: String,
    /// Body bytes transferred so far
    pub bytes_transferred: u64,
    /// Declared body size
    pub total_bytes: u64,
    /// Transfer speed in bytes per second
    pub speed_bps: u64,
    /// Estimated time remaining
    pub eta: Option<Duration>,
    /// When the transfer started
    pub started_at: Instant,
}

impl TransferProgress {
    /// Create a new progress snapshot.
    #[must_use]
    pub fn new(file_name: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            state: TransferState::Preparing,
            file_name: file_name.into(),
            bytes_transferred: 0,
            total_bytes,
            speed_bps: 0,
            eta: None,
            started_at: Instant::now(),
        }
    }

    /// Get progress as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            (self.bytes_transferred as f64 / self.total_bytes as f64) * 100.0
        }
    }

    fn record(&mut self, bytes: u64) {
        self.bytes_transferred += bytes;
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                self.speed_bps = (self.bytes_transferred as f64 / elapsed) as u64;
            }
            let remaining = self.total_bytes.saturating_sub(self.bytes_transferred);
            if self.speed_bps > 0 {
                self.eta = Some(Duration::from_secs(remaining / self.speed_bps));
            }
        }
    }
}

/// Minimum spacing between forwarded per-connection progress events while
/// bytes are flowing. State changes are always forwarded.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// A progress snapshot from one receiver connection.
#[derive(Debug, Clone)]
pub struct PeerProgress {
    /// Sending peer
    pub peer: SocketAddr,
    /// Latest snapshot for that peer's transfer
    pub progress: TransferProgress,
}

/// Publishing side of a progress channel.
#[derive(Debug)]
pub struct ProgressTracker {
    tx: watch::Sender<TransferProgress>,
}

impl ProgressTracker {
    /// Create a tracker for a transfer of `total_bytes`.
    #[must_use]
    pub fn new(file_name: impl Into<String>, total_bytes: u64) -> Self {
        let (tx, _rx) = watch::channel(TransferProgress::new(file_name, total_bytes));
        Self { tx }
    }

    /// Get a progress receiver.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TransferProgress> {
        self.tx.subscribe()
    }

    /// Change the state.
    pub fn set_state(&self, state: TransferState) {
        self.tx.send_modify(|p| {
            if state == TransferState::Transferring && p.state != TransferState::Transferring {
                p.started_at = Instant::now();
            }
            p.state = state;
        });
    }

    /// Reset the file name and size once they are known.
    pub fn set_file(&self, file_name: impl Into<String>, total_bytes: u64) {
        let file_name = file_name.into();
        self.tx.send_modify(|p| {
            p.file_name = file_name;
            p.total_bytes = total_bytes;
        });
    }

    /// Report `bytes` more body bytes transferred.
    pub fn advance(&self, bytes: usize) {
        self.tx.send_modify(|p| p.record(bytes as u64));
    }
}
