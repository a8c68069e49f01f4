//! Per-connection receiver state machine.
//!
//! ```text
//! AWAITING_HEADER ──▶ STREAMING ──▶ VERIFYING ──▶ COMPLETE
//!        │                │              │
//!        └──▶ FAILED ◀────┴──────────────┘
//! ```
//!
//! - **AWAITING_HEADER**: one bounded read. Nothing at all means the peer
//!   gave up; the connection is released without a reply.
//! - **STREAMING**: bounded reads until the declared size is reached, each
//!   chunk hashed, written, counted and reported. An early close, or a body
//!   that stops arriving for longer than the I/O timeout, fails the transfer
//!   as incomplete.
//! - **VERIFYING**: the computed digest is compared with the declared one.
//! - **COMPLETE / FAILED**: exactly one reply, then the connection closes.
//!
//! Partial files are left on disk on every failure.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, watch};
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::digest::Md5Digest;
use crate::error::{Error, Result};
use crate::file::{format_size, sanitize_file_name, StoredFile};
use crate::progress::{
    PeerProgress, ProgressTracker, TransferProgress, TransferState, PROGRESS_INTERVAL,
};
use crate::protocol::{
    read_with_timeout, split_header, write_all_with_timeout, FailureReason, Reply,
    TransferHeader, HEADER_BUFFER_SIZE,
};

/// Receiver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Waiting for the header read
    AwaitingHeader,
    /// Receiving body bytes
    Streaming,
    /// Comparing digests
    Verifying,
    /// Body stored and verified
    Complete,
    /// Transfer failed
    Failed(TransferStatus),
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingHeader => f.write_str("AWAITING_HEADER"),
            Self::Streaming => f.write_str("STREAMING"),
            Self::Verifying => f.write_str("VERIFYING"),
            Self::Complete => f.write_str("COMPLETE"),
            Self::Failed(status) => write!(f, "FAILED({status:?})"),
        }
    }
}

/// Final status of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Body stored and digest verified
    Success,
    /// Connection closed before the declared size arrived
    IncompleteTransfer,
    /// Digest of the received body differs from the declared one
    DigestMismatch,
    /// Header missing, malformed or unusable
    ProtocolError,
}

impl TransferStatus {
    /// The reply message for this status.
    #[must_use]
    pub const fn reply(self) -> Reply {
        match self {
            Self::Success => Reply::Success,
            Self::IncompleteTransfer => Reply::Failure(FailureReason::IncompleteTransfer),
            Self::DigestMismatch => Reply::Failure(FailureReason::DigestMismatch),
            Self::ProtocolError => Reply::Failure(FailureReason::MalformedHeader),
        }
    }
}

/// Result of one connection, built once in a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Body bytes written to storage
    pub bytes_written: u64,
    /// Digest of the bytes written (empty if no body was started)
    pub computed_digest: String,
    /// Final status
    pub status: TransferStatus,
    /// Destination file, if one was created
    pub stored_path: Option<PathBuf>,
}

impl TransferOutcome {
    /// Whether the transfer verified.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, TransferStatus::Success)
    }
}

/// Receives one file from one connection.
#[derive(Debug)]
pub struct FileReceiver {
    config: Arc<ServerConfig>,
    peer: SocketAddr,
    state: ReceiverState,
    history: Vec<ReceiverState>,
    progress: ProgressTracker,
}

impl FileReceiver {
    /// Create a receiver for a connection from `peer`.
    #[must_use]
    pub fn new(config: Arc<ServerConfig>, peer: SocketAddr) -> Self {
        Self {
            config,
            peer,
            state: ReceiverState::AwaitingHeader,
            history: vec![ReceiverState::AwaitingHeader],
            progress: ProgressTracker::new("", 0),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ReceiverState {
        self.state
    }

    /// Every state entered so far, in order.
    #[must_use]
    pub fn history(&self) -> &[ReceiverState] {
        &self.history
    }

    /// Get a progress receiver.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress.subscribe()
    }

    /// Run the state machine over `stream`.
    ///
    /// Returns `Ok(None)` if the peer closed without sending anything. A
    /// malformed header, a truncated body or a digest mismatch are not
    /// errors: they produce a failed outcome and a failure reply.
    ///
    /// # Errors
    ///
    /// Returns transport errors (I/O, timeouts) and filesystem errors. No
    /// reply is sent in that case.
    pub async fn receive<S>(&mut self, stream: &mut S) -> Result<Option<TransferOutcome>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut header_buf = vec![0u8; HEADER_BUFFER_SIZE];
        let n = read_with_timeout(stream, &mut header_buf, self.config.header_timeout).await?;
        if n == 0 {
            tracing::warn!("Client {} connected but sent no data", self.peer);
            return Ok(None);
        }

        let (head, early_body) = split_header(&header_buf[..n]);
        let header = match TransferHeader::decode(head) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("Bad header from {}: {}", self.peer, e);
                return Ok(Some(self.fail_before_body(stream).await));
            }
        };

        if sanitize_file_name(&header.name).is_none() {
            tracing::warn!("Unusable file name {:?} from {}", header.name, self.peer);
            return Ok(Some(self.fail_before_body(stream).await));
        }

        let (stored, mut file) =
            StoredFile::create(&self.config.save_dir, &header.name, Local::now()).await?;

        tracing::info!(
            "Receiving file: {} ({}) from {}",
            stored.file_name,
            format_size(header.size),
            self.peer
        );

        self.progress.set_file(&stored.file_name, header.size);
        self.transition(ReceiverState::Streaming);

        let mut digest = Md5Digest::new();
        let mut written = 0u64;

        let result = self
            .stream_body(stream, &header, early_body, &mut file, &stored, &mut digest, &mut written)
            .await;
        close_file(&mut file, &stored).await?;
        let complete = result?;

        let (status, computed_digest) = if complete {
            self.transition(ReceiverState::Verifying);
            let computed = digest.finalize();
            if computed == header.expected_digest {
                tracing::info!(
                    "File {} received successfully from {} (MD5 verified)",
                    stored.file_name,
                    self.peer
                );
                (TransferStatus::Success, computed)
            } else {
                tracing::warn!(
                    "File transfer failed from {}: MD5 mismatch (expected {}, computed {})",
                    self.peer,
                    header.expected_digest,
                    computed
                );
                (TransferStatus::DigestMismatch, computed)
            }
        } else {
            tracing::warn!(
                "File transfer failed from {}: Incomplete transfer ({} of {} bytes)",
                self.peer,
                written,
                header.size
            );
            (TransferStatus::IncompleteTransfer, digest.finalize())
        };

        let outcome = TransferOutcome {
            bytes_written: written,
            computed_digest,
            status,
            stored_path: Some(stored.path),
        };
        self.finish(stream, &outcome).await;
        Ok(Some(outcome))
    }

    /// Receive body bytes until `header.size` is reached.
    ///
    /// Returns `false` if the peer closed or went silent for longer than the
    /// I/O timeout first. The connection stays usable in both cases, so the
    /// caller still replies.
    #[allow(clippy::too_many_arguments)]
    async fn stream_body<S>(
        &self,
        stream: &mut S,
        header: &TransferHeader,
        early_body: &[u8],
        file: &mut File,
        stored: &StoredFile,
        digest: &mut Md5Digest,
        written: &mut u64,
    ) -> Result<bool>
    where
        S: AsyncRead + Unpin,
    {
        let keep = usize::try_from(header.size)
            .map_or(early_body.len(), |size| size.min(early_body.len()));
        let early = &early_body[..keep];
        if early.len() < early_body.len() {
            tracing::debug!(
                "Ignoring {} bytes past the declared size from {}",
                early_body.len() - early.len(),
                self.peer
            );
        }
        if !early.is_empty() {
            self.consume(early, file, stored, digest, written).await?;
        }

        let mut chunk = vec![0u8; self.config.chunk_size.max(1)];
        while *written < header.size {
            #[allow(clippy::cast_possible_truncation)]
            let want = (header.size - *written).min(chunk.len() as u64) as usize;
            let n = match read_with_timeout(stream, &mut chunk[..want], self.config.io_timeout)
                .await
            {
                Ok(0) => {
                    tracing::warn!("Connection with {} closed prematurely", self.peer);
                    return Ok(false);
                }
                Ok(n) => n,
                Err(Error::Timeout(after)) => {
                    tracing::warn!(
                        "No body data from {} for {:?}, giving up",
                        self.peer,
                        after
                    );
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            self.consume(&chunk[..n], file, stored, digest, written).await?;
        }

        Ok(true)
    }

    async fn consume(
        &self,
        chunk: &[u8],
        file: &mut File,
        stored: &StoredFile,
        digest: &mut Md5Digest,
        written: &mut u64,
    ) -> Result<()> {
        digest.update(chunk);
        file.write_all(chunk)
            .await
            .map_err(|e| Error::filesystem(&stored.path, e))?;
        *written += chunk.len() as u64;
        self.progress.advance(chunk.len());
        Ok(())
    }

    async fn fail_before_body<S>(&mut self, stream: &mut S) -> TransferOutcome
    where
        S: AsyncWrite + Unpin,
    {
        let outcome = TransferOutcome {
            bytes_written: 0,
            computed_digest: String::new(),
            status: TransferStatus::ProtocolError,
            stored_path: None,
        };
        self.finish(stream, &outcome).await;
        outcome
    }

    /// Enter the terminal state and send the single reply.
    async fn finish<S>(&mut self, stream: &mut S, outcome: &TransferOutcome)
    where
        S: AsyncWrite + Unpin,
    {
        let terminal = match outcome.status {
            TransferStatus::Success => ReceiverState::Complete,
            status => ReceiverState::Failed(status),
        };
        self.transition(terminal);
        self.progress.set_state(if outcome.is_success() {
            TransferState::Completed
        } else {
            TransferState::Failed
        });

        let reply = outcome.status.reply();
        if let Err(e) =
            write_all_with_timeout(stream, &reply.encode(), self.config.io_timeout).await
        {
            tracing::warn!("Could not send reply to {}: {}", self.peer, e);
        }
    }

    fn transition(&mut self, next: ReceiverState) {
        tracing::debug!("{}: {} -> {}", self.peer, self.state, next);
        self.state = next;
        self.history.push(next);
        match next {
            ReceiverState::Streaming => self.progress.set_state(TransferState::Transferring),
            ReceiverState::Verifying => self.progress.set_state(TransferState::Verifying),
            _ => {}
        }
    }
}

async fn close_file(file: &mut File, stored: &StoredFile) -> Result<()> {
    file.flush()
        .await
        .map_err(|e| Error::filesystem(&stored.path, e))?;
    file.sync_all()
        .await
        .map_err(|e| Error::filesystem(&stored.path, e))
}

/// Handle one accepted connection end to end.
///
/// Progress snapshots are forwarded to `events`, tagged with the peer
/// address and throttled to one per [`PROGRESS_INTERVAL`] while bytes flow.
/// The stream is shut down and dropped before returning, on every path.
///
/// Returns `Ok(None)` for a connection that closed without sending anything.
///
/// # Errors
///
/// Returns the transport or filesystem error that ended the connection
/// before a reply could be sent. It has already been logged.
pub async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    events: Option<broadcast::Sender<PeerProgress>>,
) -> Result<Option<TransferOutcome>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let span = tracing::info_span!("connection", %peer);
    async move {
        let mut receiver = FileReceiver::new(config, peer);
        let mut updates = receiver.progress();

        let result = match &events {
            Some(events) => {
                let mut last_sent: Option<Instant> = None;
                let receive = receiver.receive(&mut stream);
                tokio::pin!(receive);
                loop {
                    tokio::select! {
                        result = &mut receive => break result,
                        Ok(()) = updates.changed() => {
                            let progress = updates.borrow_and_update().clone();
                            let due = last_sent.is_none_or(|at| at.elapsed() >= PROGRESS_INTERVAL);
                            if due || progress.state != TransferState::Transferring {
                                last_sent = Some(Instant::now());
                                let _ = events.send(PeerProgress { peer, progress });
                            }
                        }
                    }
                }
            }
            None => receiver.receive(&mut stream).await,
        };

        match &result {
            Ok(Some(_)) => {
                if let Some(events) = &events {
                    if updates.has_changed().unwrap_or(false) {
                        let progress = updates.borrow_and_update().clone();
                        let _ = events.send(PeerProgress { peer, progress });
                    }
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Error receiving file from {}: {}", peer, e),
        }

        let _ = stream.shutdown().await;
        drop(stream);
        tracing::info!("Connection with {} closed", peer);
        result
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, DuplexStream};

    use crate::digest::md5_hex;
    use crate::protocol::SEPARATOR;

    fn test_config(save_dir: &Path) -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            save_dir: save_dir.to_path_buf(),
            header_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
            ..Default::default()
        })
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn header_bytes(name: &str, size: u64, digest: &str) -> Vec<u8> {
        TransferHeader::new(name, size, digest).encode()
    }

    /// Write everything the client sends, close the client's write side, and
    /// run the receiver over the other end.
    async fn run(
        save_dir: &Path,
        wire: &[u8],
    ) -> (Option<TransferOutcome>, Vec<ReceiverState>, String) {
        let (mut client, mut server): (DuplexStream, DuplexStream) = tokio::io::duplex(1 << 20);
        client.write_all(wire).await.expect("client write");
        client.shutdown().await.expect("client shutdown");

        let mut receiver = FileReceiver::new(test_config(save_dir), peer());
        let outcome = receiver.receive(&mut server).await.expect("receive");
        let history = receiver.history().to_vec();
        drop(server);

        let mut reply = String::new();
        client.read_to_string(&mut reply).await.expect("read reply");
        (outcome, history, reply)
    }

    fn files_in(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").path())
            .collect()
    }

    #[tokio::test]
    async fn test_receive_success() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut wire = header_bytes("abc.txt", 5, &md5_hex(b"ABCDE"));
        wire.extend_from_slice(b"ABCDE");

        let (outcome, history, reply) = run(temp_dir.path(), &wire).await;
        let outcome = outcome.expect("outcome");

        assert_eq!(outcome.status, TransferStatus::Success);
        assert_eq!(outcome.bytes_written, 5);
        assert_eq!(outcome.computed_digest, md5_hex(b"ABCDE"));
        assert_eq!(reply, "File received successfully - MD5 verified");
        assert_eq!(
            history,
            vec![
                ReceiverState::AwaitingHeader,
                ReceiverState::Streaming,
                ReceiverState::Verifying,
                ReceiverState::Complete,
            ]
        );

        let stored = outcome.stored_path.expect("stored path");
        assert_eq!(std::fs::read(&stored).expect("read stored"), b"ABCDE");
        let name = stored.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_abc.txt"), "unexpected name {name}");
        assert_eq!(name.len(), "YYYYMMDD_HHMMSS_abc.txt".len());
    }

    #[tokio::test]
    async fn test_receive_digest_mismatch() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut wire = header_bytes("abc.txt", 5, &md5_hex(b"ABCDE"));
        wire.extend_from_slice(b"ABCDF");

        let (outcome, history, reply) = run(temp_dir.path(), &wire).await;
        let outcome = outcome.expect("outcome");

        assert_eq!(outcome.status, TransferStatus::DigestMismatch);
        assert_eq!(outcome.bytes_written, 5);
        assert_eq!(outcome.computed_digest, md5_hex(b"ABCDF"));
        assert_eq!(reply, "File transfer failed: MD5 mismatch");
        assert!(history.contains(&ReceiverState::Verifying));
        assert!(!history.contains(&ReceiverState::Complete));

        let stored = outcome.stored_path.expect("partial file is kept");
        assert_eq!(std::fs::read(stored).expect("read stored"), b"ABCDF");
    }

    #[tokio::test]
    async fn test_receive_truncated_body() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut wire = header_bytes("big.bin", 10, &md5_hex(b"0123456789"));
        wire.extend_from_slice(b"0123");

        let (outcome, history, reply) = run(temp_dir.path(), &wire).await;
        let outcome = outcome.expect("outcome");

        assert_eq!(outcome.status, TransferStatus::IncompleteTransfer);
        assert_eq!(outcome.bytes_written, 4);
        assert_eq!(reply, "File transfer failed: Incomplete transfer");
        assert!(!history.contains(&ReceiverState::Verifying));
        assert_eq!(
            history.last(),
            Some(&ReceiverState::Failed(TransferStatus::IncompleteTransfer))
        );

        let stored = outcome.stored_path.expect("partial file is kept");
        assert_eq!(std::fs::read(stored).expect("read stored"), b"0123");
    }

    #[tokio::test]
    async fn test_receive_malformed_header_creates_no_file() {
        let temp_dir = TempDir::new().expect("create temp dir");

        for wire in [
            b"no separators at all".to_vec(),
            format!("name{SEPARATOR}5").into_bytes(),
            format!("name{SEPARATOR}five{SEPARATOR}{}", md5_hex(b"x")).into_bytes(),
        ] {
            let (outcome, history, reply) = run(temp_dir.path(), &wire).await;
            let outcome = outcome.expect("outcome");

            assert_eq!(outcome.status, TransferStatus::ProtocolError);
            assert_eq!(outcome.stored_path, None);
            assert_eq!(reply, "File transfer failed: Malformed header");
            assert_eq!(
                history,
                vec![
                    ReceiverState::AwaitingHeader,
                    ReceiverState::Failed(TransferStatus::ProtocolError),
                ]
            );
        }

        assert!(files_in(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_receive_unusable_name_is_protocol_error() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let wire = header_bytes("../..", 0, &md5_hex(b""));

        let (outcome, _, reply) = run(temp_dir.path(), &wire).await;

        assert_eq!(outcome.expect("outcome").status, TransferStatus::ProtocolError);
        assert_eq!(reply, "File transfer failed: Malformed header");
        assert!(files_in(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_receive_path_traversal_stays_in_save_dir() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let save_dir = temp_dir.path().join("received");
        std::fs::create_dir_all(&save_dir).expect("create save dir");

        let mut wire = header_bytes("../../evil.txt", 3, &md5_hex(b"bad"));
        wire.extend_from_slice(b"bad");

        let (outcome, _, _) = run(&save_dir, &wire).await;
        let stored = outcome.expect("outcome").stored_path.expect("stored");

        assert_eq!(stored.parent(), Some(save_dir.as_path()));
        assert!(stored.to_string_lossy().ends_with("_evil.txt"));
        assert!(!temp_dir.path().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn test_receive_empty_connection() {
        let temp_dir = TempDir::new().expect("create temp dir");

        let (outcome, history, reply) = run(temp_dir.path(), b"").await;

        assert!(outcome.is_none());
        assert_eq!(history, vec![ReceiverState::AwaitingHeader]);
        assert!(reply.is_empty(), "no reply for an abandoned connection");
        assert!(files_in(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_receive_zero_size_file() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let wire = header_bytes("empty.txt", 0, &md5_hex(b""));

        let (outcome, _, reply) = run(temp_dir.path(), &wire).await;
        let outcome = outcome.expect("outcome");

        assert!(outcome.is_success());
        assert_eq!(outcome.bytes_written, 0);
        assert_eq!(reply, "File received successfully - MD5 verified");
        let stored = outcome.stored_path.expect("stored");
        assert_eq!(std::fs::metadata(stored).expect("metadata").len(), 0);
    }

    #[tokio::test]
    async fn test_receive_stops_at_declared_size() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut wire = header_bytes("abc.txt", 3, &md5_hex(b"ABC"));
        wire.extend_from_slice(b"ABCDE");

        let (outcome, _, _) = run(temp_dir.path(), &wire).await;
        let outcome = outcome.expect("outcome");

        assert!(outcome.is_success());
        assert_eq!(outcome.bytes_written, 3);
        assert_eq!(
            std::fs::read(outcome.stored_path.expect("stored")).expect("read"),
            b"ABC"
        );
    }

    #[tokio::test]
    #[allow(clippy::cast_possible_truncation)]
    async fn test_receive_multi_chunk_body() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let body: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
        let mut wire = header_bytes("data.bin", body.len() as u64, &md5_hex(&body));
        wire.extend_from_slice(&body);

        let (outcome, _, _) = run(temp_dir.path(), &wire).await;
        let outcome = outcome.expect("outcome");

        assert!(outcome.is_success());
        assert_eq!(outcome.bytes_written, body.len() as u64);
        assert_eq!(
            std::fs::read(outcome.stored_path.expect("stored")).expect("read"),
            body
        );
    }

    #[tokio::test]
    async fn test_receive_header_timeout() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config = Arc::new(ServerConfig {
            save_dir: temp_dir.path().to_path_buf(),
            header_timeout: Duration::from_millis(50),
            ..Default::default()
        });

        let (_client, mut server) = tokio::io::duplex(1024);
        let mut receiver = FileReceiver::new(config, peer());
        let result = receiver.receive(&mut server).await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(receiver.state(), ReceiverState::AwaitingHeader);
    }

    #[tokio::test]
    async fn test_receive_reports_progress() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let (mut client, mut server) = tokio::io::duplex(1 << 16);
        let mut wire = header_bytes("p.txt", 4, &md5_hex(b"data"));
        wire.extend_from_slice(b"data");
        client.write_all(&wire).await.expect("write");
        client.shutdown().await.expect("shutdown");

        let mut receiver = FileReceiver::new(test_config(temp_dir.path()), peer());
        let progress = receiver.progress();
        receiver.receive(&mut server).await.expect("receive");

        let latest = progress.borrow().clone();
        assert_eq!(latest.bytes_transferred, 4);
        assert_eq!(latest.total_bytes, 4);
        assert_eq!(latest.state, TransferState::Completed);
        assert!(latest.file_name.ends_with("_p.txt"));
    }

    #[tokio::test]
    async fn test_receive_stalled_body_is_incomplete() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config = Arc::new(ServerConfig {
            save_dir: temp_dir.path().to_path_buf(),
            header_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_millis(100),
            ..Default::default()
        });

        let (mut client, mut server) = tokio::io::duplex(1 << 16);
        let mut wire = header_bytes("stall.bin", 10, &md5_hex(b"0123456789"));
        wire.extend_from_slice(b"0123");
        client.write_all(&wire).await.expect("write");

        let mut receiver = FileReceiver::new(config, peer());
        let outcome = receiver
            .receive(&mut server)
            .await
            .expect("a stalled body still gets an outcome")
            .expect("outcome");
        drop(server);

        assert_eq!(outcome.status, TransferStatus::IncompleteTransfer);
        assert_eq!(outcome.bytes_written, 4);
        assert!(!receiver.history().contains(&ReceiverState::Verifying));
        assert_eq!(
            receiver.state(),
            ReceiverState::Failed(TransferStatus::IncompleteTransfer)
        );
        assert_eq!(
            std::fs::read(outcome.stored_path.expect("partial file is kept")).expect("read"),
            b"0123"
        );

        let mut reply = String::new();
        client.read_to_string(&mut reply).await.expect("read reply");
        assert_eq!(reply, "File transfer failed: Incomplete transfer");
    }

    #[tokio::test]
    async fn test_handle_connection_closes_stream() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let (mut client, server) = tokio::io::duplex(1 << 16);
        let mut wire = header_bytes("h.txt", 2, &md5_hex(b"hi"));
        wire.extend_from_slice(b"hi");
        client.write_all(&wire).await.expect("write");

        let outcome = handle_connection(server, peer(), test_config(temp_dir.path()), None)
            .await
            .expect("no transport error");
        assert!(outcome.expect("outcome").is_success());

        let mut reply = String::new();
        client.read_to_string(&mut reply).await.expect("read until close");
        assert_eq!(reply, "File received successfully - MD5 verified");
    }

    #[tokio::test]
    async fn test_handle_connection_empty_connection() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let (mut client, server) = tokio::io::duplex(64);
        client.shutdown().await.expect("shutdown");

        let result = handle_connection(server, peer(), test_config(temp_dir.path()), None).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_handle_connection_reports_transport_errors() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config = Arc::new(ServerConfig {
            save_dir: temp_dir.path().to_path_buf(),
            header_timeout: Duration::from_millis(20),
            ..Default::default()
        });

        let (_client, server) = tokio::io::duplex(64);
        let result = handle_connection(server, peer(), config, None).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_handle_connection_forwards_progress() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let (events, mut rx) = broadcast::channel(64);
        let (mut client, server) = tokio::io::duplex(1 << 16);
        let body = vec![7u8; 10_000];
        let mut wire = header_bytes("watched.bin", body.len() as u64, &md5_hex(&body));
        wire.extend_from_slice(&body);
        client.write_all(&wire).await.expect("write");

        handle_connection(server, peer(), test_config(temp_dir.path()), Some(events))
            .await
            .expect("no transport error")
            .expect("outcome");

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.peer, peer());
            last = Some(event.progress);
        }
        let last = last.expect("at least one progress event");
        assert_eq!(last.state, TransferState::Completed);
        assert_eq!(last.bytes_transferred, body.len() as u64);
        assert!(last.file_name.ends_with("_watched.bin"));
    }
}
