//! File sender.
//!
//! Sending is two passes over the source file: the first computes the MD5
//! digest that goes into the header, the second streams the body. The
//! receiver's verdict is read back with one bounded read and returned as-is.

use std::path::Path;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::config::SenderConfig;
use crate::digest::digest_file;
use crate::error::{Error, Result};
use crate::file::format_size;
use crate::progress::{ProgressTracker, TransferProgress, TransferState};
use crate::protocol::{
    read_with_timeout, write_all_with_timeout, Reply, TransferHeader, REPLY_BUFFER_SIZE,
};

/// What happened to one sent file.
#[derive(Debug, Clone)]
pub struct SendReport {
    /// Name sent in the header
    pub file_name: String,
    /// Body bytes written to the socket
    pub bytes_sent: u64,
    /// Digest sent in the header
    pub digest: String,
    /// Reply text exactly as received
    pub reply_text: String,
    /// Classified reply
    pub reply: Reply,
    /// Time from connect to reply
    pub elapsed: Duration,
}

impl SendReport {
    /// Whether the receiver reported a verified transfer.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.reply.is_success()
    }
}

/// A file that passed the first pass and is ready to go on the wire.
#[derive(Debug)]
struct PreparedFile {
    header: TransferHeader,
    encoded_header: Vec<u8>,
    chunk_size: usize,
}

/// Build the header and check it fits the receiver's single header read.
fn encode_header(
    file_name: String,
    size: u64,
    digest: String,
) -> Result<(TransferHeader, Vec<u8>)> {
    let header = TransferHeader::new(file_name, size, digest);
    let encoded = header.encode_checked()?;
    Ok((header, encoded))
}

/// Sends files to a receiver.
#[derive(Debug)]
pub struct FileSender {
    config: SenderConfig,
    progress: ProgressTracker,
}

impl FileSender {
    /// Create a sender.
    #[must_use]
    pub fn new(config: SenderConfig) -> Self {
        Self {
            config,
            progress: ProgressTracker::new("", 0),
        }
    }

    /// Get a progress receiver.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress.subscribe()
    }

    /// Send `path` to the receiver at `host` on the configured port.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileNotFound` if the file doesn't exist, and transport
    /// errors (connect failure, timeouts, `Error::ConnectionClosed` if the
    /// receiver closed without replying). A failure *reply* is not an error;
    /// inspect [`SendReport::reply`].
    pub async fn send(&self, path: &Path, host: &str) -> Result<SendReport> {
        let result = self.send_inner(path, host).await;
        if result.is_err() {
            self.progress.set_state(TransferState::Failed);
        }
        result
    }

    async fn send_inner(&self, path: &Path, host: &str) -> Result<SendReport> {
        let prepared = self.prepare(path).await?;

        self.progress.set_state(TransferState::Connecting);
        let port = self.config.port;
        tracing::info!("Connecting to {host}:{port}");
        let mut stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((host, port)),
        )
        .await
        .map_err(|_| Error::Timeout(self.config.connect_timeout))??;
        tracing::info!("Connected to {}", stream.peer_addr()?);

        self.send_over(&mut stream, path, &prepared).await
    }

    /// First pass: size, digest and the encoded header. Nothing here touches
    /// the network.
    async fn prepare(&self, path: &Path) -> Result<PreparedFile> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.display().to_string())
            } else {
                Error::filesystem(path, e)
            }
        })?;
        if !metadata.is_file() {
            return Err(Error::InvalidPath(path.display().to_string()));
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;

        self.progress.set_file(&file_name, metadata.len());
        self.progress.set_state(TransferState::Preparing);

        let chunk_size = self.config.chunk_size.max(1);
        let digest = digest_file(path, chunk_size).await?;
        tracing::debug!("MD5 of {}: {}", path.display(), digest);

        let (header, encoded_header) = encode_header(file_name, metadata.len(), digest)?;
        Ok(PreparedFile {
            header,
            encoded_header,
            chunk_size,
        })
    }

    /// Header, second pass, reply.
    async fn send_over<S>(
        &self,
        stream: &mut S,
        path: &Path,
        prepared: &PreparedFile,
    ) -> Result<SendReport>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let header = &prepared.header;
        write_all_with_timeout(stream, &prepared.encoded_header, self.config.io_timeout).await?;

        tracing::info!("Sending file: {} ({})", header.name, format_size(header.size));
        self.progress.set_state(TransferState::Transferring);

        let mut file = File::open(path)
            .await
            .map_err(|e| Error::filesystem(path, e))?;
        let mut buffer = vec![0u8; prepared.chunk_size];
        let mut sent = 0u64;

        while sent < header.size {
            #[allow(clippy::cast_possible_truncation)]
            let want = (header.size - sent).min(buffer.len() as u64) as usize;
            let n = file
                .read(&mut buffer[..want])
                .await
                .map_err(|e| Error::filesystem(path, e))?;
            if n == 0 {
                tracing::warn!(
                    "{} shrank while sending ({} of {} bytes)",
                    path.display(),
                    sent,
                    header.size
                );
                break;
            }
            write_all_with_timeout(stream, &buffer[..n], self.config.io_timeout).await?;
            sent += n as u64;
            self.progress.advance(n);
        }

        self.progress.set_state(TransferState::Verifying);
        tracing::debug!("Body sent, waiting for reply");

        let mut reply_buf = vec![0u8; REPLY_BUFFER_SIZE];
        let n = read_with_timeout(stream, &mut reply_buf, self.config.reply_timeout).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        let _ = stream.shutdown().await;

        let reply_text = String::from_utf8_lossy(&reply_buf[..n]).into_owned();
        let reply = Reply::parse(&reply_text);
        self.progress.set_state(if reply.is_success() {
            TransferState::Completed
        } else {
            TransferState::Failed
        });
        tracing::info!("Server response: {}", reply_text);

        Ok(SendReport {
            file_name: header.name.clone(),
            bytes_sent: sent,
            digest: header.expected_digest.clone(),
            reply_text,
            reply,
            elapsed: started.elapsed(),
        })
    }
}

/// Send one file with a fresh [`FileSender`].
///
/// # Errors
///
/// See [`FileSender::send`].
pub async fn send_file(path: &Path, host: &str, config: SenderConfig) -> Result<SendReport> {
    FileSender::new(config).send(path, host).await
}
