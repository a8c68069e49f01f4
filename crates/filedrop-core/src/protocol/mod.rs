//! Filedrop wire protocol.
//!
//! A transfer is one header message, the raw body, and one reply:
//!
//! ```text
//! sender                                             receiver
//!   │ <name><SEPARATOR><size><SEPARATOR><md5 hex>  ──▶  │  single bounded read
//!   │ <size raw bytes, in chunks>                  ──▶  │
//!   │                                     <reply>  ◀──  │  UTF-8 text
//! ```
//!
//! The header has no length prefix and no terminator. The receiver reads it
//! with one read of at most [`HEADER_BUFFER_SIZE`] bytes, so a header longer
//! than that cannot be decoded. Senders check the encoded length up front
//! ([`TransferHeader::encode_checked`]).
//!
//! Because the body follows the header immediately, TCP may deliver the
//! first body bytes in the same read as the header. The digest field has a
//! fixed width, so [`split_header`] can tell where the header ends and hand
//! the remainder to the body.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::digest::{is_valid_digest, DIGEST_HEX_LEN};
use crate::error::{Error, Result};

/// Delimiter between header fields, agreed out of band by both ends.
pub const SEPARATOR: &str = "<SEPARATOR>";

/// Capacity of the receiver's single header read.
pub const HEADER_BUFFER_SIZE: usize = 4096;

/// Capacity of the sender's single reply read.
pub const REPLY_BUFFER_SIZE: usize = 1024;

/// Reply text sent when the body verified.
pub const SUCCESS_REPLY: &str = "File received successfully - MD5 verified";

/// Prefix of every failure reply.
pub const FAILURE_PREFIX: &str = "File transfer failed: ";

/// Metadata sent ahead of the file body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    /// File name as declared by the sender (not yet sanitized)
    pub name: String,
    /// Body length in bytes
    pub size: u64,
    /// Lowercase hex MD5 of the body
    pub expected_digest: String,
}

impl TransferHeader {
    /// Create a header.
    pub fn new(name: impl Into<String>, size: u64, expected_digest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            expected_digest: expected_digest.into(),
        }
    }

    /// Encode the header to its wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.name, self.size, self.expected_digest
        )
        .into_bytes()
    }

    /// Encode the header, refusing one that would not fit the receiver's read.
    ///
    /// # Errors
    ///
    /// Returns `Error::HeaderTooLarge` if the encoded header exceeds
    /// [`HEADER_BUFFER_SIZE`].
    pub fn encode_checked(&self) -> Result<Vec<u8>> {
        let encoded = self.encode();
        if encoded.len() > HEADER_BUFFER_SIZE {
            return Err(Error::HeaderTooLarge {
                size: encoded.len(),
                limit: HEADER_BUFFER_SIZE,
            });
        }
        Ok(encoded)
    }

    /// Decode a header from its wire form.
    ///
    /// The message must split into exactly three fields, the size must be a
    /// non-negative decimal integer and the digest 32 lowercase hex chars.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedHeader` if any of the above does not hold.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(buf)
            .map_err(|_| Error::MalformedHeader("header is not valid UTF-8".to_string()))?;

        let fields: Vec<&str> = text.split(SEPARATOR).collect();
        let [name, size, digest] = fields.as_slice() else {
            return Err(Error::MalformedHeader(format!(
                "expected 3 fields, got {}",
                fields.len()
            )));
        };

        if name.is_empty() {
            return Err(Error::MalformedHeader("empty file name".to_string()));
        }

        if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::MalformedHeader(format!("invalid size: {size:?}")));
        }
        let size: u64 = size
            .parse()
            .map_err(|e| Error::MalformedHeader(format!("invalid size {size:?}: {e}")))?;

        if !is_valid_digest(digest) {
            return Err(Error::MalformedHeader(format!("invalid digest: {digest:?}")));
        }

        Ok(Self {
            name: (*name).to_string(),
            size,
            expected_digest: (*digest).to_string(),
        })
    }
}

/// Split one header read into the header bytes and any body bytes that
/// arrived with it.
///
/// The header ends [`DIGEST_HEX_LEN`] bytes after the second separator. If
/// the buffer is no longer than that, or has fewer than two separators, the
/// whole buffer is returned as the header and decoding decides its fate.
#[must_use]
pub fn split_header(buf: &[u8]) -> (&[u8], &[u8]) {
    let sep = SEPARATOR.as_bytes();

    let Some(first) = find(buf, sep, 0) else {
        return (buf, &[]);
    };
    let Some(second) = find(buf, sep, first + sep.len()) else {
        return (buf, &[]);
    };

    let end = second + sep.len() + DIGEST_HEX_LEN;
    if buf.len() > end {
        buf.split_at(end)
    } else {
        (buf, &[])
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Why a transfer failed, as reported back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Connection closed before the declared size arrived
    IncompleteTransfer,
    /// Full body arrived but the digest disagrees
    DigestMismatch,
    /// Header could not be decoded
    MalformedHeader,
}

impl FailureReason {
    /// The reason string carried in the reply.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IncompleteTransfer => "Incomplete transfer",
            Self::DigestMismatch => "MD5 mismatch",
            Self::MalformedHeader => "Malformed header",
        }
    }

    fn from_reason(reason: &str) -> Option<Self> {
        [
            Self::IncompleteTransfer,
            Self::DigestMismatch,
            Self::MalformedHeader,
        ]
        .into_iter()
        .find(|r| r.as_str() == reason)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The receiver's single reply message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Body stored and verified
    Success,
    /// Transfer failed for a known reason
    Failure(FailureReason),
    /// Text that matches neither shape (kept verbatim)
    Unrecognized(String),
}

impl Reply {
    /// Encode the reply to its wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Classify a reply text received from a receiver.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        if text == SUCCESS_REPLY {
            return Self::Success;
        }
        text.strip_prefix(FAILURE_PREFIX)
            .and_then(FailureReason::from_reason)
            .map_or_else(|| Self::Unrecognized(text.to_string()), Self::Failure)
    }

    /// Whether this reply reports a verified transfer.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str(SUCCESS_REPLY),
            Self::Failure(reason) => write!(f, "{FAILURE_PREFIX}{reason}"),
            Self::Unrecognized(text) => f.write_str(text),
        }
    }
}

/// Perform one read into `buf` with a deadline.
///
/// Returns the number of bytes read; `0` means the peer closed its side.
///
/// # Errors
///
/// Returns `Error::Timeout` if nothing arrives within `duration`, or the
/// underlying I/O error.
pub async fn read_with_timeout<R>(reader: &mut R, buf: &mut [u8], duration: Duration) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let n = timeout(duration, reader.read(buf))
        .await
        .map_err(|_| Error::Timeout(duration))??;
    Ok(n)
}

/// Write the whole buffer with a deadline. A short write is an error.
///
/// # Errors
///
/// Returns `Error::Timeout` if the write does not finish within `duration`,
/// or the underlying I/O error.
pub async fn write_all_with_timeout<W>(writer: &mut W, buf: &[u8], duration: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    timeout(duration, async {
        writer.write_all(buf).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| Error::Timeout(duration))??;
    Ok(())
}
