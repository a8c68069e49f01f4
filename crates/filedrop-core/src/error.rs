//! Error types for filedrop.
//!
//! This module provides a unified error type for all filedrop operations,
//! with specific error variants for different failure modes.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A specialized `Result` type for filedrop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for filedrop.
#[derive(Error, Debug)]
pub enum Error {
    /// Header missing, malformed or unparsable (E001)
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// Encoded header does not fit in the receiver's single read (E002)
    #[error("header is {size} bytes, receiver reads at most {limit}")]
    HeaderTooLarge {
        /// Encoded header length
        size: usize,
        /// Receive buffer capacity
        limit: usize,
    },

    /// Transport closed before the declared size was reached (E003)
    #[error("incomplete transfer: received {received} of {expected} bytes")]
    IncompleteTransfer {
        /// Bytes received before the close
        received: u64,
        /// Size declared in the header
        expected: u64,
    },

    /// Body digest disagrees with the declared digest (E004)
    #[error("MD5 mismatch: expected {expected}, computed {computed}")]
    DigestMismatch {
        /// Digest declared in the header
        expected: String,
        /// Digest computed over the received body
        computed: String,
    },

    /// Peer closed the connection without sending anything (E005)
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Operation timeout (E006)
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Save directory or destination file could not be created or written (E007)
    #[error("filesystem error on '{}': {source}", path.display())]
    Filesystem {
        /// Path being created or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Source file not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::MalformedHeader(_) => Some("E001"),
            Self::HeaderTooLarge { .. } => Some("E002"),
            Self::IncompleteTransfer { .. } => Some("E003"),
            Self::DigestMismatch { .. } => Some("E004"),
            Self::ConnectionClosed => Some("E005"),
            Self::Timeout(_) => Some("E006"),
            Self::Filesystem { .. } => Some("E007"),
            _ => None,
        }
    }

    /// Returns whether this error came from the transport (socket or deadline).
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout(_) | Self::ConnectionClosed
        )
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::HeaderTooLarge { .. } => {
                Some("Rename the file to something shorter and send it again.")
            }
            Self::Timeout(_) => Some(
                "Check that the receiver is running and reachable.\n\
                 Timeouts can be raised in the [sender] section of the config file.",
            ),
            Self::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                Some("Nothing is listening on that port. Start it with: filedrop serve")
            }
            _ => None,
        }
    }
}
