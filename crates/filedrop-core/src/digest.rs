//! Incremental MD5 digest engine.
//!
//! MD5 is used here only to catch accidental corruption in transit. It is
//! not collision resistant: a peer that wants a corrupted body to verify can
//! craft one. Do not treat a matching digest as proof of authenticity.

use std::fmt::Write as _;
use std::path::Path;

use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};

/// Length of a hex-encoded MD5 digest.
pub const DIGEST_HEX_LEN: usize = 32;

/// Running MD5 state over a byte stream.
///
/// `finalize` consumes the engine, so each accumulator produces exactly one
/// digest. Create a fresh one per transfer.
#[derive(Debug, Clone, Default)]
pub struct Md5Digest {
    hasher: Md5,
    bytes: u64,
}

impl Md5Digest {
    /// Create an empty digest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of any length, including zero.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Number of bytes fed so far.
    #[must_use]
    pub const fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Finish the stream and return the lowercase hex digest.
    #[must_use]
    pub fn finalize(self) -> String {
        to_hex(&self.hasher.finalize())
    }
}

/// Hash a byte slice in one call.
#[must_use]
pub fn md5_hex(data: &[u8]) -> String {
    to_hex(&Md5::digest(data))
}

/// Hash a whole file, reading it from the start in `chunk_size` pieces.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub async fn digest_file(path: &Path, chunk_size: usize) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::FileNotFound(path.display().to_string())
        } else {
            Error::filesystem(path, e)
        }
    })?;

    let mut digest = Md5Digest::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| Error::filesystem(path, e))?;
        if n == 0 {
            break;
        }
        digest.update(&buffer[..n]);
    }

    Ok(digest.finalize())
}

/// Check that `s` is exactly 32 lowercase hex characters.
#[must_use]
pub fn is_valid_digest(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN
        && s
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(DIGEST_HEX_LEN), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}
