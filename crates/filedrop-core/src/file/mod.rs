//! Storage naming for received files.
//!
//! This module handles:
//! - Reducing a declared file name to its final path component
//! - Timestamped destination names (`<YYYYMMDD_HHMMSS>_<name>`)
//! - Collision-free creation of the destination file
//! - Save directory creation
//!
//! Names are never content-addressed and nothing is deduplicated; the
//! directory listing is the only inventory of received files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::{File, OpenOptions};

use crate::error::{Error, Result};

/// Timestamp format used as the destination name prefix.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Upper bound on numeric suffixes tried when a destination name is taken.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// A destination file created under the save directory.
#[derive(Debug)]
pub struct StoredFile {
    /// Full path of the created file
    pub path: PathBuf,
    /// File name within the save directory
    pub file_name: String,
}

impl StoredFile {
    /// Create the destination for `declared_name` under `save_dir`.
    ///
    /// The name is sanitized and prefixed with `captured_at`. If another
    /// transfer already owns that name a `_<n>` suffix is inserted before
    /// the extension. The file is opened with create-new semantics, so two
    /// concurrent transfers can never write to the same file.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPath` if the name has no usable final
    /// component, or `Error::Filesystem` if the file cannot be created.
    pub async fn create(
        save_dir: &Path,
        declared_name: &str,
        captured_at: DateTime<Local>,
    ) -> Result<(Self, File)> {
        let base = sanitize_file_name(declared_name)
            .ok_or_else(|| Error::InvalidPath(declared_name.to_string()))?;
        let stem = storage_name(captured_at, &base);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let file_name = if attempt == 0 {
                stem.clone()
            } else {
                storage_name(captured_at, &with_suffix(&base, attempt))
            };
            let path = save_dir.join(&file_name);

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((Self { path, file_name }, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::debug!("Destination {} taken, trying next suffix", path.display());
                }
                Err(e) => return Err(Error::filesystem(path, e)),
            }
        }

        Err(Error::filesystem(
            save_dir.join(&stem),
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "no free destination name",
            ),
        ))
    }
}

/// Reduce a declared file name to its final path component.
///
/// Both `/` and `\` count as separators regardless of platform, since the
/// name comes from a remote peer. Returns `None` if nothing usable is left
/// (empty, `.` or `..`).
#[must_use]
pub fn sanitize_file_name(declared: &str) -> Option<String> {
    let last = declared
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim_matches('\0');

    match last {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// Build the timestamped destination name for an already sanitized name.
#[must_use]
pub fn storage_name(captured_at: DateTime<Local>, sanitized: &str) -> String {
    format!("{}_{sanitized}", captured_at.format(TIMESTAMP_FORMAT))
}

/// Insert `_n` before the extension of a sanitized name. A leading dot is
/// part of the name, not an extension.
fn with_suffix(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{n}{}", &name[..dot], &name[dot..]),
        _ => format!("{name}_{n}"),
    }
}

/// Create the save directory if it doesn't exist.
///
/// # Errors
///
/// Returns `Error::Filesystem` if the directory cannot be created.
pub async fn ensure_save_directory(dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::filesystem(dir, e))?;
    tracing::info!("Created directory: {}", dir.display());
    Ok(())
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
