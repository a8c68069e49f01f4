//! # Filedrop Core Library
//!
//! `filedrop-core` provides the pieces of filedrop, a single-file upload
//! service over plain TCP with an MD5 integrity check.
//!
//! ## Features
//!
//! - **Simple wire format**: one textual header, raw body bytes, one reply
//! - **Integrity check**: MD5 over the body, compared against the header
//! - **Concurrent receiver**: one task per connection, bounded pool
//! - **Deadlines everywhere**: connect, read, write and reply timeouts
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`digest`] - Incremental MD5 digest engine
//! - [`mod@file`] - Storage naming, sanitization and size formatting
//! - [`progress`] - Transfer progress snapshots
//! - [`protocol`] - Header and reply wire format
//! - [`receiver`] - Per-connection receiver state machine
//! - [`sender`] - File sender client
//! - [`server`] - Listening service dispatching connections to receivers
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::path::Path;
//!
//! use filedrop_core::config::{SenderConfig, ServerConfig};
//! use filedrop_core::sender::send_file;
//! use filedrop_core::server::ReceiverService;
//!
//! let service = ReceiverService::bind(ServerConfig::default()).await?;
//! tokio::spawn(service.run_until(tokio::signal::ctrl_c()));
//!
//! let report = send_file(Path::new("notes.txt"), "127.0.0.1", SenderConfig::default()).await?;
//! println!("Server response: {}", report.reply_text);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod digest;
pub mod error;
pub mod file;
pub mod progress;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod server;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listen address for the receiver (all interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default receiver port (TCP)
pub const DEFAULT_PORT: u16 = 5001;

/// Default directory received files are saved to
pub const DEFAULT_SAVE_DIRECTORY: &str = "received_files";

/// Default chunk size for reading and sending file bodies (4 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default number of connections the receiver handles at once
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

/// Listen backlog for the receiver socket
pub const DEFAULT_BACKLOG: i32 = 5;
