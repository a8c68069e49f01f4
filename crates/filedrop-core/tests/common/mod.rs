//! Common test utilities for filedrop integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use filedrop_core::config::{SenderConfig, ServerConfig};
use filedrop_core::server::{ReceiverService, ServiceSummary};

/// A receiver service running on a loopback port.
pub struct TestService {
    /// Bound address
    pub addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<filedrop_core::Result<ServiceSummary>>,
}

impl TestService {
    /// Start a service saving into `save_dir`.
    pub async fn start(save_dir: &Path, max_connections: usize) -> Self {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            save_dir: save_dir.to_path_buf(),
            max_connections,
            header_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let service = ReceiverService::bind(config)
            .await
            .expect("Failed to bind receiver service");
        let addr = service.local_addr();

        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(service.run_until(stop_rx));

        Self { addr, stop, handle }
    }

    /// Sender settings pointing at this service.
    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            port: self.addr.port(),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Stop the service and wait for in-flight transfers.
    pub async fn stop(self) -> ServiceSummary {
        let _ = self.stop.send(());
        self.handle
            .await
            .expect("Service task panicked")
            .expect("Service failed")
    }
}

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// Files in the save directory, sorted by name.
pub fn received_files(save_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(save_dir)
        .expect("Failed to list save directory")
        .map(|entry| entry.expect("Failed to read entry").path())
        .collect();
    files.sort();
    files
}

/// Whether `name` looks like `<YYYYMMDD_HHMMSS>_<suffix>`.
pub fn is_timestamped(name: &str, suffix: &str) -> bool {
    let Some(rest) = name.strip_suffix(suffix) else {
        return false;
    };
    let Some(stamp) = rest.strip_suffix('_') else {
        return false;
    };
    stamp.len() == 15
        && stamp.char_indices().all(|(i, c)| {
            if i == 8 {
                c == '_'
            } else {
                c.is_ascii_digit()
            }
        })
}
