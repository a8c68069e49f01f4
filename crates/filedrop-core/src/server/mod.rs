//! Listening service.
//!
//! [`ReceiverService`] owns the listening socket and hands every accepted
//! connection to [`handle_connection`] in its own task. A semaphore bounds
//! how many connections are served at once; while the pool is full new
//! connections wait in the listen backlog. With `max_connections = 1`
//! connections are served strictly one after another.
//!
//! Per-connection progress is published on a broadcast channel
//! ([`ReceiverService::subscribe_progress`]); the service runs the same with
//! or without subscribers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::file::ensure_save_directory;
use crate::progress::PeerProgress;
use crate::receiver::{handle_connection, TransferOutcome};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Buffered progress events per subscriber before it starts lagging.
const PROGRESS_CAPACITY: usize = 256;

/// Totals reported when the service stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceSummary {
    /// Connections accepted
    pub connections: u64,
    /// Transfers that verified
    pub succeeded: u64,
    /// Transfers that ended with a failure reply, or connections that ended
    /// on a transport or filesystem error
    pub failed: u64,
}

impl ServiceSummary {
    /// Count one finished connection. A connection that closed without
    /// sending anything counts as neither success nor failure.
    fn record(&mut self, result: &Result<Option<TransferOutcome>>) {
        match result {
            Ok(Some(outcome)) if outcome.is_success() => self.succeeded += 1,
            Ok(Some(_)) | Err(_) => self.failed += 1,
            Ok(None) => {}
        }
    }
}

/// The receiver service.
#[derive(Debug)]
pub struct ReceiverService {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    local_addr: SocketAddr,
    events: broadcast::Sender<PeerProgress>,
}

impl ReceiverService {
    /// Create the save directory and start listening.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` for an unusable host, `Error::Filesystem`
    /// if the save directory cannot be created, or the socket error if the
    /// address cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = config.listen_addr()?;
        ensure_save_directory(&config.save_dir).await?;

        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };
        let socket = socket2::Socket::new(
            domain,
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(config.backlog.max(1))?;
        socket.set_nonblocking(true)?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Server started - listening on {local_addr}");
        tracing::info!("Files will be saved to: {}", config.save_dir.display());

        let (events, _) = broadcast::channel(PROGRESS_CAPACITY);

        Ok(Self {
            listener,
            config: Arc::new(config),
            local_addr,
            events,
        })
    }

    /// The address actually bound (resolves port `0`).
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The configuration the service runs with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Receive progress events from every connection served from now on.
    ///
    /// The channel closes once [`run_until`](Self::run_until) has returned.
    #[must_use]
    pub fn subscribe_progress(&self) -> broadcast::Receiver<PeerProgress> {
        self.events.subscribe()
    }

    /// Serve connections until `shutdown` resolves.
    ///
    /// On shutdown the listening socket is closed first, then transfers in
    /// flight are allowed to finish.
    ///
    /// # Errors
    ///
    /// Currently never fails; individual connection failures are logged and
    /// counted in the summary.
    pub async fn run_until<F>(self, shutdown: F) -> Result<ServiceSummary>
    where
        F: Future,
    {
        let Self {
            listener,
            config,
            local_addr,
            events,
        } = self;
        let limit = Arc::new(Semaphore::new(config.max_connections.max(1)));
        let mut tasks = JoinSet::new();
        let mut summary = ServiceSummary::default();

        tokio::pin!(shutdown);

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!("Accept failed: {e}");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            tracing::info!("Connection from {peer}");
            summary.connections += 1;

            let config = Arc::clone(&config);
            let events = events.clone();
            tasks.spawn(async move {
                let _permit = permit;
                handle_connection(stream, peer, config, Some(events)).await
            });

            while let Some(joined) = tasks.try_join_next() {
                collect(&mut summary, joined);
            }
        }

        drop(listener);
        tracing::info!("Shutting down {local_addr}, waiting for {} transfer(s)", tasks.len());

        while let Some(joined) = tasks.join_next().await {
            collect(&mut summary, joined);
        }

        tracing::info!(
            "Server stopped ({} connections, {} succeeded, {} failed)",
            summary.connections,
            summary.succeeded,
            summary.failed
        );
        drop(events);
        Ok(summary)
    }
}

fn collect(
    summary: &mut ServiceSummary,
    joined: std::result::Result<Result<Option<TransferOutcome>>, tokio::task::JoinError>,
) {
    match joined {
        Ok(result) => summary.record(&result),
        Err(e) => {
            summary.failed += 1;
            tracing::error!("Connection task failed: {e}");
        }
    }
}
