//! Serve command implementation.
//!
//! Runs the receiver service in the foreground until Ctrl-C, printing
//! per-connection progress as it arrives.

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use filedrop_core::config::ServerConfig;
use filedrop_core::progress::PeerProgress;
use filedrop_core::server::ReceiverService;

use super::ServeArgs;

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = server_config(super::load_config().server, args);

    crate::ui::print_banner();

    let service = ReceiverService::bind(config)
        .await
        .context("Failed to start receiver service")?;

    println!("  Listening on {}", service.local_addr());
    println!("  Saving to    {}", service.config().save_dir.display());
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    let renderer = tokio::spawn(display_progress(service.subscribe_progress()));

    let summary = service
        .run_until(tokio::signal::ctrl_c())
        .await
        .context("Receiver service failed")?;
    let _ = renderer.await;

    println!();
    println!(
        "  Stopped. {} connection(s), {} verified, {} failed.",
        summary.connections, summary.succeeded, summary.failed
    );
    println!();
    Ok(())
}

/// Print progress events until the service closes the channel.
async fn display_progress(mut events: broadcast::Receiver<PeerProgress>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = crate::ui::peer_progress_line(&event) {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Progress display skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Apply command-line overrides on top of the loaded configuration.
fn server_config(mut config: ServerConfig, args: ServeArgs) -> ServerConfig {
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(save_dir) = args.save_dir {
        config.save_dir = save_dir;
    }
    if let Some(max_connections) = args.max_connections {
        config.max_connections = max_connections;
    }
    config
}
