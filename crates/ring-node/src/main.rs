//! ring-node: One member of a ping/pong token ring.
//!
//! Listens for its predecessor, forwards tokens to its successor, and runs
//! until Ctrl+C / SIGTERM (exit 0) or until it can no longer forward tokens
//! (exit 1).

use anyhow::{Context, Result};
use clap::Parser;
use ring_core::ProtocolEvent;
use ring_node::{Node, NodeArgs, NodeConfig};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Wait for Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Log every protocol event as JSON at debug level until the engine is gone.
async fn log_events(mut events: broadcast::Receiver<ProtocolEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => debug!(target: "ring_node::events", "{}", json),
                Err(e) => warn!("Failed to serialize event {:?}: {}", event, e),
            },
            Err(RecvError::Lagged(skipped)) => {
                debug!(target: "ring_node::events", "Skipped {} events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = NodeArgs::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,ring_node=debug,ring_core=debug"
    } else {
        "info,ring_node=info,ring_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = NodeConfig::from_args(&args).context("Invalid configuration")?;

    info!("Starting ring-node");
    info!("Listen port: {}", config.listen_port);
    info!("Successor: {}", config.successor_address());
    info!(
        "Loss: {}% of {} tokens",
        config.loss.percent(),
        config.loss.scope()
    );

    let node = Node::new(config);
    let listener = node.bind().await?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }
    tokio::spawn(log_events(node.engine().subscribe()));

    let result = node.run(listener, shutdown).await;
    drop(node);

    info!("Shutting down");
    result?;
    Ok(())
}
