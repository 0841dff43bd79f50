//! A ring node: link, queue, and engine wired together.
//!
//! `Node::run` owns the node's lifetime. It spawns the accept loop and both
//! branch loops, seeds the ring when configured as initiator, and returns when
//! either the shutdown token fires or the engine reports a send failure. The
//! outbound connection is closed on every exit path.

use crate::config::NodeConfig;
use crate::link::RingLink;
use ring_core::{EngineError, ProtocolEngine, TokenKind, TokenQueue};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Failed to bind listening port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Node can no longer forward tokens: {0}")]
    Fatal(#[from] EngineError),
}

/// One participant of the ring.
pub struct Node {
    config: NodeConfig,
    link: Arc<RingLink>,
    queue: Arc<TokenQueue>,
    engine: Arc<ProtocolEngine<RingLink>>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        let link = Arc::new(RingLink::new(config.successor_address(), config.loss));
        let engine = Arc::new(ProtocolEngine::new(
            Arc::clone(&link),
            config.engine.clone(),
        ));

        Self {
            config,
            link,
            queue: Arc::new(TokenQueue::new()),
            engine,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn link(&self) -> &Arc<RingLink> {
        &self.link
    }

    pub fn queue(&self) -> &Arc<TokenQueue> {
        &self.queue
    }

    pub fn engine(&self) -> &Arc<ProtocolEngine<RingLink>> {
        &self.engine
    }

    /// Bind the configured listening port.
    pub async fn bind(&self) -> Result<TcpListener, NodeError> {
        let port = self.config.listen_port;
        RingLink::bind(port)
            .await
            .map_err(|source| NodeError::Bind { port, source })
    }

    /// Serve the ring on `listener` until `shutdown` fires or a send fails.
    pub async fn run(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), NodeError> {
        let children = shutdown.child_token();
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        tasks.spawn(RingLink::serve(
            listener,
            Arc::clone(&self.queue),
            children.clone(),
        ));
        for kind in [TokenKind::Ping, TokenKind::Pong] {
            tasks.spawn(Arc::clone(&self.engine).run_branch(
                kind,
                Arc::clone(&self.queue),
                children.clone(),
                fatal_tx.clone(),
            ));
        }

        if self.config.is_initiator {
            let engine = Arc::clone(&self.engine);
            let fatal = fatal_tx.clone();
            tasks.spawn(async move {
                if let Err(e) = engine.seed().await {
                    let _ = fatal.send(e);
                }
            });
        }
        drop(fatal_tx);

        info!(
            "Node running on port {} (successor {})",
            self.config.listen_port,
            self.link.successor()
        );

        let result = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown signal received");
                Ok(())
            }
            Some(e) = fatal_rx.recv() => {
                error!("Disconnecting from the ring: {}", e);
                Err(NodeError::Fatal(e))
            }
        };

        children.cancel();
        tasks.shutdown().await;
        self.link.close_connection().await;

        result
    }
}
