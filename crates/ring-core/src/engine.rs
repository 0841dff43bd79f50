//! The ping/pong protocol engine.
//!
//! Two branches run side by side, one per token kind. Each inbound token is
//! handled by its own short-lived task so a slow critical section on the ping
//! branch never holds up reception of the next token:
//!
//! 1. Discard the token if it is stale against the last-sent marker
//! 2. Adopt it; incarnate if both tokens are now held
//! 3. Regenerate and resend the companion if our own token came back alone
//! 4. (ping only) occupy the critical section
//! 5. Forward the current token of this kind to the successor
//!
//! Steps 1–3 and the marker update of every send run under one lock.
//! Network I/O and the critical-section delay happen outside it. Sends are
//! additionally serialized so tokens reach the transport in the order their
//! marker updates happened, and the marker always names the last token written.

use crate::events::ProtocolEvent;
use crate::queue::TokenQueue;
use crate::state::{NodeState, Reception};
use crate::token::{Token, TokenKind};
use crate::transport::{TokenTransport, TransportError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{self, broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Capacity of the event broadcast channel. Slow subscribers lag, they never
/// block the engine.
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to send {kind} token {token}: {source}")]
    SendFailed {
        kind: TokenKind,
        token: Token,
        #[source]
        source: TransportError,
    },
}

/// Timing knobs of the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time spent "inside" the critical section on each ping (default: 1s)
    pub critical_section: Duration,
    /// Pause between the initiator's first ping and first pong (default: 100ms)
    pub seed_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            critical_section: Duration::from_secs(1),
            seed_delay: Duration::from_millis(100),
        }
    }
}

/// Protocol engine of one ring node.
pub struct ProtocolEngine<T> {
    config: EngineConfig,
    state: Mutex<NodeState>,
    /// Held from a marker update until its token is written
    send_order: sync::Mutex<()>,
    transport: Arc<T>,
    events: broadcast::Sender<ProtocolEvent>,
}

impl<T: TokenTransport + 'static> ProtocolEngine<T> {
    pub fn new(transport: Arc<T>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            state: Mutex::new(NodeState::new()),
            send_order: sync::Mutex::new(()),
            transport,
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Copy of the current protocol state.
    pub fn snapshot(&self) -> NodeState {
        *self.lock_state()
    }

    /// Subscribe to protocol events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.events.subscribe()
    }

    fn lock_state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ProtocolEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Seed the ring with the first ping and pong (initiator only).
    pub async fn seed(&self) -> Result<(), EngineError> {
        info!("Node is initiator, sending initial tokens");
        self.send(TokenKind::Ping).await?;
        tokio::time::sleep(self.config.seed_delay).await;
        self.send(TokenKind::Pong).await
    }

    /// Run one branch execution for `token`, picking the branch by its kind.
    pub async fn handle(&self, token: Token) -> Result<(), EngineError> {
        match token.kind() {
            TokenKind::Ping => self.handle_ping(token).await,
            TokenKind::Pong => self.handle_pong(token).await,
        }
    }

    /// Ping branch: adopt, maybe regenerate the pong, hold the critical
    /// section, forward the ping.
    pub async fn handle_ping(&self, token: Token) -> Result<(), EngineError> {
        if !self.receive(token).await? {
            return Ok(());
        }
        tokio::time::sleep(self.config.critical_section).await;
        self.send(TokenKind::Ping).await
    }

    /// Pong branch: adopt, maybe regenerate the ping, forward the pong.
    pub async fn handle_pong(&self, token: Token) -> Result<(), EngineError> {
        if !self.receive(token).await? {
            return Ok(());
        }
        self.send(TokenKind::Pong).await
    }

    /// Shared steps 1–3 of both branches. Returns false if the token was stale.
    async fn receive(&self, token: Token) -> Result<bool, EngineError> {
        // A regeneration resend is a send too
        let _order = self.send_order.lock().await;
        let (reception, state, resend) = {
            let mut state = self.lock_state();
            let reception = state.receive(token);
            // Mark the regenerated companion as sent under the same lock
            let resend = match reception {
                Reception::Accepted {
                    regenerate: Some(kind),
                    ..
                } => Some((kind, state.mark_sent(kind))),
                _ => None,
            };
            (reception, *state, resend)
        };

        match reception {
            Reception::Stale { marker } => {
                debug!("Received an old token {} (marker {})", token, marker);
                self.emit(ProtocolEvent::Stale { token, marker });
                return Ok(false);
            }
            Reception::Accepted { incarnated, .. } => {
                if incarnated {
                    info!("Incarnated ping: {}, pong: {}", state.ping, state.pong);
                    self.emit(ProtocolEvent::Incarnated {
                        trigger: token,
                        ping: state.ping,
                        pong: state.pong,
                    });
                }
            }
        }

        if let Some((kind, resent)) = resend {
            info!(
                "Token {} came back alone, regenerating {} at magnitude {}",
                token,
                kind,
                resent.magnitude()
            );
            self.emit(ProtocolEvent::Regenerated {
                survivor: token,
                resent_kind: kind,
                magnitude: resent.magnitude(),
            });
            self.transmit(kind, resent).await?;
        }

        Ok(true)
    }

    /// Forward the current token of `kind` to the successor.
    ///
    /// Clears the holding flag and moves the marker before handing the token
    /// to the transport. On failure the outbound connection is closed.
    pub async fn send(&self, kind: TokenKind) -> Result<(), EngineError> {
        let _order = self.send_order.lock().await;
        let token = self.lock_state().mark_sent(kind);
        self.transmit(kind, token).await
    }

    async fn transmit(&self, kind: TokenKind, token: Token) -> Result<(), EngineError> {
        match self.transport.send(token).await {
            Ok(()) => {
                info!("Token {} sent", token);
                self.emit(ProtocolEvent::Sent { token });
                Ok(())
            }
            Err(source) => {
                error!("Error sending {} token {}: {}", kind, token, source);
                self.transport.close().await;
                Err(EngineError::SendFailed {
                    kind,
                    token,
                    source,
                })
            }
        }
    }

    /// Consume tokens of `kind` from `queue` until `shutdown` is cancelled.
    ///
    /// Each token is handled in its own task. The first send failure is
    /// reported on `fatal`; outstanding tasks are aborted on shutdown.
    pub async fn run_branch(
        self: Arc<Self>,
        kind: TokenKind,
        queue: Arc<TokenQueue>,
        shutdown: CancellationToken,
        fatal: mpsc::UnboundedSender<EngineError>,
    ) {
        let mut tasks = JoinSet::new();
        debug!("{} branch started", kind);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                token = queue.pop_kind(kind) => {
                    let engine = Arc::clone(&self);
                    tasks.spawn(async move { engine.handle(token).await });
                }

                Some(result) = tasks.join_next() => {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            let _ = fatal.send(e);
                        }
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => error!("{} branch task panicked: {}", kind, e),
                    }
                }
            }
        }

        tasks.shutdown().await;
        debug!("{} branch stopped", kind);
    }
}
