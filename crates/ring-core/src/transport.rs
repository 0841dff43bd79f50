//! TokenTransport trait: how the engine reaches its successor.
//!
//! Implementations:
//! - TCP ring link (ring-node)
//! - In-memory recorders in tests

use crate::token::Token;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection to successor failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Outbound half of a ring node: one successor, one token at a time.
#[async_trait]
pub trait TokenTransport: Send + Sync {
    /// Deliver a token to the successor.
    ///
    /// A token discarded by simulated loss still reports success.
    async fn send(&self, token: Token) -> Result<()>;

    /// Close the outbound connection. Safe to call more than once.
    async fn close(&self);
}
