//! ring-core: Self-stabilizing mutual exclusion for a unidirectional ring.
//!
//! Two tokens circulate the ring, a positive ping and a negative pong. A node
//! is in its critical section only while it holds both. Lost tokens are
//! detected with a last-sent marker and regenerated from the survivor.
//!
//! This crate provides:
//! - Token values and their line framing
//! - The per-node state machine (staleness, incarnation, regeneration)
//! - A shared queue feeding the ping and pong branches
//! - Simulated message loss
//! - The async protocol engine over a `TokenTransport`

pub mod engine;
pub mod events;
pub mod loss;
pub mod queue;
pub mod state;
pub mod token;
pub mod transport;

pub use engine::{EngineConfig, EngineError, ProtocolEngine};
pub use events::ProtocolEvent;
pub use loss::{LossPolicy, LossPolicyError, LossScope};
pub use queue::TokenQueue;
pub use state::{NodeState, Reception};
pub use token::{FrameError, Token, TokenKind, encode_frame, parse_frame};
pub use transport::{TokenTransport, TransportError};
