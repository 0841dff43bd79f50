//! ring-node library: Exposes the node components for the binary and for
//! integration tests.

pub mod codec;
pub mod config;
pub mod link;
pub mod node;

// Re-export key types for convenience
pub use codec::TokenCodec;
pub use config::{ConfigError, NodeArgs, NodeConfig};
pub use link::RingLink;
pub use node::{Node, NodeError};
