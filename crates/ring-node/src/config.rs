//! Command-line and environment configuration for a ring node.

use clap::Parser;
use ring_core::{EngineConfig, LossPolicy, LossPolicyError, LossScope};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Successor host must not be empty")]
    EmptySuccessorHost,

    #[error("Successor port must be nonzero")]
    ZeroSuccessorPort,

    #[error(transparent)]
    Loss(#[from] LossPolicyError),
}

/// Raw command-line arguments. Every flag can also come from a `RING_*`
/// environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "ring-node")]
#[command(about = "Ping/pong token ring node with lost-token regeneration")]
pub struct NodeArgs {
    /// Seed the ring with the initial ping and pong
    #[arg(long, env = "RING_INITIATOR")]
    pub initiator: bool,

    /// Port to listen on for the predecessor
    #[arg(long, env = "RING_NODE_PORT", default_value_t = 8089)]
    pub node_port: u16,

    /// Successor host
    #[arg(long, env = "RING_NEXT_IP", default_value = "127.0.0.1")]
    pub next_ip: String,

    /// Successor port
    #[arg(long, env = "RING_NEXT_PORT", default_value_t = 8090)]
    pub next_port: u16,

    /// Probability (0-100) of dropping an outgoing token
    #[arg(long, env = "RING_PROB", default_value_t = 0.0)]
    pub prob: f64,

    /// Which tokens may be dropped: ping, pong or both
    #[arg(long, env = "RING_LOSS_SCOPE", default_value = "ping")]
    pub loss_scope: LossScope,

    /// Time spent in the critical section per ping, in milliseconds
    #[arg(long, env = "RING_CRITICAL_SECTION_MS", default_value_t = 1000)]
    pub critical_section_ms: u64,

    /// Pause between the initiator's first ping and pong, in milliseconds
    #[arg(long, env = "RING_SEED_DELAY_MS", default_value_t = 100)]
    pub seed_delay_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

/// Validated node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub is_initiator: bool,
    pub listen_port: u16,
    pub successor_host: String,
    pub successor_port: u16,
    pub loss: LossPolicy,
    pub engine: EngineConfig,
}

impl NodeConfig {
    /// Config for a node at `listen_port` forwarding to `successor_host:successor_port`,
    /// with no simulated loss and default timings.
    pub fn new(listen_port: u16, successor_host: impl Into<String>, successor_port: u16) -> Self {
        Self {
            is_initiator: false,
            listen_port,
            successor_host: successor_host.into(),
            successor_port,
            loss: LossPolicy::none(),
            engine: EngineConfig::default(),
        }
    }

    pub fn from_args(args: &NodeArgs) -> Result<Self, ConfigError> {
        let config = Self {
            is_initiator: args.initiator,
            listen_port: args.node_port,
            successor_host: args.next_ip.trim().to_string(),
            successor_port: args.next_port,
            loss: LossPolicy::new(args.prob, args.loss_scope)?,
            engine: EngineConfig {
                critical_section: Duration::from_millis(args.critical_section_ms),
                seed_delay: Duration::from_millis(args.seed_delay_ms),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.successor_host.is_empty() {
            return Err(ConfigError::EmptySuccessorHost);
        }
        if self.successor_port == 0 {
            return Err(ConfigError::ZeroSuccessorPort);
        }
        // Re-check in case the policy was built by hand
        LossPolicy::new(self.loss.percent(), self.loss.scope())?;
        Ok(())
    }

    /// `host:port` of the successor.
    pub fn successor_address(&self) -> String {
        format!("{}:{}", self.successor_host, self.successor_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> NodeArgs {
        NodeArgs::try_parse_from(std::iter::once("ring-node").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_args(&parse(&[])).unwrap();

        assert!(!config.is_initiator);
        assert_eq!(config.listen_port, 8089);
        assert_eq!(config.successor_address(), "127.0.0.1:8090");
        assert_eq!(config.loss.percent(), 0.0);
        assert_eq!(config.loss.scope(), LossScope::Ping);
        assert_eq!(config.engine.critical_section, Duration::from_secs(1));
    }

    #[test]
    fn test_full_flags() {
        let args = parse(&[
            "--initiator",
            "--node-port",
            "9001",
            "--next-ip",
            "10.0.0.2",
            "--next-port",
            "9002",
            "--prob",
            "12.5",
            "--loss-scope",
            "both",
            "--critical-section-ms",
            "50",
        ]);
        let config = NodeConfig::from_args(&args).unwrap();

        assert!(config.is_initiator);
        assert_eq!(config.listen_port, 9001);
        assert_eq!(config.successor_address(), "10.0.0.2:9002");
        assert_eq!(config.loss.percent(), 12.5);
        assert_eq!(config.loss.scope(), LossScope::Both);
        assert_eq!(config.engine.critical_section, Duration::from_millis(50));
    }

    #[test]
    fn test_rejects_empty_host() {
        let args = parse(&["--next-ip", "  "]);
        assert_eq!(
            NodeConfig::from_args(&args).unwrap_err(),
            ConfigError::EmptySuccessorHost
        );
    }

    #[test]
    fn test_rejects_zero_port() {
        let args = parse(&["--next-port", "0"]);
        assert_eq!(
            NodeConfig::from_args(&args).unwrap_err(),
            ConfigError::ZeroSuccessorPort
        );
    }

    #[test]
    fn test_rejects_probability_out_of_range() {
        let args = parse(&["--prob", "150"]);
        assert_eq!(
            NodeConfig::from_args(&args).unwrap_err(),
            ConfigError::Loss(LossPolicyError::OutOfRange(150.0))
        );
    }

    #[test]
    fn test_rejects_unknown_scope() {
        let result = NodeArgs::try_parse_from(["ring-node", "--loss-scope", "sometimes"]);
        assert!(result.is_err());
    }
}
