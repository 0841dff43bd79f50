//! Simulated message loss for fault injection.
//!
//! A `LossPolicy` decides, per outgoing token, whether the transport should
//! silently discard it. Which token kinds are eligible is explicit in
//! `LossScope` rather than hard-wired to one kind.

use crate::token::{Token, TokenKind};
use rand::Rng;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LossPolicyError {
    #[error("Loss probability must be within 0..=100, got {0}")]
    OutOfRange(f64),

    #[error("Unknown loss scope {0:?}: expected ping, pong or both")]
    UnknownScope(String),
}

/// Which token kinds may be dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LossScope {
    /// Only ping sends are dropped; non-positive values always go through.
    #[default]
    Ping,
    Pong,
    Both,
}

impl LossScope {
    pub fn covers(self, kind: TokenKind) -> bool {
        matches!(
            (self, kind),
            (Self::Both, _) | (Self::Ping, TokenKind::Ping) | (Self::Pong, TokenKind::Pong)
        )
    }
}

impl Display for LossScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping => f.write_str("ping"),
            Self::Pong => f.write_str("pong"),
            Self::Both => f.write_str("both"),
        }
    }
}

impl FromStr for LossScope {
    type Err = LossPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ping" => Ok(Self::Ping),
            "pong" => Ok(Self::Pong),
            "both" => Ok(Self::Both),
            _ => Err(LossPolicyError::UnknownScope(s.to_string())),
        }
    }
}

/// Probability (in percent) of dropping an eligible send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossPolicy {
    percent: f64,
    scope: LossScope,
}

impl Default for LossPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl LossPolicy {
    pub fn new(percent: f64, scope: LossScope) -> Result<Self, LossPolicyError> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(LossPolicyError::OutOfRange(percent));
        }
        Ok(Self { percent, scope })
    }

    /// A policy that never drops anything.
    pub fn none() -> Self {
        Self {
            percent: 0.0,
            scope: LossScope::Ping,
        }
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    pub fn scope(&self) -> LossScope {
        self.scope
    }

    /// Whether `token` may be dropped at all. The zero sentinel never is.
    pub fn is_eligible(&self, token: Token) -> bool {
        !token.is_sentinel() && self.scope.covers(token.kind())
    }

    /// Roll the dice for one send.
    pub fn should_drop<R: Rng + ?Sized>(&self, token: Token, rng: &mut R) -> bool {
        if self.percent <= 0.0 || !self.is_eligible(token) {
            return false;
        }
        rng.random_range(0.0..100.0) < self.percent
    }
}
