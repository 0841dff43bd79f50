//! Per-node protocol state and its transitions.
//!
//! `NodeState` is plain data with synchronous transitions. The engine keeps it
//! behind a single lock and calls `receive` / `mark_sent` while holding it, so
//! every read-modify-write on the five fields is atomic with respect to other
//! branch executions.

use crate::token::{Token, TokenKind};
use serde::Serialize;

/// Outcome of feeding one inbound token to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// Magnitude below the marker; nothing changed.
    Stale { marker: Token },
    /// Token adopted.
    Accepted {
        /// Both tokens were held together and the magnitude advanced.
        incarnated: bool,
        /// The companion token was presumed lost and must be resent now.
        regenerate: Option<TokenKind>,
    },
}

/// Ping/pong values, the last-sent marker, and the holding flags of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub ping: Token,
    pub pong: Token,
    pub last_sent: Token,
    pub has_ping: bool,
    pub has_pong: bool,
}

impl Default for NodeState {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeState {
    pub fn new() -> Self {
        Self {
            ping: Token::ping(1),
            pong: Token::pong(1),
            last_sent: Token::SENTINEL,
            has_ping: false,
            has_pong: false,
        }
    }

    /// Current value of the token of `kind`.
    pub fn current(&self, kind: TokenKind) -> Token {
        match kind {
            TokenKind::Ping => self.ping,
            TokenKind::Pong => self.pong,
        }
    }

    /// Whether the node is holding a fresh token of `kind`.
    pub fn holds(&self, kind: TokenKind) -> bool {
        match kind {
            TokenKind::Ping => self.has_ping,
            TokenKind::Pong => self.has_pong,
        }
    }

    /// Magnitude shared by both tokens.
    pub fn magnitude(&self) -> u64 {
        self.ping.magnitude()
    }

    fn set_magnitude(&mut self, magnitude: u64) {
        self.ping = Token::ping(magnitude);
        self.pong = Token::pong(magnitude);
    }

    fn set_holding(&mut self, kind: TokenKind, holding: bool) {
        match kind {
            TokenKind::Ping => self.has_ping = holding,
            TokenKind::Pong => self.has_pong = holding,
        }
    }

    /// Adopt an inbound token, incarnating or regenerating as needed.
    ///
    /// The token's kind decides the branch. Adopting a token also aligns the
    /// companion to the same magnitude so `ping == -pong` holds on return.
    /// The sentinel carries no magnitude and leaves both values as they are.
    pub fn receive(&mut self, token: Token) -> Reception {
        if token.is_stale_against(self.last_sent) {
            return Reception::Stale {
                marker: self.last_sent,
            };
        }

        let kind = token.kind();
        let companion = kind.companion();

        self.set_holding(kind, true);
        if !token.is_sentinel() {
            self.set_magnitude(token.magnitude());
        }

        let incarnated = self.has_ping && self.has_pong;
        if incarnated {
            self.set_magnitude(self.magnitude().saturating_add(1));
        }

        // Our own token came back while its companion is not here: the
        // companion was lost somewhere in the ring.
        let regenerate = if token == self.last_sent
            && !self.last_sent.is_sentinel()
            && !self.holds(companion)
        {
            self.set_magnitude(token.magnitude());
            Some(companion)
        } else {
            None
        };

        Reception::Accepted {
            incarnated,
            regenerate,
        }
    }

    /// Record that the token of `kind` is about to be forwarded.
    ///
    /// Clears the holding flag, moves the marker, and returns the value to send.
    pub fn mark_sent(&mut self, kind: TokenKind) -> Token {
        let token = self.current(kind);
        self.set_holding(kind, false);
        self.last_sent = token;
        token
    }
}
