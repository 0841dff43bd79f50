//! Token values and their line framing.
//!
//! A token is a signed integer: the sign selects the kind (positive = ping,
//! zero or negative = pong) and the magnitude is the incarnation number.
//! On the wire each token travels as one line of ASCII decimal text.

use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Malformed frame: {payload:?} is not an integer")]
    NotAnInteger { payload: String },

    #[error("Malformed frame: not valid UTF-8")]
    InvalidUtf8,

    #[error("Malformed frame: longer than {limit} bytes")]
    TooLong { limit: usize },
}

/// Which of the two circulating tokens a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenKind {
    Ping,
    Pong,
}

impl TokenKind {
    /// The other token of the pair.
    pub fn companion(self) -> Self {
        match self {
            Self::Ping => Self::Pong,
            Self::Pong => Self::Ping,
        }
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping => f.write_str("ping"),
            Self::Pong => f.write_str("pong"),
        }
    }
}

/// A token value as it circulates the ring.
///
/// # Examples
/// ```
/// use ring_core::{Token, TokenKind};
///
/// let token: Token = "-3".parse().unwrap();
/// assert_eq!(token.kind(), TokenKind::Pong);
/// assert_eq!(token.magnitude(), 3);
/// assert_eq!(Token::ping(3).value(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Token(i64);

impl Token {
    /// "No token sent yet."
    pub const SENTINEL: Token = Token(0);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Ping token with the given magnitude, saturating at `i64::MAX`.
    pub fn ping(magnitude: u64) -> Self {
        Self(clamp_magnitude(magnitude))
    }

    /// Pong token with the given magnitude, saturating at `-i64::MAX`.
    pub fn pong(magnitude: u64) -> Self {
        Self(-clamp_magnitude(magnitude))
    }

    /// Token of `kind` carrying `magnitude`.
    pub fn of_kind(kind: TokenKind, magnitude: u64) -> Self {
        match kind {
            TokenKind::Ping => Self::ping(magnitude),
            TokenKind::Pong => Self::pong(magnitude),
        }
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn kind(self) -> TokenKind {
        if self.0 > 0 {
            TokenKind::Ping
        } else {
            TokenKind::Pong
        }
    }

    pub fn magnitude(self) -> u64 {
        self.0.unsigned_abs()
    }

    pub fn is_sentinel(self) -> bool {
        self.0 == 0
    }

    /// True if this token is older than `marker` (strictly smaller magnitude).
    pub fn is_stale_against(self, marker: Token) -> bool {
        self.magnitude() < marker.magnitude()
    }
}

fn clamp_magnitude(magnitude: u64) -> i64 {
    i64::try_from(magnitude).unwrap_or(i64::MAX)
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Token {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_frame(s)
    }
}

impl From<i64> for Token {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Token> for i64 {
    fn from(token: Token) -> i64 {
        token.0
    }
}

/// Render a token as a frame payload. The line codec appends the `\n`.
pub fn encode_frame(token: Token) -> String {
    token.to_string()
}

/// Parse one frame payload, ignoring trailing whitespace.
pub fn parse_frame(line: &str) -> Result<Token, FrameError> {
    let payload = line.trim_end();
    payload
        .parse::<i64>()
        .map(Token)
        .map_err(|_| FrameError::NotAnInteger {
            payload: payload.to_string(),
        })
}
