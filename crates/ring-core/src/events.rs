//! Protocol events for monitoring and tests.

use crate::token::{Token, TokenKind};
use serde::Serialize;

/// Something observable the engine did with a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProtocolEvent {
    /// Inbound token older than the marker, discarded.
    Stale { token: Token, marker: Token },
    /// Both tokens were held together; magnitude advanced.
    Incarnated {
        /// Token whose arrival completed the pair.
        trigger: Token,
        ping: Token,
        pong: Token,
    },
    /// A lost companion was rebuilt from the surviving token.
    Regenerated {
        survivor: Token,
        #[serde(rename = "resent")]
        resent_kind: TokenKind,
        magnitude: u64,
    },
    /// Token handed to the transport.
    Sent { token: Token },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = ProtocolEvent::Regenerated {
            survivor: Token::new(-4),
            resent_kind: TokenKind::Ping,
            magnitude: 4,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"regenerated\""));
        assert!(json.contains("\"survivor\":-4"));
        assert!(json.contains("\"resent\":\"ping\""));
        assert!(json.contains("\"magnitude\":4"));
    }

    #[test]
    fn test_sent_serialization() {
        let json = serde_json::to_string(&ProtocolEvent::Sent {
            token: Token::new(2),
        })
        .unwrap();
        assert_eq!(json, "{\"type\":\"sent\",\"token\":2}");
    }
}
