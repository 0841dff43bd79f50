//! Hand-off queue between the transport and the protocol branches.
//!
//! Both branch loops wait on the same queue, each for its own kind of token.
//! A waiter only removes an item its predicate matches, so the other branch's
//! items keep their order.

use crate::token::{Token, TokenKind};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Insertion-ordered queue of inbound tokens.
#[derive(Default)]
pub struct TokenQueue {
    items: Mutex<VecDeque<Token>>,
    pushed: Notify,
}

impl TokenQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a token. Never blocks on consumers.
    pub fn push(&self, token: Token) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(token);
        // Wake every waiter: each one re-checks its own predicate.
        self.pushed.notify_waiters();
    }

    /// Remove and return the oldest token matching `pred`, if any.
    pub fn try_pop_where(&self, pred: impl Fn(&Token) -> bool) -> Option<Token> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let index = items.iter().position(|t| pred(t))?;
        items.remove(index)
    }

    /// Wait until a token matching `pred` is queued, then remove and return it.
    pub async fn pop_where(&self, pred: impl Fn(&Token) -> bool) -> Token {
        loop {
            // Register interest before checking so a push between the check
            // and the await is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(token) = self.try_pop_where(&pred) {
                return token;
            }

            notified.await;
        }
    }

    /// Wait for the oldest token of `kind`.
    pub async fn pop_kind(&self, kind: TokenKind) -> Token {
        self.pop_where(|t| t.kind() == kind).await
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
