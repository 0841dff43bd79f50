//! TCP link to the ring neighbours.
//!
//! Outbound: one lazily opened connection to the successor, shared by every
//! sender behind a mutex and dropped on the first write error so the next
//! send reconnects. Inbound: a listener for the predecessor; each accepted
//! connection gets its own read loop that parses line frames and pushes the
//! tokens onto the node's `TokenQueue`. Bad frames are logged and skipped; only
//! a disconnect or a read error ends a read loop.

use crate::codec::TokenCodec;
use futures::{SinkExt, StreamExt};
use ring_core::transport::{self, TokenTransport, TransportError};
use ring_core::{LossPolicy, Token, TokenQueue};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Writer = FramedWrite<TcpStream, TokenCodec>;

/// Transport between a node and its ring neighbours.
pub struct RingLink {
    /// Successor address (`host:port`)
    successor: String,
    /// Simulated loss applied to outgoing tokens
    loss: LossPolicy,
    /// Outbound connection, `None` until the first send or after a failure
    writer: Mutex<Option<Writer>>,
}

impl RingLink {
    pub fn new(successor: impl Into<String>, loss: LossPolicy) -> Self {
        Self {
            successor: successor.into(),
            loss,
            writer: Mutex::new(None),
        }
    }

    pub fn successor(&self) -> &str {
        &self.successor
    }

    /// Bind the listening socket for the predecessor on all interfaces.
    pub async fn bind(port: u16) -> io::Result<TcpListener> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!("Listening on port {}", port);
        Ok(listener)
    }

    /// Accept predecessor connections until `shutdown` is cancelled.
    ///
    /// Every parsed token is pushed onto `inbox`. Read loops end on their own
    /// when the peer disconnects; the listener keeps accepting.
    pub async fn serve(listener: TcpListener, inbox: Arc<TokenQueue>, shutdown: CancellationToken) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!("Accepted connection from {}", addr);
                            let inbox = Arc::clone(&inbox);
                            connections.spawn(Self::read_loop(addr, stream, inbox));
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }

                // Reap finished read loops
                Some(_) = connections.join_next() => {}
            }
        }

        connections.shutdown().await;
        debug!("Listener stopped");
    }

    /// Read frames from one inbound connection until it closes.
    async fn read_loop(peer: SocketAddr, stream: TcpStream, inbox: Arc<TokenQueue>) {
        let mut frames = FramedRead::new(stream, TokenCodec::new());

        loop {
            match frames.next().await {
                Some(Ok(frame)) => match frame {
                    Ok(token) => {
                        debug!("Received token {} from {}", token, peer);
                        inbox.push(token);
                    }
                    Err(e) => {
                        warn!("Error parsing message from {}: {}", peer, e);
                    }
                },
                Some(Err(e)) => {
                    error!("Error reading message from {}: {}", peer, e);
                    break;
                }
                None => {
                    info!("Client {} disconnected", peer);
                    break;
                }
            }
        }
    }

    async fn connect(&self) -> transport::Result<Writer> {
        let stream = TcpStream::connect(&self.successor).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("{}: {}", self.successor, e))
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {}: {}", self.successor, e);
        }
        info!("Connected to successor {}", self.successor);
        Ok(FramedWrite::new(stream, TokenCodec::new()))
    }

    /// Send one token to the successor, connecting first if needed.
    ///
    /// Tokens picked by the loss policy are discarded and reported as sent.
    pub async fn send_token(&self, token: Token) -> transport::Result<()> {
        let dropped = self.loss.should_drop(token, &mut rand::rng());
        if dropped {
            debug!("Simulated loss: dropping token {}", token);
            return Ok(());
        }

        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            *writer = Some(self.connect().await?);
        }
        let Some(sink) = writer.as_mut() else {
            return Err(TransportError::Closed);
        };

        let result = sink.send(token).await;
        if let Err(e) = result {
            // Drop the broken connection; the next send reconnects
            *writer = None;
            return Err(TransportError::SendFailed(format!(
                "{}: {}",
                self.successor, e
            )));
        }
        Ok(())
    }

    /// Close the outbound connection if it is open.
    pub async fn close_connection(&self) {
        let mut writer = self.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            if let Err(e) = SinkExt::<Token>::close(&mut sink).await {
                debug!("Error closing connection to {}: {}", self.successor, e);
            }
            info!("Closed connection to successor {}", self.successor);
        }
    }

    /// Whether an outbound connection is currently open.
    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }
}

#[async_trait::async_trait]
impl TokenTransport for RingLink {
    async fn send(&self, token: Token) -> transport::Result<()> {
        self.send_token(token).await
    }

    async fn close(&self) {
        self.close_connection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring_core::LossScope;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::time::timeout;

    async fn local_listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    /// Port with nothing listening on it.
    async fn closed_port() -> u16 {
        let (listener, addr) = local_listener().await;
        drop(listener);
        addr.port()
    }

    #[tokio::test]
    async fn test_send_writes_newline_frames() {
        let (listener, addr) = local_listener().await;
        let link = RingLink::new(addr.to_string(), LossPolicy::none());

        link.send_token(Token::new(3)).await.unwrap();
        link.send_token(Token::new(-3)).await.unwrap();
        assert!(link.is_connected().await);

        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("3"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("-3"));
    }

    #[tokio::test]
    async fn test_send_to_unreachable_successor_fails() {
        let port = closed_port().await;
        let link = RingLink::new(format!("127.0.0.1:{}", port), LossPolicy::none());

        let err = link.send_token(Token::new(1)).await.unwrap_err();

        assert!(matches!(err, TransportError::ConnectionFailed(_)));
        assert!(!link.is_connected().await);
    }

    #[tokio::test]
    async fn test_total_loss_reports_success_without_connecting() {
        let port = closed_port().await;
        let loss = LossPolicy::new(100.0, LossScope::Ping).unwrap();
        let link = RingLink::new(format!("127.0.0.1:{}", port), loss);

        // Dropped, so the dead successor is never contacted
        link.send_token(Token::new(1)).await.unwrap();
        assert!(!link.is_connected().await);

        // Pongs are out of scope and hit the dead successor
        assert!(link.send_token(Token::new(-1)).await.is_err());
    }

    #[tokio::test]
    async fn test_close_connection_is_idempotent() {
        let (_listener, addr) = local_listener().await;
        let link = RingLink::new(addr.to_string(), LossPolicy::none());

        link.close_connection().await;
        link.send_token(Token::new(1)).await.unwrap();
        link.close_connection().await;
        link.close_connection().await;

        assert!(!link.is_connected().await);
    }

    #[tokio::test]
    async fn test_serve_skips_malformed_frames() {
        let (listener, addr) = local_listener().await;
        let inbox = Arc::new(TokenQueue::new());
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(RingLink::serve(
            listener,
            Arc::clone(&inbox),
            shutdown.clone(),
        ));

        let mut peer = TcpStream::connect(addr).await.unwrap();
        peer.write_all(b"abc\n7\r\n  \n-2 \n").await.unwrap();

        let first = timeout(Duration::from_secs(1), inbox.pop_where(|_| true))
            .await
            .unwrap();
        let second = timeout(Duration::from_secs(1), inbox.pop_where(|_| true))
            .await
            .unwrap();
        assert_eq!(first, Token::new(7));
        assert_eq!(second, Token::new(-2));
        assert!(inbox.is_empty());

        shutdown.cancel();
        timeout(Duration::from_secs(1), server).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_survives_invalid_utf8_and_overlong_frames() {
        let (listener, addr) = local_listener().await;
        let inbox = Arc::new(TokenQueue::new());
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(RingLink::serve(
            listener,
            Arc::clone(&inbox),
            shutdown.clone(),
        ));

        let mut peer = TcpStream::connect(addr).await.unwrap();
        peer.write_all(b"\xff\xfe\n5\n").await.unwrap();
        let after_utf8 = timeout(Duration::from_secs(1), inbox.pop_where(|_| true))
            .await
            .unwrap();
        assert_eq!(after_utf8, Token::new(5));

        let mut overlong = vec![b'x'; 2000];
        overlong.extend_from_slice(b"\n6\n");
        peer.write_all(&overlong).await.unwrap();
        let after_overlong = timeout(Duration::from_secs(1), inbox.pop_where(|_| true))
            .await
            .unwrap();
        assert_eq!(after_overlong, Token::new(6));
        assert!(inbox.is_empty());

        shutdown.cancel();
        timeout(Duration::from_secs(1), server).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_connection_flushes_pending_frames() {
        let (listener, addr) = local_listener().await;
        let link = RingLink::new(addr.to_string(), LossPolicy::none());

        link.send_token(Token::new(8)).await.unwrap();
        link.close_connection().await;

        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("8"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_serve_keeps_accepting_after_disconnect() {
        let (listener, addr) = local_listener().await;
        let inbox = Arc::new(TokenQueue::new());
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(RingLink::serve(
            listener,
            Arc::clone(&inbox),
            shutdown.clone(),
        ));

        {
            let mut first = TcpStream::connect(addr).await.unwrap();
            first.write_all(b"1\n").await.unwrap();
        }
        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"-1\n").await.unwrap();

        let a = timeout(Duration::from_secs(1), inbox.pop_kind(ring_core::TokenKind::Ping))
            .await
            .unwrap();
        let b = timeout(Duration::from_secs(1), inbox.pop_kind(ring_core::TokenKind::Pong))
            .await
            .unwrap();
        assert_eq!((a, b), (Token::new(1), Token::new(-1)));

        shutdown.cancel();
        timeout(Duration::from_secs(1), server).await.unwrap().unwrap();
    }
}
