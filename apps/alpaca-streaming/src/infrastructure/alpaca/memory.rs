//! In-Memory Transport
//!
//! A `Connector` whose server side is driven by the caller. Each accepted
//! `open` hands a `MemoryPeer` to the paired `MemoryPeers` receiver; the peer
//! plays the Alpaca server for that one connection. Dropping the peer looks
//! like the server closing the socket.
//!
//! ```rust
//! # async fn demo() {
//! use alpaca_streaming::infrastructure::alpaca::memory::MemoryConnector;
//!
//! let (connector, mut peers) = MemoryConnector::new();
//! connector.refuse_next(2);
//! // hand `connector` to a session, then:
//! let mut peer = peers.accept().await.unwrap();
//! peer.complete_handshake().await;
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::application::ports::{Connector, StreamTransport};
use crate::error::TransportError;

#[derive(Debug, Default)]
struct ConnectorState {
    refusals: u32,
    attempts: Vec<(Instant, String)>,
}

/// Connector producing in-process transports.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and the receiver of its server-side peers.
    #[must_use]
    pub fn new() -> (Self, MemoryPeers) {
        let (peers, accepted) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(Mutex::new(ConnectorState::default())),
                peers,
            },
            MemoryPeers { accepted },
        )
    }

    /// Fail the next `count` opens with `TransportError::Refused`.
    pub fn refuse_next(&self, count: u32) {
        self.state.lock().refusals += count;
    }

    /// Number of open attempts, refused ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts.len()
    }

    /// When each open attempt happened.
    #[must_use]
    pub fn attempt_instants(&self) -> Vec<Instant> {
        self.state.lock().attempts.iter().map(|(at, _)| *at).collect()
    }

    /// URLs of each open attempt.
    #[must_use]
    pub fn attempt_urls(&self) -> Vec<String> {
        self.state
            .lock()
            .attempts
            .iter()
            .map(|(_, url)| url.clone())
            .collect()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn open(&self, url: &str) -> Result<Self::Transport, TransportError> {
        {
            let mut state = self.state.lock();
            state.attempts.push((Instant::now(), url.to_string()));
            if state.refusals > 0 {
                state.refusals -= 1;
                return Err(TransportError::Refused(url.to_string()));
            }
        }

        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            incoming: from_client,
            outgoing: to_client,
        };
        if self.peers.send(peer).is_err() {
            return Err(TransportError::Refused(url.to_string()));
        }

        Ok(MemoryTransport {
            incoming: from_server,
            outgoing: Some(to_server),
        })
    }
}

/// Client side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl StreamTransport for MemoryTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.outgoing
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        self.incoming.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outgoing = None;
        self.incoming.close();
        Ok(())
    }
}

/// Stream of server-side peers, one per accepted open.
#[derive(Debug)]
pub struct MemoryPeers {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryPeers {
    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }
}

/// Server side of one in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl MemoryPeer {
    /// Send a raw frame to the client. Returns false once the client is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.outgoing.send(frame.into()).is_ok()
    }

    /// Send a JSON frame to the client.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send(value.to_string())
    }

    /// Next frame from the client, or `None` once it closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Next frame from the client parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let frame = self.recv().await?;
        serde_json::from_str(&frame).ok()
    }

    /// Play the market data handshake: welcome, read auth, accept.
    ///
    /// Returns the auth request the client sent.
    pub async fn complete_handshake(&mut self) -> Option<Value> {
        self.send_json(&json!([{"T": "success", "msg": "connected"}]));
        let auth = self.recv_json().await?;
        self.send_json(&json!([{"T": "success", "msg": "authenticated"}]));
        Some(auth)
    }

    /// Play the trade updates handshake: read auth, authorize.
    pub async fn complete_trading_handshake(&mut self) -> Option<Value> {
        let auth = self.recv_json().await?;
        self.send_json(&json!({
            "stream": "authorization",
            "data": {"status": "authorized", "action": "authenticate"}
        }));
        Some(auth)
    }

    /// Read one request and acknowledge it with `ack`.
    pub async fn acknowledge(&mut self, ack: &Value) -> Option<Value> {
        let request = self.recv_json().await?;
        self.send_json(ack);
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut transport = connector.open("memory://test").await.unwrap();
        let mut peer = peers.accept().await.unwrap();

        transport.send("hello".to_string()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("hello"));

        assert!(peer.send("world"));
        assert_eq!(transport.receive().await.unwrap(), "world");
    }

    #[tokio::test]
    async fn refusals_are_counted() {
        let (connector, _peers) = MemoryConnector::new();
        connector.refuse_next(2);

        assert!(matches!(
            connector.open("memory://a").await,
            Err(TransportError::Refused(_))
        ));
        assert!(connector.open("memory://b").await.is_err());
        assert!(connector.open("memory://c").await.is_ok());

        assert_eq!(connector.attempts(), 3);
        assert_eq!(
            connector.attempt_urls(),
            ["memory://a", "memory://b", "memory://c"]
        );
    }

    #[tokio::test]
    async fn dropping_peer_closes_client() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut transport = connector.open("memory://test").await.unwrap();
        drop(peers.accept().await.unwrap());

        assert!(matches!(
            transport.receive().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn client_close_is_seen_by_peer() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut transport = connector.open("memory://test").await.unwrap();
        let mut peer = peers.accept().await.unwrap();

        transport.close().await.unwrap();

        assert_eq!(peer.recv().await, None);
        assert!(transport.send("late".to_string()).await.is_err());
    }
}
