//! Connection Manager
//!
//! Owns at most one transport and performs the Alpaca auth handshake on it.
//! It never retries: recovery belongs to the session.
//!
//! # Handshake
//!
//! 1. Open the transport
//! 2. Market data only: read the `connected` welcome frame and discard it
//! 3. Send `{"action":"auth","key":"...","secret":"..."}`
//! 4. Read one frame; the first decisive element of the reply wins
//!
//! Steps 2-4 run under the handshake timeout. Any failure closes the
//! transport.

use std::time::Duration;

use crate::application::ports::{Connector, StreamTransport};
use crate::domain::streaming::StreamEndpoint;
use crate::error::{ConnectError, TransportError};
use crate::infrastructure::alpaca::auth::{AuthOutcome, Credentials, evaluate_auth_reply};
use crate::infrastructure::alpaca::codec::JsonCodec;

/// A single authenticated connection to one stream.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    endpoint: StreamEndpoint,
    url: String,
    credentials: Credentials,
    handshake_timeout: Duration,
    codec: JsonCodec,
    transport: Option<C::Transport>,
    authenticated: bool,
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .field("connected", &self.transport.is_some())
            .field("authenticated", &self.authenticated)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager for `endpoint`'s default URL.
    pub fn new(
        connector: C,
        endpoint: StreamEndpoint,
        credentials: Credentials,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            endpoint,
            url: endpoint.url().to_string(),
            credentials,
            handshake_timeout,
            codec: JsonCodec::new(),
            transport: None,
            authenticated: false,
        }
    }

    /// Connect somewhere other than the endpoint's default URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// URL this manager connects to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stream this manager speaks to.
    pub const fn endpoint(&self) -> StreamEndpoint {
        self.endpoint
    }

    /// A transport is open.
    pub const fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// A transport is open and the handshake succeeded on it.
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated && self.transport.is_some()
    }

    /// Open a fresh transport, closing any existing one first.
    ///
    /// # Errors
    ///
    /// Returns an error if the connector fails or does not answer within the
    /// handshake timeout.
    pub async fn open(&mut self) -> Result<(), ConnectError> {
        self.disconnect().await;

        tracing::info!(url = %self.url, endpoint = %self.endpoint, "Connecting");

        let timeout = self.handshake_timeout;
        let transport = tokio::time::timeout(timeout, self.connector.open(&self.url))
            .await
            .map_err(|_| ConnectError::Timeout(timeout))??;

        self.transport = Some(transport);
        Ok(())
    }

    /// Run the auth handshake on the open transport.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport is open, the server rejects the
    /// credentials, the reply is inconclusive, or the handshake times out.
    /// The transport is closed on every error.
    pub async fn authenticate(&mut self) -> Result<(), ConnectError> {
        let timeout = self.handshake_timeout;
        let result = tokio::time::timeout(timeout, self.handshake())
            .await
            .unwrap_or(Err(ConnectError::Timeout(timeout)));

        match result {
            Ok(()) => {
                self.authenticated = true;
                tracing::info!(endpoint = %self.endpoint, "Authenticated");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "Authentication failed");
                self.disconnect().await;
                Err(e)
            }
        }
    }

    /// Open then authenticate.
    ///
    /// # Errors
    ///
    /// Returns the first failure of either step.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        self.open().await?;
        self.authenticate().await
    }

    async fn handshake(&mut self) -> Result<(), ConnectError> {
        let codec = self.codec;
        let sends_welcome = self.endpoint.sends_welcome();
        let request = codec.encode(&self.credentials.auth_request())?;
        let transport = self
            .transport
            .as_mut()
            .ok_or(TransportError::NotConnected)?;

        if sends_welcome {
            let welcome = transport.receive().await?;
            tracing::debug!(frame = %welcome, "Welcome received");
        }

        transport.send(request).await?;
        let reply = transport.receive().await?;
        let decoded = codec.decode(&reply)?;
        for skipped in &decoded.skipped {
            tracing::debug!(error = %skipped, "Ignoring undecodable auth reply element");
        }

        match evaluate_auth_reply(&decoded.envelopes) {
            AuthOutcome::Authenticated => Ok(()),
            AuthOutcome::Rejected(error) => Err(ConnectError::AuthRejected(error)),
            AuthOutcome::Inconclusive => Err(ConnectError::Inconclusive(reply)),
        }
    }

    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` without a transport. Any transport failure
    /// drops the connection.
    pub async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(TransportError::NotConnected)?;

        let result = transport.send(frame).await;
        if result.is_err() {
            self.mark_lost();
        }
        result
    }

    /// Wait for the next frame.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` without a transport. Any transport failure
    /// drops the connection.
    pub async fn receive(&mut self) -> Result<String, TransportError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(TransportError::NotConnected)?;

        let result = transport.receive().await;
        if result.is_err() {
            self.mark_lost();
        }
        result
    }

    /// Close the transport if one is open. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        self.authenticated = false;
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                tracing::debug!(error = %e, "Error while closing transport");
            }
            tracing::info!(endpoint = %self.endpoint, "Disconnected");
        }
    }

    fn mark_lost(&mut self) {
        self.authenticated = false;
        self.transport = None;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::infrastructure::alpaca::auth::AuthError;
    use crate::infrastructure::alpaca::memory::{MemoryConnector, MemoryPeers};

    fn manager(endpoint: StreamEndpoint) -> (ConnectionManager<MemoryConnector>, MemoryConnector, MemoryPeers) {
        let (connector, peers) = MemoryConnector::new();
        let credentials = Credentials::new("PKTEST", "secret").unwrap();
        let manager = ConnectionManager::new(
            connector.clone(),
            endpoint,
            credentials,
            Duration::from_secs(10),
        );
        (manager, connector, peers)
    }

    #[tokio::test]
    async fn market_data_handshake() {
        let (mut manager, connector, mut peers) = manager(StreamEndpoint::Iex);

        let server = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            let auth = peer.complete_handshake().await.unwrap();
            (peer, auth)
        });

        manager.connect().await.unwrap();
        let (_peer, auth) = server.await.unwrap();

        assert!(manager.is_connected());
        assert!(manager.is_authenticated());
        assert_eq!(
            auth,
            json!({"action": "auth", "key": "PKTEST", "secret": "secret"})
        );
        assert_eq!(
            connector.attempt_urls(),
            ["wss://stream.data.alpaca.markets/v2/iex"]
        );
    }

    #[tokio::test]
    async fn trading_handshake_skips_welcome() {
        let (mut manager, _connector, mut peers) = manager(StreamEndpoint::PaperTrading);

        let server = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            peer.complete_trading_handshake().await.unwrap();
            peer
        });

        manager.connect().await.unwrap();
        let _peer = server.await.unwrap();
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn auth_reply_with_untagged_element_still_authenticates() {
        let (mut manager, _connector, mut peers) = manager(StreamEndpoint::Iex);

        let server = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            peer.send_json(&json!([{"T": "success", "msg": "connected"}]));
            let _auth = peer.recv().await;
            peer.send_json(&json!([{"x": 1}, {"T": "success", "msg": "authenticated"}]));
            peer
        });

        manager.connect().await.unwrap();
        let _peer = server.await.unwrap();
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn rejected_credentials_close_transport() {
        let (mut manager, _connector, mut peers) = manager(StreamEndpoint::Sip);

        let server = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            peer.send_json(&json!([{"T": "success", "msg": "connected"}]));
            let _auth = peer.recv().await;
            peer.send_json(&json!([{"T": "error", "code": 402, "msg": "auth failed"}]));
            peer.recv().await
        });

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectError::AuthRejected(AuthError::InvalidCredentials)
        ));
        assert!(!manager.is_connected());
        assert_eq!(server.await.unwrap(), None);
    }

    #[tokio::test]
    async fn inconclusive_reply_fails() {
        let (mut manager, _connector, mut peers) = manager(StreamEndpoint::Iex);

        let server = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            peer.send_json(&json!([{"T": "success", "msg": "connected"}]));
            let _auth = peer.recv().await;
            peer.send_json(&json!([{"T": "subscription", "trades": []}]));
            peer
        });

        let err = manager.connect().await.unwrap_err();
        let _peer = server.await.unwrap();
        assert!(matches!(err, ConnectError::Inconclusive(_)));
        assert!(!manager.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out() {
        let (mut manager, _connector, mut peers) = manager(StreamEndpoint::Iex);

        let server = tokio::spawn(async move { peers.accept().await });

        let err = manager.connect().await.unwrap_err();
        let _peer = server.await.unwrap();
        assert!(matches!(err, ConnectError::Timeout(d) if d == Duration::from_secs(10)));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn refused_open_is_transport_error() {
        let (mut manager, connector, _peers) = manager(StreamEndpoint::Iex);
        connector.refuse_next(1);

        let err = manager.open().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectError::Transport(TransportError::Refused(_))
        ));
    }

    #[tokio::test]
    async fn io_without_transport() {
        let (mut manager, _connector, _peers) = manager(StreamEndpoint::Iex);

        assert!(matches!(
            manager.send("{}".to_string()).await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            manager.receive().await,
            Err(TransportError::NotConnected)
        ));

        manager.disconnect().await;
        manager.disconnect().await;
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn receive_failure_drops_connection() {
        let (mut manager, _connector, mut peers) = manager(StreamEndpoint::Iex);

        let server = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            peer.complete_handshake().await;
            peer
        });
        manager.connect().await.unwrap();
        drop(server.await.unwrap());

        assert!(matches!(
            manager.receive().await,
            Err(TransportError::Closed)
        ));
        assert!(!manager.is_connected());
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn custom_url() {
        let (manager, connector, _peers) = manager(StreamEndpoint::Iex);
        let mut manager = manager.with_url("ws://127.0.0.1:9/stream");
        connector.refuse_next(1);

        let _ = manager.open().await;
        assert_eq!(manager.url(), "ws://127.0.0.1:9/stream");
        assert_eq!(connector.attempt_urls(), ["ws://127.0.0.1:9/stream"]);
    }
}
