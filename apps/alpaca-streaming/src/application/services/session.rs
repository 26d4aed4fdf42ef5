//! Stream Session
//!
//! One long-lived session to one Alpaca stream. The session owns its
//! connection and desired subscriptions, routes every inbound frame to the
//! registered handlers, and recovers from connection loss:
//!
//! 1. Ask the backoff policy for the next delay (give up when exhausted)
//! 2. Sleep, unless `stop()` is requested first
//! 3. Open and authenticate a fresh connection
//! 4. Reset the backoff, emit `Connected`, replay the desired state
//!
//! All mutating operations take `&mut self`, so a session is driven by one
//! task. `StopHandle` is the only way in from other tasks.
//!
//! # Lifecycle events
//!
//! | Kind | Payload | When |
//! |------|---------|------|
//! | `Connected` | `{"url","endpoint","at"}` | after every successful handshake |
//! | `Error` | `{"error"}` | failed connect or reconnect, lost connection |
//! | `Disconnected` | `{"endpoint","at"}` | once, when the session closes |

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::Connector;
use crate::domain::streaming::{MessageEnvelope, MessageKind, SessionState, StreamEndpoint};
use crate::domain::subscription::{SubscriptionAction, SubscriptionRegistry, SubscriptionSet};
use crate::error::{ConnectError, StreamError, TransportError};
use crate::infrastructure::alpaca::auth::Credentials;
use crate::infrastructure::alpaca::codec::JsonCodec;
use crate::infrastructure::alpaca::connection::ConnectionManager;
use crate::infrastructure::alpaca::heartbeat::HeartbeatConfig;
use crate::infrastructure::alpaca::messages::{ErrorMessage, ListenRequest, SubscriptionRequest};
use crate::infrastructure::alpaca::reconnect::{BackoffConfig, BackoffPolicy};
use crate::infrastructure::alpaca::websocket::WebSocketConnector;
use crate::infrastructure::config::StreamConfig;
use crate::infrastructure::metrics;

use super::handlers::MessageHandler;
use super::resubscribe::ResubscribeStrategy;
use super::router::MessageRouter;

// =============================================================================
// Stop Handle
// =============================================================================

/// Cloneable request to end a session's run loop.
///
/// Stopping is permanent for the session it belongs to.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    /// Request the session to stop.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once a stop is requested.
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }
}

enum Reconnect {
    Connected,
    Failed,
    Stopped,
}

// =============================================================================
// Stream Session
// =============================================================================

/// A streaming session against one endpoint.
pub struct StreamSession<C: Connector> {
    id: Uuid,
    endpoint: StreamEndpoint,
    config: StreamConfig,
    connection: ConnectionManager<C>,
    subscriptions: SubscriptionRegistry,
    router: MessageRouter,
    backoff: BackoffPolicy,
    strategy: ResubscribeStrategy,
    codec: JsonCodec,
    state: watch::Sender<SessionState>,
    stop: StopHandle,
}

impl<C: Connector> std::fmt::Debug for StreamSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &*self.state.borrow())
            .field("connection", &self.connection)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl StreamSession<WebSocketConnector> {
    /// Create a session that connects over WebSocket.
    #[must_use]
    pub fn websocket(
        endpoint: StreamEndpoint,
        credentials: Credentials,
        config: StreamConfig,
    ) -> Self {
        let connector = WebSocketConnector::new(HeartbeatConfig::from_stream_config(&config));
        Self::new(connector, endpoint, credentials, config)
    }
}

impl<C: Connector> StreamSession<C> {
    /// Create a session using `connector` for every connection attempt.
    pub fn new(
        connector: C,
        endpoint: StreamEndpoint,
        credentials: Credentials,
        config: StreamConfig,
    ) -> Self {
        let connection =
            ConnectionManager::new(connector, endpoint, credentials, config.handshake_timeout);
        let (state, _) = watch::channel(SessionState::Disconnected);

        Self {
            id: Uuid::new_v4(),
            endpoint,
            connection,
            subscriptions: SubscriptionRegistry::new(),
            router: MessageRouter::new(endpoint),
            backoff: BackoffPolicy::new(BackoffConfig::from_stream_config(&config)),
            strategy: ResubscribeStrategy::for_endpoint(endpoint),
            codec: JsonCodec::new(),
            state,
            stop: StopHandle::default(),
            config,
        }
    }

    /// Connect somewhere other than the endpoint's default URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.connection = self.connection.with_url(url);
        self
    }

    /// Replace what is replayed after every (re)connect.
    #[must_use]
    pub fn with_resubscribe_strategy(mut self, strategy: ResubscribeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Append a handler for `kind`.
    pub fn on(&mut self, kind: MessageKind, handler: Arc<dyn MessageHandler>) -> &mut Self {
        self.router.register(kind, handler);
        self
    }

    /// Handle trades.
    pub fn on_trade(&mut self, handler: Arc<dyn MessageHandler>) -> &mut Self {
        self.on(MessageKind::Trade, handler)
    }

    /// Handle quotes.
    pub fn on_quote(&mut self, handler: Arc<dyn MessageHandler>) -> &mut Self {
        self.on(MessageKind::Quote, handler)
    }

    /// Handle minute bars.
    pub fn on_bar(&mut self, handler: Arc<dyn MessageHandler>) -> &mut Self {
        self.on(MessageKind::Bar, handler)
    }

    /// Handle daily bars.
    pub fn on_daily_bar(&mut self, handler: Arc<dyn MessageHandler>) -> &mut Self {
        self.on(MessageKind::DailyBar, handler)
    }

    /// Handle trading status changes.
    pub fn on_status(&mut self, handler: Arc<dyn MessageHandler>) -> &mut Self {
        self.on(MessageKind::Status, handler)
    }

    /// Handle order updates from the trading stream.
    pub fn on_trade_update(&mut self, handler: Arc<dyn MessageHandler>) -> &mut Self {
        self.on(MessageKind::TradeUpdate, handler)
    }

    /// Handle feed errors and session errors.
    pub fn on_error(&mut self, handler: Arc<dyn MessageHandler>) -> &mut Self {
        self.on(MessageKind::Error, handler)
    }

    /// Handle successful (re)connects.
    pub fn on_connect(&mut self, handler: Arc<dyn MessageHandler>) -> &mut Self {
        self.on(MessageKind::Connected, handler)
    }

    /// Handle the session closing.
    pub fn on_disconnect(&mut self, handler: Arc<dyn MessageHandler>) -> &mut Self {
        self.on(MessageKind::Disconnected, handler)
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Session identifier used in logs.
    pub const fn session_id(&self) -> Uuid {
        self.id
    }

    /// Stream this session speaks to.
    pub const fn endpoint(&self) -> StreamEndpoint {
        self.endpoint
    }

    /// Session settings.
    pub const fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state changes from another task.
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Desired subscriptions.
    pub const fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// A transport is open.
    pub const fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// The open transport is authenticated.
    pub const fn is_authenticated(&self) -> bool {
        self.connection.is_authenticated()
    }

    /// Handle for stopping the run loop from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Request the run loop to stop.
    pub fn stop(&self) {
        self.stop.stop();
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect, authenticate, and replay the desired state.
    ///
    /// Does nothing if already authenticated. A failure is also reported
    /// through the `Error` lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns the handshake failure.
    #[tracing::instrument(skip_all, fields(session = %self.id, endpoint = %self.endpoint))]
    pub async fn connect(&mut self) -> Result<(), StreamError> {
        if self.connection.is_authenticated() {
            return Ok(());
        }

        self.transition(SessionState::Connecting);
        match self.establish().await {
            Ok(()) => {
                self.on_established().await;
                Ok(())
            }
            Err(e) => {
                self.emit_error(&e.to_string()).await;
                self.transition(SessionState::Disconnected);
                Err(e.into())
            }
        }
    }

    /// Close the connection. The first call after activity emits
    /// `Disconnected`; later calls only make sure the transport is closed.
    pub async fn disconnect(&mut self) {
        self.connection.disconnect().await;

        if self.state() == SessionState::Closed {
            return;
        }

        self.transition(SessionState::Closed);
        self.emit(
            MessageKind::Disconnected,
            json!({"endpoint": self.endpoint.as_str(), "at": Utc::now().to_rfc3339()}),
        )
        .await;
    }

    /// Run `body` between `connect` and a guaranteed `disconnect`.
    ///
    /// # Errors
    ///
    /// Returns the connect failure or whatever `body` returns.
    pub async fn scoped<T, F>(&mut self, body: F) -> Result<T, StreamError>
    where
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, Result<T, StreamError>>,
    {
        if let Err(e) = self.connect().await {
            self.disconnect().await;
            return Err(e);
        }

        let result = body(self).await;
        self.disconnect().await;
        result
    }

    async fn establish(&mut self) -> Result<(), ConnectError> {
        self.connection.open().await?;
        self.transition(SessionState::Authenticating);
        self.connection.authenticate().await
    }

    async fn on_established(&mut self) {
        self.transition(SessionState::Authenticated);
        self.backoff.reset();

        self.emit(
            MessageKind::Connected,
            json!({
                "url": self.connection.url(),
                "endpoint": self.endpoint.as_str(),
                "at": Utc::now().to_rfc3339(),
            }),
        )
        .await;

        self.replay().await;
    }

    async fn replay(&mut self) {
        let snapshot = self.subscriptions.snapshot();
        let frame = match self.strategy.build_message(&snapshot) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Could not build resubscribe message");
                return;
            }
        };

        match self.request(frame).await {
            Ok(_) => tracing::info!(symbols = snapshot.len(), "Subscriptions restored"),
            Err(e) => tracing::warn!(error = %e, "Failed to restore subscriptions"),
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Add `selection` to the desired state and subscribe on the server.
    ///
    /// The desired state is updated before the server answers and is not
    /// rolled back if the server rejects the request.
    ///
    /// # Errors
    ///
    /// Returns `EmptySubscription` for an empty selection, a `NotAuthenticated`
    /// transport error before connecting, `Rejected` for an error reply, or
    /// `AckTimeout` if no reply arrives in time.
    pub async fn subscribe(
        &mut self,
        selection: &SubscriptionSet,
    ) -> Result<MessageEnvelope, StreamError> {
        self.change(SubscriptionAction::Subscribe, selection).await
    }

    /// Remove `selection` from the desired state and unsubscribe on the server.
    ///
    /// # Errors
    ///
    /// Same as [`Self::subscribe`].
    pub async fn unsubscribe(
        &mut self,
        selection: &SubscriptionSet,
    ) -> Result<MessageEnvelope, StreamError> {
        self.change(SubscriptionAction::Unsubscribe, selection).await
    }

    /// Ask the trading stream for order updates.
    ///
    /// # Errors
    ///
    /// Returns a `NotAuthenticated` transport error before connecting, or the
    /// failure of the request.
    pub async fn listen_trade_updates(&mut self) -> Result<MessageEnvelope, StreamError> {
        if !self.connection.is_authenticated() {
            return Err(TransportError::NotAuthenticated.into());
        }

        let frame = self.codec.encode(&ListenRequest::trade_updates())?;
        self.request(frame).await
    }

    async fn change(
        &mut self,
        action: SubscriptionAction,
        selection: &SubscriptionSet,
    ) -> Result<MessageEnvelope, StreamError> {
        if selection.is_empty() {
            return Err(StreamError::EmptySubscription);
        }
        if !self.connection.is_authenticated() {
            return Err(TransportError::NotAuthenticated.into());
        }

        let delta = self.subscriptions.apply(action, selection);
        metrics::set_subscriptions(self.endpoint, self.subscriptions.desired());

        tracing::info!(
            action = action.as_str(),
            symbols = delta.symbols.len(),
            version = self.subscriptions.version(),
            "Updating subscriptions"
        );

        let frame = self.codec.encode(&SubscriptionRequest::from(&delta))?;
        self.request(frame).await
    }

    async fn request(&mut self, frame: String) -> Result<MessageEnvelope, StreamError> {
        self.connection.send(frame).await?;
        self.await_ack().await
    }

    /// Wait for the next acknowledgement, routing everything else.
    async fn await_ack(&mut self) -> Result<MessageEnvelope, StreamError> {
        let timeout = self.config.ack_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            let frame = match tokio::time::timeout_at(deadline, self.connection.receive()).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(StreamError::AckTimeout(timeout)),
            };

            let summary = self.router.route(&frame).await;
            if let Some(ack) = summary.acknowledgements.into_iter().find(answers_request) {
                return ack_result(ack);
            }
        }
    }

    // =========================================================================
    // Run Loop
    // =========================================================================

    /// Connect if needed, then run until stopped or recovery gives up.
    ///
    /// A failed first connect is reported through the `Error` event and
    /// retried by the loop.
    ///
    /// # Errors
    ///
    /// Same as [`Self::run`].
    pub async fn run_forever(&mut self) -> Result<(), StreamError> {
        if !self.connection.is_authenticated() {
            if let Err(e) = self.connect().await {
                tracing::warn!(error = %e, "Initial connect failed, retrying with backoff");
            }
        }
        self.run().await
    }

    /// Receive and route frames until stopped, reconnecting on loss.
    ///
    /// Always disconnects before returning.
    ///
    /// # Errors
    ///
    /// Returns `ReconnectExhausted` when the attempt limit is reached, or
    /// `ConnectionLost` when the connection drops with auto-reconnect off.
    #[tracing::instrument(skip_all, fields(session = %self.id, endpoint = %self.endpoint))]
    pub async fn run(&mut self) -> Result<(), StreamError> {
        if self.connection.is_authenticated() {
            self.transition(SessionState::Running);
        }

        let outcome = self.run_loop().await;
        if let Err(e) = &outcome {
            tracing::error!(error = %e, "Session ended");
        }

        self.disconnect().await;
        outcome
    }

    async fn run_loop(&mut self) -> Result<(), StreamError> {
        loop {
            if self.stop.is_stopped() {
                tracing::info!("Stop requested");
                return Ok(());
            }

            if !self.connection.is_authenticated() {
                match self.reconnect_once().await? {
                    Reconnect::Connected => self.transition(SessionState::Running),
                    Reconnect::Failed => {}
                    Reconnect::Stopped => {
                        tracing::info!("Stop requested during reconnect delay");
                        return Ok(());
                    }
                }
                continue;
            }

            match self.connection.receive().await {
                Ok(frame) => {
                    self.router.route(&frame).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Connection lost");
                    self.emit_error(&e.to_string()).await;

                    if !self.config.auto_reconnect {
                        return Err(StreamError::ConnectionLost);
                    }
                    self.transition(SessionState::Reconnecting);
                }
            }
        }
    }

    async fn reconnect_once(&mut self) -> Result<Reconnect, StreamError> {
        if !self.config.auto_reconnect {
            return Err(StreamError::ConnectionLost);
        }

        let Some(delay) = self.backoff.next_delay() else {
            let attempts = self.backoff.attempt_count();
            tracing::error!(attempts, "Max reconnection attempts reached");
            return Err(StreamError::ReconnectExhausted { attempts });
        };
        let attempt = self.backoff.attempt_count();

        self.transition(SessionState::Reconnecting);
        metrics::record_reconnect_attempt(self.endpoint);
        tracing::info!(
            attempt,
            max_attempts = self.backoff.max_attempts(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnecting"
        );

        tokio::select! {
            () = self.stop.stopped() => return Ok(Reconnect::Stopped),
            () = tokio::time::sleep(delay) => {}
        }

        match self.establish().await {
            Ok(()) => {
                tracing::info!(attempt, "Reconnected");
                self.on_established().await;
                Ok(Reconnect::Connected)
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Reconnection attempt failed");
                self.emit_error(&e.to_string()).await;
                self.transition(SessionState::Reconnecting);
                Ok(Reconnect::Failed)
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn transition(&self, next: SessionState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "Unexpected state transition");
        }

        self.state.send_replace(next);
        metrics::set_session_state(self.endpoint, next);
        tracing::debug!(from = %current, to = %next, "Session state changed");
    }

    async fn emit(&self, kind: MessageKind, payload: Value) {
        self.router
            .emit(&MessageEnvelope::lifecycle(kind, payload))
            .await;
    }

    async fn emit_error(&self, error: &str) {
        self.emit(MessageKind::Error, json!({"error": error})).await;
    }
}

/// Stream-wide errors such as "slow client" are routed but never taken as
/// the reply.
fn answers_request(ack: &MessageEnvelope) -> bool {
    ack.kind() != &MessageKind::Error
        || ack
            .deserialize::<ErrorMessage>()
            .map_or(true, |error| error.answers_request())
}

fn ack_result(ack: MessageEnvelope) -> Result<MessageEnvelope, StreamError> {
    if ack.kind() != &MessageKind::Error {
        return Ok(ack);
    }

    let code = ack.code().unwrap_or_default();
    let message = ack.message().unwrap_or_default().to_string();
    tracing::warn!(code, %message, "Request rejected, desired state kept");
    Err(StreamError::Rejected { code, message })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::application::services::handlers::handler_fn;
    use crate::infrastructure::alpaca::memory::{MemoryConnector, MemoryPeer, MemoryPeers};

    fn session(
        endpoint: StreamEndpoint,
        config: StreamConfig,
    ) -> (StreamSession<MemoryConnector>, MemoryConnector, MemoryPeers) {
        let (connector, peers) = MemoryConnector::new();
        let credentials = Credentials::new("PKTEST", "secret").unwrap();
        let session = StreamSession::new(connector.clone(), endpoint, credentials, config);
        (session, connector, peers)
    }

    fn record(session: &mut StreamSession<MemoryConnector>, kind: MessageKind) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.on(
            kind,
            handler_fn(move |message| {
                sink.lock().push(message.payload().clone());
                Ok(())
            }),
        );
        seen
    }

    async fn connected(
        endpoint: StreamEndpoint,
    ) -> (StreamSession<MemoryConnector>, MemoryPeer, MemoryPeers) {
        let (mut session, _connector, mut peers) = session(endpoint, StreamConfig::default());
        let server = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            if endpoint.is_trading() {
                peer.complete_trading_handshake().await;
            } else {
                peer.complete_handshake().await;
            }
            (peer, peers)
        });
        session.connect().await.unwrap();
        let (peer, peers) = server.await.unwrap();
        (session, peer, peers)
    }

    #[tokio::test]
    async fn connect_emits_connected_and_moves_to_authenticated() {
        let (mut session, _connector, mut peers) = session(StreamEndpoint::Iex, StreamConfig::default());
        let connected = record(&mut session, MessageKind::Connected);
        let server = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            peer.complete_handshake().await;
            peer
        });

        session.connect().await.unwrap();
        let _peer = server.await.unwrap();

        assert_eq!(session.state(), SessionState::Authenticated);
        assert!(session.is_authenticated());
        let events = connected.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["url"], json!(StreamEndpoint::Iex.url()));
    }

    #[tokio::test]
    async fn failed_connect_emits_error() {
        let (mut session, connector, _peers) = session(StreamEndpoint::Iex, StreamConfig::default());
        let errors = record(&mut session, MessageKind::Error);
        connector.refuse_next(1);

        let err = session.connect().await.unwrap_err();

        assert!(matches!(err, StreamError::Connect(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(errors.lock()[0]["error"].as_str().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn subscribe_requires_authentication() {
        let (mut session, _connector, _peers) = session(StreamEndpoint::Iex, StreamConfig::default());

        let err = session
            .subscribe(&SubscriptionSet::new().with_trades(["AAPL"]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StreamError::Transport(TransportError::NotAuthenticated)
        ));
        assert!(session.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn empty_selection_is_rejected_locally() {
        let (mut session, _peer, _peers) = connected(StreamEndpoint::Iex).await;
        assert!(matches!(
            session.subscribe(&SubscriptionSet::new()).await,
            Err(StreamError::EmptySubscription)
        ));
    }

    #[tokio::test]
    async fn subscribe_returns_ack_and_routes_earlier_frames() {
        let (mut session, mut peer, _peers) = connected(StreamEndpoint::Iex).await;
        let trades = record(&mut session, MessageKind::Trade);

        let server = tokio::spawn(async move {
            let request = peer.recv_json().await.unwrap();
            peer.send_json(&json!([{"T": "t", "S": "MSFT", "p": 1.0}]));
            peer.send_json(&json!([{"T": "subscription", "trades": ["aapl", "AAPL"]}]));
            (peer, request)
        });

        let ack = session
            .subscribe(&SubscriptionSet::new().with_trades(["aapl"]))
            .await
            .unwrap();
        let (_peer, request) = server.await.unwrap();

        assert_eq!(request, json!({"action": "subscribe", "trades": ["AAPL"]}));
        assert_eq!(ack.kind(), &MessageKind::Subscription);
        assert_eq!(trades.lock().len(), 1);
        assert_eq!(session.subscriptions().version(), 1);
    }

    #[tokio::test]
    async fn rejected_subscription_keeps_desired_state() {
        let (mut session, mut peer, _peers) = connected(StreamEndpoint::Iex).await;

        let server = tokio::spawn(async move {
            peer.acknowledge(&json!([{"T": "error", "code": 405, "msg": "symbol limit exceeded"}]))
                .await;
            peer
        });

        let err = session
            .subscribe(&SubscriptionSet::new().with_quotes(["TSLA"]))
            .await
            .unwrap_err();
        let _peer = server.await.unwrap();

        assert!(matches!(err, StreamError::Rejected { code: 405, .. }));
        assert!(session.subscriptions().desired().contains(
            crate::domain::subscription::Channel::Quotes,
            "TSLA"
        ));
    }

    #[tokio::test]
    async fn slow_client_notice_is_not_taken_as_the_reply() {
        let (mut session, mut peer, _peers) = connected(StreamEndpoint::Iex).await;
        let errors = record(&mut session, MessageKind::Error);

        let server = tokio::spawn(async move {
            peer.recv_json().await.unwrap();
            peer.send_json(&json!([{"T": "error", "code": 407, "msg": "slow client"}]));
            peer.send_json(&json!([{"T": "subscription", "trades": ["AAPL"]}]));
            peer
        });

        let ack = session
            .subscribe(&SubscriptionSet::new().with_trades(["AAPL"]))
            .await
            .unwrap();
        let _peer = server.await.unwrap();

        assert_eq!(ack.kind(), &MessageKind::Subscription);
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(errors.lock()[0]["code"], 407);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_times_out() {
        let (mut session, _peer, _peers) = connected(StreamEndpoint::Iex).await;

        let err = session
            .subscribe(&SubscriptionSet::new().with_bars(["SPY"]))
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::AckTimeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn listen_trade_updates_sends_listen_request() {
        let (mut session, mut peer, _peers) = connected(StreamEndpoint::PaperTrading).await;

        let server = tokio::spawn(async move {
            peer.acknowledge(&json!({"stream": "listening", "data": {"streams": ["trade_updates"]}}))
                .await
        });

        let ack = session.listen_trade_updates().await.unwrap();
        let request = server.await.unwrap().unwrap();

        assert_eq!(ack.kind(), &MessageKind::Listening);
        assert_eq!(
            request,
            json!({"action": "listen", "data": {"streams": ["trade_updates"]}})
        );
    }

    #[tokio::test]
    async fn disconnect_emits_once() {
        let (mut session, _peer, _peers) = connected(StreamEndpoint::Iex).await;
        let disconnected = record(&mut session, MessageKind::Disconnected);

        session.disconnect().await;
        session.disconnect().await;

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_connected());
        assert_eq!(disconnected.lock().len(), 1);
    }

    #[tokio::test]
    async fn connection_loss_without_auto_reconnect_ends_run() {
        let config = StreamConfig {
            auto_reconnect: false,
            ..StreamConfig::default()
        };
        let (mut session, connector, mut peers) = session(StreamEndpoint::Iex, config);
        let server = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            peer.complete_handshake().await;
            peer.send_json(&json!([{"T": "t", "S": "AAPL"}]));
        });
        let trades = record(&mut session, MessageKind::Trade);

        session.connect().await.unwrap();
        server.await.unwrap();
        let err = session.run().await.unwrap_err();

        assert!(matches!(err, StreamError::ConnectionLost));
        assert_eq!(trades.lock().len(), 1);
        assert_eq!(connector.attempts(), 1);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cuts_backoff_sleep_short() {
        let (mut session, connector, _peers) = session(StreamEndpoint::Iex, StreamConfig::default());
        let handle = session.stop_handle();
        let mut states = session.state_receiver();

        let task = tokio::spawn(async move {
            let result = session.run().await;
            (session, result)
        });

        states
            .wait_for(|state| *state == SessionState::Reconnecting)
            .await
            .unwrap();
        handle.stop();

        let (session, result) = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(connector.attempts(), 0);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn scoped_disconnects_after_body() {
        let (mut session, _connector, mut peers) = session(StreamEndpoint::Iex, StreamConfig::default());
        let disconnects = record(&mut session, MessageKind::Disconnected);
        let states = session.state_receiver();
        let server = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            peer.complete_handshake().await;
            peer.acknowledge(&json!([{"T": "subscription", "bars": ["SPY"]}]))
                .await
                .unwrap()
        });

        let ack = session
            .scoped(|s| {
                Box::pin(async move {
                    s.subscribe(&SubscriptionSet::new().with_bars(["spy"])).await
                })
            })
            .await
            .unwrap();

        assert_eq!(ack.kind(), &MessageKind::Subscription);
        assert_eq!(server.await.unwrap(), json!({"action": "subscribe", "bars": ["SPY"]}));
        assert!(!session.is_connected());
        assert_eq!(*states.borrow(), SessionState::Closed);
        assert_eq!(disconnects.lock().len(), 1);
        assert_eq!(session.subscriptions().version(), 1);
    }

    #[test]
    fn stop_handle_is_shared() {
        let handle = StopHandle::default();
        let clone = handle.clone();
        assert!(!handle.is_stopped());
        clone.stop();
        assert!(handle.is_stopped());
    }
}
