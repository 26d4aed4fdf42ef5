//! WebSocket Transport
//!
//! `tokio-tungstenite` adapter for the transport ports. TLS uses rustls with
//! the webpki root store. Keepalive pings run inside `receive`, so a silent
//! peer turns into `TransportError::KeepaliveTimeout` on the reading task.
//!
//! The trade updates stream sends binary frames; they are decoded as UTF-8.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatState};
use crate::application::ports::{Connector, StreamTransport};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector {
    heartbeat: HeartbeatConfig,
}

impl WebSocketConnector {
    /// Create a connector whose transports use `heartbeat`.
    #[must_use]
    pub const fn new(heartbeat: HeartbeatConfig) -> Self {
        Self { heartbeat }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn open(&self, url: &str) -> Result<Self::Transport, TransportError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();

        tracing::debug!(url, "WebSocket opened");

        Ok(WebSocketTransport {
            write,
            read,
            heartbeat: HeartbeatState::new(self.heartbeat, Instant::now()),
        })
    }
}

/// One open WebSocket connection.
pub struct WebSocketTransport {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    heartbeat: HeartbeatState,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("heartbeat", &self.heartbeat)
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    async fn on_heartbeat_deadline(&mut self) -> Result<(), TransportError> {
        match self.heartbeat.poll(Instant::now()) {
            HeartbeatAction::SendPing => {
                tracing::trace!("Sending keepalive ping");
                self.write.send(Message::Ping(Vec::new().into())).await?;
            }
            HeartbeatAction::Timeout => {
                let timeout = self.heartbeat.config().pong_timeout;
                tracing::warn!(timeout_secs = timeout.as_secs(), "Heartbeat timeout");
                return Err(TransportError::KeepaliveTimeout(timeout));
            }
            HeartbeatAction::Wait => {}
        }
        Ok(())
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.write.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        loop {
            let deadline = self.heartbeat.next_deadline();
            let heartbeat_due = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                msg = self.read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_pong();
                            return Ok(text.as_str().to_owned());
                        }
                        Some(Ok(Message::Binary(data))) => {
                            self.heartbeat.record_pong();
                            return String::from_utf8(data.to_vec())
                                .map_err(|_| TransportError::InvalidUtf8);
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Server sent close frame");
                            return Err(TransportError::Closed);
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(TransportError::Closed);
                        }
                    }
                }
                () = heartbeat_due => {
                    self.on_heartbeat_deadline().await?;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.write.send(Message::Close(None)).await {
            Ok(())
            | Err(
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
            ) => {}
            Err(e) => return Err(e.into()),
        }
        let _ = self.write.close().await;
        Ok(())
    }
}
