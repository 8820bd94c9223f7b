//! Text WebSocket plumbing shared by the notification channel and the
//! signaling session.
//!
//! Both drivers only see the [`SocketConnector`] / [`SocketConnection`]
//! traits; the tungstenite-backed implementation lives here and tests plug in
//! in-memory fakes.

use crate::errors::SocketError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// One inbound socket event. `Closed` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Message(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

impl SocketEvent {
    pub fn closed() -> Self {
        SocketEvent::Closed {
            code: None,
            reason: String::new(),
        }
    }
}

#[async_trait]
pub trait SocketConnection: Send {
    /// Next inbound event. Cancel safe.
    async fn recv(&mut self) -> SocketEvent;

    async fn send(&mut self, text: String) -> Result<(), SocketError>;

    /// Best effort close; never fails.
    async fn close(&mut self);
}

#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketConnection>, SocketError>;
}

// ── tungstenite implementation ──────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketConnection>, SocketError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| SocketError::ConnectFailed {
                reason: e.to_string(),
            })?;
        debug!(status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WsConnection {
            inner: stream,
            closed: false,
        }))
    }
}

pub struct WsConnection {
    inner: WsStream,
    closed: bool,
}

#[async_trait]
impl SocketConnection for WsConnection {
    async fn recv(&mut self) -> SocketEvent {
        if self.closed {
            return SocketEvent::closed();
        }
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return SocketEvent::Message(text.to_string()),
                Some(Ok(Message::Binary(bin))) => match String::from_utf8(bin.to_vec()) {
                    Ok(text) => return SocketEvent::Message(text),
                    Err(_) => warn!(len = bin.len(), "dropping non utf-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    self.closed = true;
                    return match frame {
                        Some(f) => SocketEvent::Closed {
                            code: Some(u16::from(f.code)),
                            reason: f.reason.to_string(),
                        },
                        None => SocketEvent::closed(),
                    };
                }
                // ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => return SocketEvent::Error(e.to_string()),
                None => {
                    self.closed = true;
                    return SocketEvent::closed();
                }
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), SocketError> {
        if self.closed {
            return Err(SocketError::Closed);
        }
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SocketError::SendFailed {
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.inner.close(None).await {
            debug!(error = %e, "websocket close handshake failed");
        }
    }
}
