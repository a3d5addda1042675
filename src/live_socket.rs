//! Transport seam for the live reconciler.
//!
//! The reconciler only needs "connect to an endpoint" and "exchange text
//! frames", so both are traits. [`WsConnector`] is the production
//! implementation over `tokio-tungstenite`; tests script their own.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

/// Error type for live connection operations.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// The websocket handshake failed.
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    /// The handshake did not complete in time.
    #[error("websocket connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// Reading or writing an established socket failed.
    #[error("websocket transport failed: {0}")]
    Transport(Box<tokio_tungstenite::tungstenite::Error>),
    /// Non-websocket failure raised by a custom connector.
    #[error("live endpoint unavailable: {0}")]
    Unavailable(String),
}

/// An established text-frame connection.
#[async_trait]
pub trait LiveSocket: Send {
    /// Next text frame. `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String, LiveError>>;

    async fn send(&mut self, text: String) -> Result<(), LiveError>;

    /// Best-effort close; errors are swallowed.
    async fn close(&mut self);
}

/// Opens [`LiveSocket`]s.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn LiveSocket>, LiveError>;
}

/// [`LiveConnector`] over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl LiveConnector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn LiveSocket>, LiveError> {
        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| LiveError::ConnectTimeout(self.connect_timeout))?
            .map_err(|e| LiveError::Connect(Box::new(e)))?;
        Ok(Box::new(WsSocket { stream }))
    }
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl LiveSocket for WsSocket {
    async fn recv(&mut self) -> Option<Result<String, LiveError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(LiveError::Transport(Box::new(e)))),
            };
            match msg {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!(len = bytes.len(), "skipping non-utf8 binary frame"),
                },
                Message::Close(_) => return None,
                _ => {}
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), LiveError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| LiveError::Transport(Box::new(e)))
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "websocket close failed");
        }
    }
}
