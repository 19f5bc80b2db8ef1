// ABOUTME: Duplex text transport abstraction used by mode channels and probes
// ABOUTME: Provides the WebSocket implementation on top of tokio-tungstenite

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::constants::timeouts;
use crate::error::SnapError;

/// A frame received from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

/// One established duplex connection
#[async_trait]
pub trait Connection: Send {
    /// Next frame from the peer; `None` once the stream has ended.
    ///
    /// Must be cancel-safe: dropping the future before it resolves may not lose a frame.
    async fn recv(&mut self) -> Option<Result<Frame, SnapError>>;

    async fn send_text(&mut self, text: String) -> Result<(), SnapError>;

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), SnapError>;
}

/// Opens connections to channel endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, SnapError>;
}

/// WebSocket connector
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: timeouts::CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, SnapError> {
        match url.scheme() {
            "ws" | "wss" => {}
            scheme => {
                return Err(SnapError::Configuration(format!(
                    "Unsupported channel scheme '{}': {}",
                    scheme, url
                )));
            }
        }

        log::debug!("Connecting to {}", url);
        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let (stream, response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| SnapError::Timeout)??;
        log::debug!("Handshake with {} completed ({})", url, response.status());

        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn recv(&mut self) -> Option<Result<Frame, SnapError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(Ok(Frame::Text(text.as_str().to_string())));
                }
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(Frame::Text(text))),
                    Err(_) => {
                        log::warn!("Dropping non-UTF-8 binary frame ({} bytes)", bytes.len());
                    }
                },
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(Frame::Close { code, reason }));
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), SnapError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), SnapError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.stream.close(Some(frame)).await?;
        Ok(())
    }
}
