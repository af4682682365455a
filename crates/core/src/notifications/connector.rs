// crates/core/src/notifications/connector.rs
//! The socket seam. The client only needs a stream of inbound frames; this
//! crate never writes to the notification socket.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Frames of one connection. `Err` is a read failure; the stream ends when
/// the socket does.
pub type FrameStream = BoxStream<'static, Result<InboundFrame, String>>;

#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    #[error("WebSocket handshake failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Handshake {
        status: Option<u16>,
        message: String,
    },
}

impl From<tungstenite::Error> for ConnectError {
    fn from(e: tungstenite::Error) -> Self {
        let status = match &e {
            tungstenite::Error::Http(response) => Some(response.status().as_u16()),
            _ => None,
        };
        ConnectError::Handshake {
            status,
            message: e.to_string(),
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<FrameStream, ConnectError>;
}

/// tokio-tungstenite connector. Pings and pongs are answered by tungstenite
/// itself and never surface as frames.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, ConnectError> {
        let (ws_stream, _) = connect_async(url).await?;
        let frames = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(InboundFrame::Text(text.to_string()))),
                Ok(Message::Binary(bytes)) => Some(Ok(InboundFrame::Binary(bytes.to_vec()))),
                Ok(Message::Close(_)) => Some(Ok(InboundFrame::Close)),
                Ok(_) => None,
                Err(e) => Some(Err(e.to_string())),
            }
        });
        Ok(frames.boxed())
    }
}
