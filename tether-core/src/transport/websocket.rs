//! One JSON envelope per WebSocket text frame.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::debug;

use crate::error::{ProtocolError, TetherError};
use crate::message::{Inbound, Message};
use crate::transport::{Connector, Transport};

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Transport, TetherError> {
        let (stream, response) = connect_async(self.url.as_str()).await?;
        debug!(url = %self.url, status = %response.status(), "websocket connected");
        Ok(websocket_transport(stream, self.url.clone()))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Wrap an established WebSocket. Also used by the peer side.
pub fn websocket_transport<S>(ws: WebSocketStream<S>, peer: String) -> Transport
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();

    let sink = sink.with(|message: Message| {
        future::ready(message.to_json().map(WsMessage::text))
    });

    let stream = stream.filter_map(|frame| future::ready(classify_frame(frame)));

    Transport {
        sink: Box::pin(sink),
        stream: Box::pin(stream),
        peer,
    }
}

/// Map one WebSocket frame onto the inbound stream; `None` skips it.
fn classify_frame(
    frame: Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Inbound, TetherError>> {
    match frame {
        Ok(WsMessage::Text(text)) => Some(Ok(Inbound::decode(text.as_bytes()))),
        Ok(WsMessage::Binary(_)) => Some(Ok(Inbound::Malformed(ProtocolError::UnexpectedFrame(
            "binary",
        )))),
        // Control frames are answered by tungstenite itself; the stream
        // ends on its own after a close frame.
        Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => None,
        Ok(WsMessage::Close(frame)) => {
            debug!(?frame, "websocket close frame received");
            None
        }
        Err(e) => Some(Err(e.into())),
    }
}
