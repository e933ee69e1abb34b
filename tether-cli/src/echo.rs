//! A peer that answers requests, for exercising the client by hand.
//!
//! `ping` is answered with `{"ok": true}`; any other request gets its own
//! action and params back. Events and responses are logged only.

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tether_core::{
    DEFAULT_MAX_LINE_LENGTH, Inbound, Message, MessageKind, TetherError, Transport, line_transport,
    websocket_transport,
};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Which framing the peer speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Line,
    WebSocket,
}

/// The reply the echo peer sends for `message`, if any.
pub fn reply(message: &Message) -> Option<Message> {
    if message.kind != MessageKind::Request {
        return None;
    }
    let id = message.id()?;
    let result = if message.action() == "ping" {
        json!({"ok": true})
    } else {
        json!({"action": message.action(), "params": message.payload.params})
    };
    Some(Message::success(id, message.action(), result))
}

/// Accept connections forever, one task per peer.
pub async fn serve(listener: TcpListener, binding: Binding) -> Result<(), TetherError> {
    info!(addr = %listener.local_addr()?, ?binding, "echo peer listening");
    loop {
        let (stream, addr) = listener.accept().await?;
        info!(%addr, "client connected");
        tokio::spawn(async move {
            match session(stream, addr.to_string(), binding).await {
                Ok(()) => info!(%addr, "client disconnected"),
                Err(e) => warn!(%addr, "session ended: {e}"),
            }
        });
    }
}

async fn session(stream: TcpStream, peer: String, binding: Binding) -> Result<(), TetherError> {
    let transport = match binding {
        Binding::Line => line_transport(stream, DEFAULT_MAX_LINE_LENGTH, peer),
        Binding::WebSocket => {
            let ws = tokio_tungstenite::accept_async(stream).await?;
            websocket_transport(ws, peer)
        }
    };
    answer(transport).await
}

async fn answer(transport: Transport) -> Result<(), TetherError> {
    let Transport {
        mut sink,
        mut stream,
        ..
    } = transport;

    while let Some(inbound) = stream.next().await {
        let message = match inbound? {
            Inbound::Message(message) => message,
            Inbound::Malformed(e) => {
                warn!("dropping frame: {e}");
                continue;
            }
        };
        debug!(kind = %message.kind, action = %message.action(), "received");
        match reply(&message) {
            Some(response) => sink.send(response).await?,
            None => info!(kind = %message.kind, action = %message.action(), "not a request"),
        }
    }
    Ok(())
}
