//! Line-delimited JSON over a raw TCP socket.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::codec::{DEFAULT_MAX_LINE_LENGTH, LineCodec};
use crate::error::TetherError;
use crate::transport::{Connector, Transport};

/// Connects to `host:port` and frames the stream with [`LineCodec`].
#[derive(Debug, Clone)]
pub struct LineConnector {
    address: String,
    max_line_length: usize,
}

impl LineConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Connector for LineConnector {
    async fn connect(&self) -> Result<Transport, TetherError> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.address.clone());
        debug!(%peer, "tcp connected");
        Ok(line_transport(stream, self.max_line_length, peer))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

/// Wrap an already-connected socket. Also used by the peer side.
pub fn line_transport(stream: TcpStream, max_line_length: usize, peer: String) -> Transport {
    let (sink, stream) = Framed::new(stream, LineCodec::with_max_length(max_line_length)).split();
    Transport {
        sink: Box::pin(sink),
        stream: Box::pin(stream),
        peer,
    }
}
