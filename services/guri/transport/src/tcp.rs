//! Plain TCP binding.

use crate::chunk::Chunk;
use crate::error::TransportError;
use crate::stream::{IoStream, SocketLink};
use crate::transport::Transport;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::info;

/// Dial `host:port` and relay bytes over a plain socket
pub struct TcpTransport {
    name: String,
    remote: String,
    link: Option<SocketLink>,
}

impl TcpTransport {
    /// Create a transport for `remote`; nothing is dialed until `connect`
    pub fn new(remote: impl Into<String>) -> Self {
        let remote = remote.into();
        Self {
            name: format!("tcp:{}", remote),
            remote,
            link: None,
        }
    }
}

/// Open a TCP connection with Nagle disabled
pub(crate) async fn dial(remote: &str) -> Result<TcpStream, TransportError> {
    let stream = TcpStream::connect(remote).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(SocketLink::is_open)
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if let Some(link) = self.link.take() {
            link.shutdown(&self.name).await;
        }

        let stream = dial(&self.remote).await?;
        info!("{}: connected", self.name);
        self.link = Some(SocketLink::spawn(IoStream::Plain(stream)));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(link) = self.link.take() {
            link.shutdown(&self.name).await;
            info!("{}: closed", self.name);
        }
        Ok(())
    }

    async fn write(
        &mut self,
        buf: &[u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        link.write(buf, timeout).await
    }

    async fn next_chunk(&mut self) -> Chunk {
        match self.link.as_mut() {
            Some(link) => link.next_chunk().await,
            None => Chunk::EndOfStream,
        }
    }
}
