//! The transport abstraction.

use crate::chunk::Chunk;
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// A reconnectable byte link.
///
/// A transport owns its underlying resource exclusively. `connect` creates
/// it (and may be called again after `close` to recreate it in place);
/// `close` releases it. Received bytes arrive through [`next_chunk`], which
/// is cancel safe so it can sit in a `select!`.
///
/// [`next_chunk`]: Transport::next_chunk
#[async_trait]
pub trait Transport: Send {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Whether the underlying resource is open
    fn is_connected(&self) -> bool;

    /// Open the underlying resource and start its background reader
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Stop the background reader and release the resource
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Write all of `buf`, giving up after `timeout` if one is set
    async fn write(&mut self, buf: &[u8], timeout: Option<Duration>)
        -> Result<usize, TransportError>;

    /// Wait for the next received chunk.
    ///
    /// Reports [`Chunk::EndOfStream`] when not connected.
    async fn next_chunk(&mut self) -> Chunk;

    /// Wait up to `timeout` for data.
    ///
    /// Returns `Ok(None)` when nothing arrived in time and
    /// [`TransportError::Closed`] once the stream has ended.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<Bytes>, TransportError> {
        match tokio::time::timeout(timeout, self.next_chunk()).await {
            Err(_) => Ok(None),
            Ok(Chunk::Data(data)) => Ok(Some(data)),
            Ok(Chunk::EndOfStream) => Err(TransportError::Closed),
            Ok(Chunk::Error(err)) => Err(err),
        }
    }
}
