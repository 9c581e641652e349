//! Standard-stream binding.
//!
//! Relays between guri and a parent process over stdin/stdout, or over any
//! other reader/writer pair. Closing only stops the relay: the streams stay
//! open so a later `connect` can pick up where it left off.

use crate::chunk::{chunk_channel, Chunk, ChunkReceiver};
use crate::error::TransportError;
use crate::stream::{relay_reads, write_all_timeout};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

type Input = Box<dyn AsyncRead + Send + Unpin>;
type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Relay over a reader/writer pair
pub struct StdioTransport {
    name: String,
    input: Arc<Mutex<Input>>,
    output: Output,
    relay: Option<(JoinHandle<()>, ChunkReceiver)>,
}

impl StdioTransport {
    /// Wrap an arbitrary reader/writer pair
    pub fn new<R, W>(input: R, output: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            name: "stdio".to_string(),
            input: Arc::new(Mutex::new(Box::new(input))),
            output: Box::new(output),
            relay: None,
        }
    }

    /// Relay over this process's stdin and stdout
    pub fn process() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    fn stop_relay(&mut self) {
        if let Some((task, _)) = self.relay.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.relay
            .as_ref()
            .is_some_and(|(_, rx)| !rx.is_finished())
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stop_relay();

        let (tx, rx) = chunk_channel();
        let input = Arc::clone(&self.input);
        let task = tokio::spawn(async move {
            // Waits for an aborted relay to release the reader
            let mut input = input.lock().await;
            relay_reads(&mut *input, tx).await;
        });

        debug!("{}: relay started", self.name);
        self.relay = Some((task, rx));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stop_relay();
        debug!("{}: relay stopped", self.name);
        Ok(())
    }

    async fn write(
        &mut self,
        buf: &[u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        if self.relay.is_none() {
            return Err(TransportError::NotConnected);
        }
        write_all_timeout(&mut self.output, buf, timeout).await
    }

    async fn next_chunk(&mut self) -> Chunk {
        match self.relay.as_mut() {
            Some((_, rx)) => rx.next().await,
            None => Chunk::EndOfStream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_relay_and_write() {
        let (mut feed, input) = duplex(64);
        let (output, mut sink) = duplex(64);
        let mut transport = StdioTransport::new(input, output);

        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        feed.write_all(b"ping").await.unwrap();
        let data = transport.recv(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(&data[..], b"ping");

        transport.write(b"pong", None).await.unwrap();
        let mut buf = [0u8; 4];
        sink.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_close_keeps_streams_open() {
        let (mut feed, input) = duplex(64);
        let (output, _sink) = duplex(64);
        let mut transport = StdioTransport::new(input, output);

        transport.connect().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.write(b"x", None).await,
            Err(TransportError::NotConnected)
        ));

        // Input written while closed is picked up after reconnecting
        feed.write_all(b"again").await.unwrap();
        transport.connect().await.unwrap();
        let data = transport.recv(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(&data[..], b"again");
    }

    #[tokio::test]
    async fn test_input_eof_ends_stream() {
        let (feed, input) = duplex(64);
        let (output, _sink) = duplex(64);
        let mut transport = StdioTransport::new(input, output);

        transport.connect().await.unwrap();
        drop(feed);

        assert!(matches!(transport.next_chunk().await, Chunk::EndOfStream));
        assert!(!transport.is_connected());
    }
}
