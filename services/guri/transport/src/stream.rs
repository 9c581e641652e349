//! Socket plumbing shared by the TCP and TLS bindings.

use crate::chunk::{chunk_channel, Chunk, ChunkReceiver, ChunkSender};
use crate::error::TransportError;
use bytes::Bytes;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, WriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tracing::debug;

/// Size of each socket read
pub const READ_CHUNK_SIZE: usize = 256;

/// Unified stream type that can be either plain TCP or TLS
pub enum IoStream {
    /// Plain TCP stream
    Plain(TcpStream),
    /// TLS client stream
    TlsClient(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for IoStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            IoStream::TlsClient(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IoStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            IoStream::TlsClient(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            IoStream::TlsClient(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            IoStream::TlsClient(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Copy reads from `reader` onto `tx` until end-of-stream or a read error
pub async fn relay_reads<R>(mut reader: R, tx: ChunkSender)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tx.end().await;
                return;
            }
            Ok(n) => {
                if !tx.send(Bytes::copy_from_slice(&buf[..n])).await {
                    return;
                }
            }
            Err(err) => {
                tx.fail(TransportError::Io(err)).await;
                return;
            }
        }
    }
}

/// Write and flush all of `buf`, bounded by `timeout` when set
pub async fn write_all_timeout<W>(
    writer: &mut W,
    buf: &[u8],
    timeout: Option<Duration>,
) -> Result<usize, TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let write = async {
        writer.write_all(buf).await?;
        writer.flush().await?;
        Ok::<usize, TransportError>(buf.len())
    };

    match timeout {
        Some(limit) => tokio::time::timeout(limit, write)
            .await
            .map_err(|_| TransportError::Timeout(limit))?,
        None => write.await,
    }
}

/// A connected socket: write half, reader task and receive channel
pub(crate) struct SocketLink {
    writer: WriteHalf<IoStream>,
    reader: JoinHandle<()>,
    rx: ChunkReceiver,
}

impl SocketLink {
    pub(crate) fn spawn(stream: IoStream) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        let (tx, rx) = chunk_channel();
        let reader = tokio::spawn(relay_reads(read_half, tx));

        Self { writer, reader, rx }
    }

    pub(crate) async fn write(
        &mut self,
        buf: &[u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        write_all_timeout(&mut self.writer, buf, timeout).await
    }

    pub(crate) async fn next_chunk(&mut self) -> Chunk {
        self.rx.next().await
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.rx.is_finished()
    }

    pub(crate) async fn shutdown(mut self, name: &str) {
        self.reader.abort();
        if let Err(err) = self.writer.shutdown().await {
            debug!("{}: shutdown: {}", name, err);
        }
    }
}
