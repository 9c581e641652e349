//! Receive-side channel shared by all bindings.

use crate::error::TransportError;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Capacity of a transport's receive channel
pub const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// One item on a transport's receive path
#[derive(Debug)]
pub enum Chunk {
    /// Bytes read from the link, never empty
    Data(Bytes),
    /// The link reached end-of-stream
    EndOfStream,
    /// The link failed with a read error
    Error(TransportError),
}

/// Create a bounded chunk channel
pub fn chunk_channel() -> (ChunkSender, ChunkReceiver) {
    let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
    (ChunkSender { tx }, ChunkReceiver::new(rx))
}

/// Producer half, owned by a binding's background reader.
///
/// Ending the stream consumes the sender, so the terminal signal can only be
/// sent once.
#[derive(Debug)]
pub struct ChunkSender {
    tx: mpsc::Sender<Chunk>,
}

impl ChunkSender {
    /// Publish data. Returns false once the receiver is gone.
    pub async fn send(&self, data: Bytes) -> bool {
        if data.is_empty() {
            return true;
        }
        self.tx.send(Chunk::Data(data)).await.is_ok()
    }

    /// Signal end-of-stream
    pub async fn end(self) {
        let _ = self.tx.send(Chunk::EndOfStream).await;
    }

    /// Signal a fatal read error
    pub async fn fail(self, err: TransportError) {
        let _ = self.tx.send(Chunk::Error(err)).await;
    }

    /// Whether the receiver has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the transport.
///
/// Latches the first terminal chunk: every later call reports
/// [`Chunk::EndOfStream`] without touching the channel.
#[derive(Debug)]
pub struct ChunkReceiver {
    rx: mpsc::Receiver<Chunk>,
    finished: bool,
}

impl ChunkReceiver {
    pub(crate) fn new(rx: mpsc::Receiver<Chunk>) -> Self {
        Self { rx, finished: false }
    }

    /// Wait for the next chunk. Cancel safe.
    pub async fn next(&mut self) -> Chunk {
        if self.finished {
            return Chunk::EndOfStream;
        }

        match self.rx.recv().await {
            Some(Chunk::Data(data)) => Chunk::Data(data),
            Some(terminal) => {
                self.finished = true;
                self.rx.close();
                terminal
            }
            // Sender dropped without an explicit signal
            None => {
                self.finished = true;
                Chunk::EndOfStream
            }
        }
    }

    /// Whether the stream has ended
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
