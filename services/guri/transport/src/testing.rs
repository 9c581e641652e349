//! Scripted in-memory transport for tests.
//!
//! [`MockTransport`] records every write and can answer writes through a
//! responder closure, which is enough to play the radio module's side of
//! the configuration dialogue. The paired [`MockHandle`] stays with the test
//! to push chunks, inspect writes and make `connect` fail.

use crate::chunk::{Chunk, ChunkReceiver, CHUNK_CHANNEL_CAPACITY};
use crate::error::TransportError;
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// Reacts to a write with the chunks the device would send back
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Chunk> + Send>;

#[derive(Default)]
struct MockState {
    writes: Vec<Vec<u8>>,
    injector: Option<mpsc::Sender<Chunk>>,
    connect_failures: u32,
    connects: u32,
    closes: u32,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory transport driven by a [`MockHandle`]
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockState>>,
    rx: Option<ChunkReceiver>,
    responder: Option<Responder>,
}

/// Test-side control of a [`MockTransport`]
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a disconnected mock and its handle
    pub fn new(name: impl Into<String>) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let transport = Self {
            name: name.into(),
            state: Arc::clone(&state),
            rx: None,
            responder: None,
        };
        (transport, MockHandle { state })
    }

    /// Answer each write with the chunks `responder` returns
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Chunk> + Send + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| !rx.is_finished())
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock connect failure",
            )));
        }

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        state.injector = Some(tx);
        state.connects += 1;
        self.rx = Some(ChunkReceiver::new(rx));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.injector = None;
        state.closes += 1;
        self.rx = None;
        Ok(())
    }

    async fn write(
        &mut self,
        buf: &[u8],
        _timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        if self.rx.is_none() {
            return Err(TransportError::NotConnected);
        }

        let replies = match self.responder.as_mut() {
            Some(responder) => responder(buf),
            None => Vec::new(),
        };

        let mut state = lock(&self.state);
        state.writes.push(buf.to_vec());
        if let Some(injector) = state.injector.as_ref() {
            for reply in replies {
                let _ = injector.try_send(reply);
            }
        }
        Ok(buf.len())
    }

    async fn next_chunk(&mut self) -> Chunk {
        match self.rx.as_mut() {
            Some(rx) => rx.next().await,
            None => Chunk::EndOfStream,
        }
    }
}

impl MockHandle {
    /// Push a chunk onto the current connection's receive path.
    ///
    /// Returns false when the mock is not connected.
    pub fn inject(&self, chunk: Chunk) -> bool {
        let state = lock(&self.state);
        match state.injector.as_ref() {
            Some(injector) => injector.try_send(chunk).is_ok(),
            None => false,
        }
    }

    /// Push bytes as one chunk
    pub fn send(&self, data: &[u8]) -> bool {
        self.inject(Chunk::Data(Bytes::copy_from_slice(data)))
    }

    /// End the current connection's receive path
    pub fn end_stream(&self) -> bool {
        self.inject(Chunk::EndOfStream)
    }

    /// Every write so far, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.state).writes.clone()
    }

    /// Make the next `count` connects fail
    pub fn fail_connects(&self, count: u32) {
        lock(&self.state).connect_failures = count;
    }

    /// Successful connects so far
    pub fn connects(&self) -> u32 {
        lock(&self.state).connects
    }

    /// Closes so far
    pub fn closes(&self) -> u32 {
        lock(&self.state).closes
    }
}
