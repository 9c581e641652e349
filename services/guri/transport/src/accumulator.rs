//! Inter-byte silence framing for the serial line.
//!
//! The radio streams a frame back-to-back at line speed with no length
//! prefix. Raw reads are buffered here and flushed as one chunk once the
//! line has been quiet for the silence window.

use crate::chunk::ChunkSender;
use crate::error::TransportError;
use bytes::{Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Collect raw reads from `raw` and publish them on `tx` after each
/// silence window.
///
/// Pending bytes are flushed before the stream ends, whether the reader
/// closed `raw` or reported an error.
pub async fn accumulate(
    mut raw: mpsc::Receiver<io::Result<Bytes>>,
    tx: ChunkSender,
    silence: Duration,
) {
    let mut pending = BytesMut::new();

    loop {
        let next = if pending.is_empty() {
            raw.recv().await
        } else {
            match tokio::time::timeout(silence, raw.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    trace!("serial: flushing {} bytes after silence", pending.len());
                    if !tx.send(pending.split().freeze()).await {
                        return;
                    }
                    continue;
                }
            }
        };

        match next {
            Some(Ok(bytes)) => pending.extend_from_slice(&bytes),
            Some(Err(err)) => {
                if !pending.is_empty() {
                    tx.send(pending.split().freeze()).await;
                }
                tx.fail(TransportError::Io(err)).await;
                return;
            }
            None => {
                if !pending.is_empty() {
                    tx.send(pending.split().freeze()).await;
                }
                tx.end().await;
                return;
            }
        }
    }
}
