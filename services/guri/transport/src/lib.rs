//! Byte transports for guri.
//!
//! Every link guri bridges (the radio's serial line, a TCP or TLS socket,
//! or the process's own standard streams) is driven through the same
//! [`Transport`] trait, so the forwarding loop and the configuration-mode
//! state machine never see a concrete binding.
//!
//! ## Receive path
//!
//! Each binding runs one background reader that publishes [`Chunk`]s into a
//! bounded channel. The stream ends exactly once, with either
//! [`Chunk::EndOfStream`] or [`Chunk::Error`]; after that the receiver only
//! reports end-of-stream and never yields data again.
//!
//! ## Bindings
//!
//! - **Serial**: 8N1 line with an inter-byte silence accumulator that
//!   rebuilds radio frame boundaries
//! - **TCP / TLS**: byte-transparent socket relay
//! - **Stdio**: relay over any `AsyncRead`/`AsyncWrite` pair
//!
//! Reconnection is driven from outside through [`Backoff::until`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accumulator;
pub mod backoff;
pub mod chunk;
pub mod error;
pub mod serial;
pub mod stdio;
pub mod stream;
pub mod tcp;
pub mod tls;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export main types
pub use backoff::{Backoff, BackoffPolicy, RetryError, RetryLimit};
pub use chunk::{chunk_channel, Chunk, ChunkReceiver, ChunkSender, CHUNK_CHANNEL_CAPACITY};
pub use error::TransportError;
pub use serial::{SerialSettings, SerialTransport};
pub use stdio::StdioTransport;
pub use tcp::TcpTransport;
pub use tls::TlsTransport;
pub use transport::Transport;
