//! Bridge error types.

use guri_tinymesh::ConfigError;
use guri_transport::{RetryError, TransportError};
use std::fmt;
use thiserror::Error;

/// The two ends of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The radio module's serial line
    Downstream,
    /// The remote peer
    Upstream,
}

impl Side {
    /// The other end
    pub fn other(self) -> Self {
        match self {
            Side::Downstream => Side::Upstream,
            Side::Upstream => Side::Downstream,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Downstream => write!(f, "downstream"),
            Side::Upstream => write!(f, "upstream"),
        }
    }
}

/// Errors that stop the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Provisioning or verification failed; the module cannot be trusted
    #[error("device setup failed: {0}")]
    Startup(#[from] ConfigError),

    /// A link could not be set up
    #[error("{side}: {source}")]
    Transport {
        /// Affected end
        side: Side,
        /// Cause
        #[source]
        source: TransportError,
    },

    /// A link ended and reconnecting is disabled
    #[error("{side} stream closed")]
    StreamClosed {
        /// Affected end
        side: Side,
    },

    /// Reconnecting ran out of attempts
    #[error("{side} reconnect failed: {source}")]
    ReconnectFailed {
        /// Affected end
        side: Side,
        /// Cause
        #[source]
        source: RetryError<TransportError>,
    },
}
