//! Configuration-mode error types.

use crate::memory::MemoryPage;
use guri_transport::TransportError;
use guri_wire::Address;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which identifier failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    /// Network ID
    Nid,
    /// System ID
    Sid,
    /// Unique ID
    Uid,
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityField::Nid => write!(f, "network ID"),
            IdentityField::Sid => write!(f, "system ID"),
            IdentityField::Uid => write!(f, "unique ID"),
        }
    }
}

/// Errors raised while talking to the module in or around config mode
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The serial link failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A step that needs an answer got none in time
    #[error("timed out waiting for {step}")]
    Timeout {
        /// Protocol step that was waiting
        step: &'static str,
    },

    /// The module answered with something unexpected
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A memory dump was shorter than the offsets guri reads
    #[error("{page} memory too short: got {len} bytes, need {expected}")]
    MemoryTooShort {
        /// Page being read
        page: MemoryPage,
        /// Bytes received
        len: usize,
        /// Bytes required
        expected: usize,
    },

    /// The configuration prompt never appeared
    #[error("device did not enter configuration mode within {0:?}")]
    EntryTimeout(Duration),

    /// Verification found the module already in configuration mode
    #[error("device is in configuration mode; exit it manually before verifying")]
    DeviceInConfigMode,

    /// The module reports a different identity
    #[error("{field} mismatch: expected {expected}, device has {actual}")]
    IdentityMismatch {
        /// Identifier that differs
        field: IdentityField,
        /// Operator's value
        expected: Address,
        /// Module's value
        actual: Address,
    },
}
