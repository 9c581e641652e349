//! Bridge configuration.

use guri_tinymesh::{ConfigTiming, Identity};
use guri_transport::{BackoffPolicy, SerialSettings};
use std::fmt;
use std::path::PathBuf;

/// Upstream peer used unless another is configured
pub const DEFAULT_REMOTE: &str = "tcp.cloud.tiny-mesh.com:7002";

/// Which link carries radio traffic away from the module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream {
    /// This process's stdin/stdout
    Stdio,
    /// Plain TCP to `host:port`
    Tcp {
        /// Peer address
        remote: String,
    },
    /// TLS to `host:port`
    Tls {
        /// Peer address
        remote: String,
        /// CA bundle to trust instead of the system one
        ca_bundle: Option<PathBuf>,
    },
}

impl Default for Upstream {
    fn default() -> Self {
        Upstream::Tls {
            remote: DEFAULT_REMOTE.to_string(),
            ca_bundle: None,
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upstream::Stdio => write!(f, "stdio"),
            Upstream::Tcp { remote } => write!(f, "tcp://{}", remote),
            Upstream::Tls { remote, .. } => write!(f, "tls://{}", remote),
        }
    }
}

/// Everything the bridge needs to know, fixed for the life of the process
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Serial device path of the radio module
    pub device: String,
    /// Desired module identity; wildcard fields are not checked
    pub identity: Identity,
    /// Check the module's identity before bridging
    pub verify: bool,
    /// Provision gateway role and identity before bridging
    pub auto_configure: bool,
    /// Upstream link
    pub upstream: Upstream,
    /// Reconnect links that end instead of exiting
    pub reconnect: bool,
    /// Reconnect pacing
    pub backoff: BackoffPolicy,
    /// Serial line timing
    pub serial: SerialSettings,
    /// Configuration-mode deadlines
    pub timing: ConfigTiming,
}

impl BridgeConfig {
    /// Defaults for the module at `device`
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            identity: Identity::default(),
            verify: true,
            auto_configure: false,
            upstream: Upstream::default(),
            reconnect: true,
            backoff: BackoffPolicy::default(),
            serial: SerialSettings::default(),
            timing: ConfigTiming::default(),
        }
    }
}
