//! Building transports from configuration.

use crate::config::{BridgeConfig, Upstream};
use crate::error::{BridgeError, Side};
use guri_transport::{SerialTransport, StdioTransport, TcpTransport, TlsTransport, Transport};

/// The serial link to the radio module
pub fn downstream(config: &BridgeConfig) -> Box<dyn Transport> {
    Box::new(SerialTransport::new(config.device.clone(), config.serial.clone()))
}

/// The configured upstream link, not yet connected
pub fn upstream(config: &BridgeConfig) -> Result<Box<dyn Transport>, BridgeError> {
    let transport: Box<dyn Transport> = match &config.upstream {
        Upstream::Stdio => Box::new(StdioTransport::process()),
        Upstream::Tcp { remote } => Box::new(TcpTransport::new(remote.clone())),
        Upstream::Tls { remote, ca_bundle } => Box::new(
            TlsTransport::with_ca_bundle(remote.clone(), ca_bundle.as_deref()).map_err(|source| {
                BridgeError::Transport {
                    side: Side::Upstream,
                    source,
                }
            })?,
        ),
    };
    Ok(transport)
}
