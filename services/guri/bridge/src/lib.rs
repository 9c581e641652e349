//! The guri bridge: one radio module on a serial line, one remote peer.
//!
//! [`run`] opens the serial link, optionally provisions and verifies the
//! module's identity, dials the upstream peer and then hands both links to
//! the [`Forwarder`], which relays bytes until a link ends for good or the
//! shutdown signal fires.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connect;
pub mod error;
pub mod forward;
pub mod startup;

// Re-export main types
pub use config::{BridgeConfig, Upstream, DEFAULT_REMOTE};
pub use error::{BridgeError, Side};
pub use forward::{split_payload, Forwarder};
pub use startup::prepare_device;

use guri_transport::{Backoff, Transport};
use std::future::Future;
use tracing::info;

/// Run the bridge described by `config` until `shutdown` resolves or a
/// link fails beyond recovery
pub async fn run<F>(config: &BridgeConfig, shutdown: F) -> Result<(), BridgeError>
where
    F: Future<Output = ()>,
{
    let mut downstream = connect::downstream(config);
    downstream
        .connect()
        .await
        .map_err(|source| BridgeError::Transport {
            side: Side::Downstream,
            source,
        })?;

    if let Some(report) = prepare_device(downstream.as_mut(), config).await? {
        info!("Provisioning: {}", report);
    }

    let mut upstream = connect::upstream(config)?;
    let mut backoff = Backoff::new(config.backoff.clone());
    let name = upstream.name().to_string();
    backoff
        .until(&name, upstream.as_mut(), |transport| transport.connect())
        .await
        .map_err(|source| BridgeError::ReconnectFailed {
            side: Side::Upstream,
            source,
        })?;

    Forwarder::new(downstream, upstream, config).run(shutdown).await
}
