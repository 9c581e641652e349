//! One-off device preparation before bridging.

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use guri_tinymesh::{ConfigMode, ProvisionReport};
use guri_transport::Transport;
use tracing::info;

/// Provision and/or verify the module on `downstream` as `config` asks.
///
/// Any failure is fatal to the bridge: forwarding for a module whose
/// identity is wrong or unknown is never attempted.
pub async fn prepare_device(
    downstream: &mut dyn Transport,
    config: &BridgeConfig,
) -> Result<Option<ProvisionReport>, BridgeError> {
    let mut device = ConfigMode::new(downstream, config.timing.clone());

    let report = if config.auto_configure {
        info!("Provisioning device for {}", config.identity);
        Some(device.provision(&config.identity).await?)
    } else {
        None
    };

    if config.verify {
        device.verify(&config.identity).await?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use guri_tinymesh::testing::FakeDevice;
    use guri_tinymesh::{ConfigError, Identity, IdentityField};
    use guri_transport::testing::MockTransport;
    use guri_wire::Address;

    fn config(auto_configure: bool, verify: bool, identity: Identity) -> BridgeConfig {
        BridgeConfig {
            auto_configure,
            verify,
            identity,
            ..BridgeConfig::new("/dev/null")
        }
    }

    async fn device_link(device: &FakeDevice) -> MockTransport {
        let (mock, _handle) = MockTransport::new("serial:mock");
        let mut mock = mock.with_responder(device.responder());
        mock.connect().await.unwrap();
        mock
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_then_verify() {
        let device = FakeDevice::new(&Identity::default());
        let mut link = device_link(&device).await;
        let desired = Identity {
            nid: Address::new([1, 2, 3, 4]),
            sid: Address::new([5, 6, 7, 8]),
            uid: Address::WILDCARD,
        };

        let report = prepare_device(&mut link, &config(true, true, desired))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.calibration.len(), 4);
        assert_eq!(device.identity().nid, desired.nid);
        assert_eq!(device.identity().sid, desired.sid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_failure_is_fatal() {
        let device = FakeDevice::new(&Identity::default());
        let mut link = device_link(&device).await;
        let desired = Identity {
            uid: Address::new([1, 1, 1, 1]),
            ..Identity::default()
        };

        let err = prepare_device(&mut link, &config(false, true, desired))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BridgeError::Startup(ConfigError::IdentityMismatch { field: IdentityField::Uid, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_requested_touches_nothing() {
        let (mock, handle) = MockTransport::new("serial:mock");
        let mut mock = mock;
        mock.connect().await.unwrap();

        let report = prepare_device(&mut mock, &config(false, false, Identity::default()))
            .await
            .unwrap();

        assert!(report.is_none());
        assert!(handle.writes().is_empty());
    }
}
