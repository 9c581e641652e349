//! Identity verification through a get-NID request.
//!
//! Verification never touches configuration mode: a module that is already
//! sitting at the prompt is reported rather than silently taken out of it.

use crate::config_mode::{ConfigMode, ConfigState};
use crate::error::{ConfigError, IdentityField};
use crate::identity::Identity;
use guri_wire::{get_nid, Address, GenericEvent};
use tracing::{debug, info};

fn check(field: IdentityField, expected: Address, actual: Address) -> Result<(), ConfigError> {
    if expected.matches(&actual) {
        Ok(())
    } else {
        Err(ConfigError::IdentityMismatch {
            field,
            expected,
            actual,
        })
    }
}

/// Compare a get-NID reply against the desired identity, network ID first
pub fn check_identity(event: &GenericEvent, desired: &Identity) -> Result<(), ConfigError> {
    check(IdentityField::Nid, desired.nid, event.address())?;
    check(IdentityField::Sid, desired.sid, event.sid())?;
    check(IdentityField::Uid, desired.uid, event.uid())
}

impl ConfigMode<'_> {
    /// Ask the module for its identity and compare it with `desired`.
    ///
    /// Any non-conforming reply (undecodable, not a get-NID answer, or from
    /// a module with other IDs) counts as one attempt and the request is
    /// repeated up to the configured number of attempts. When the last
    /// attempt got a mismatching answer, that mismatch is returned. No reply
    /// at all fails straight away.
    pub async fn verify(&mut self, desired: &Identity) -> Result<GenericEvent, ConfigError> {
        let result = self.verify_inner(desired).await;
        self.state = match result {
            Ok(_) => ConfigState::Verified,
            Err(_) => ConfigState::Failed,
        };
        result
    }

    async fn verify_inner(&mut self, desired: &Identity) -> Result<GenericEvent, ConfigError> {
        if self.probe().await? {
            return Err(ConfigError::DeviceInConfigMode);
        }

        let attempts = self.timing.verify_attempts.max(1);
        let mut last = String::new();
        let mut mismatch = None;

        for attempt in 1..=attempts {
            self.send(&get_nid()).await?;

            let reply = self
                .transport
                .recv(self.timing.verify_reply)
                .await?
                .ok_or(ConfigError::Timeout { step: "get-NID reply" })?;

            match GenericEvent::decode(&reply) {
                Ok(event) if event.is_nid_reply() => match check_identity(&event, desired) {
                    Ok(()) => {
                        info!(
                            "{}: verified nid={} sid={} uid={}",
                            self.transport.name(),
                            event.address(),
                            event.sid(),
                            event.uid()
                        );
                        return Ok(event);
                    }
                    Err(err) => {
                        last = err.to_string();
                        mismatch = Some(err);
                    }
                },
                Ok(event) => {
                    last = format!("unexpected event detail {}", event.detail());
                    mismatch = None;
                }
                Err(err) => {
                    last = err.to_string();
                    mismatch = None;
                }
            }
            debug!(
                "{}: get-NID attempt {}/{}: {}",
                self.transport.name(),
                attempt,
                attempts,
                last
            );
        }

        if let Some(err) = mismatch {
            return Err(err);
        }
        Err(ConfigError::Protocol(format!(
            "no get-NID reply after {} attempts: {}",
            attempts, last
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_mode::ConfigTiming;
    use crate::testing::FakeDevice;
    use guri_transport::testing::{MockHandle, MockTransport};
    use guri_transport::Transport;
    use guri_wire::PROBE;

    fn identity(nid: [u8; 4], sid: [u8; 4], uid: [u8; 4]) -> Identity {
        Identity {
            nid: Address::new(nid),
            sid: Address::new(sid),
            uid: Address::new(uid),
        }
    }

    async fn connected(device: &FakeDevice) -> (MockTransport, MockHandle) {
        let (mock, handle) = MockTransport::new("serial:mock");
        let mut mock = mock.with_responder(device.responder());
        mock.connect().await.unwrap();
        (mock, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wildcards_verify_on_first_attempt() {
        let device = FakeDevice::new(&identity([1, 2, 3, 4], [5, 6, 7, 8], [9, 9, 9, 9]));
        let (mut mock, handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let event = config.verify(&Identity::default()).await.unwrap();

        assert_eq!(config.state(), ConfigState::Verified);
        assert_eq!(event.address(), Address::new([1, 2, 3, 4]));
        assert_eq!(handle.writes(), vec![vec![PROBE], get_nid().to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_identity_verifies() {
        let current = identity([1, 2, 3, 4], [5, 6, 7, 8], [9, 9, 9, 9]);
        let device = FakeDevice::new(&current);
        let (mut mock, _handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        assert!(config.verify(&current).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_in_config_mode_is_reported() {
        let device = FakeDevice::new(&Identity::default());
        device.state().in_config = true;
        let (mut mock, handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let err = config.verify(&Identity::default()).await.unwrap_err();

        assert!(matches!(err, ConfigError::DeviceInConfigMode));
        assert_eq!(config.state(), ConfigState::Failed);
        // Never leaves config mode on its own
        assert_eq!(handle.writes(), vec![vec![PROBE]]);
        assert!(device.state().in_config);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatch_names_field() {
        let device = FakeDevice::new(&identity([1, 2, 3, 4], [5, 6, 7, 8], [9, 9, 9, 9]));
        let (mut mock, handle) = connected(&device).await;

        let desired = identity([0; 4], [5, 6, 7, 0xff], [0; 4]);
        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let err = config.verify(&desired).await.unwrap_err();

        match err {
            ConfigError::IdentityMismatch { field, expected, actual } => {
                assert_eq!(field, IdentityField::Sid);
                assert_eq!(expected, Address::new([5, 6, 7, 0xff]));
                assert_eq!(actual, Address::new([5, 6, 7, 8]));
            }
            other => panic!("expected mismatch, got {:?}", other),
        }

        // A mismatching answer may come from another module; it is retried
        let requests = handle
            .writes()
            .iter()
            .filter(|w| w[..] == get_nid())
            .count();
        assert_eq!(requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nid_checked_before_sid_and_uid() {
        let device = FakeDevice::new(&identity([1, 1, 1, 1], [2, 2, 2, 2], [3, 3, 3, 3]));
        let (mut mock, _handle) = connected(&device).await;

        let desired = identity([9, 9, 9, 9], [9, 9, 9, 9], [9, 9, 9, 9]);
        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let err = config.verify(&desired).await.unwrap_err();

        assert!(matches!(err, ConfigError::IdentityMismatch { field: IdentityField::Nid, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chatter_is_retried() {
        let device = FakeDevice::new(&Identity::default());
        device.state().chatter_before_reply = 2;
        let (mut mock, handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        config.verify(&Identity::default()).await.unwrap();

        let requests = handle
            .writes()
            .iter()
            .filter(|w| w[..] == get_nid())
            .count();
        assert_eq!(requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chatter_exhausts_attempts() {
        let device = FakeDevice::new(&Identity::default());
        device.state().chatter_before_reply = 3;
        let (mut mock, _handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let err = config.verify(&Identity::default()).await.unwrap_err();

        assert!(matches!(err, ConfigError::Protocol(_)));
        assert_eq!(config.state(), ConfigState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_reply_counts_as_attempt() {
        let (mock, _handle) = MockTransport::new("serial:mock");
        let mut mock = mock.with_responder(|buf| {
            if buf.len() == 10 {
                vec![guri_transport::Chunk::Data(bytes::Bytes::from_static(b"\x10garbage"))]
            } else {
                Vec::new()
            }
        });
        mock.connect().await.unwrap();

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let err = config.verify(&Identity::default()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Protocol(ref msg) if msg.contains("35 bytes")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reply_times_out() {
        let device = FakeDevice::new(&Identity::default());
        device.state().silent = true;
        let (mut mock, _handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let err = config.verify(&Identity::default()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Timeout { step: "get-NID reply" }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_link_is_a_transport_error() {
        let device = FakeDevice::new(&Identity::default());
        let (mut mock, _handle) = connected(&device).await;
        mock.close().await.unwrap();

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let err = config.verify(&Identity::default()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Transport(_)));
    }
}
