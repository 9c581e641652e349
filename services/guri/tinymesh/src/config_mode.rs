//! The configuration-mode state machine.

use crate::error::ConfigError;
use crate::identity::Identity;
use crate::memory::{CalibrationPage, ConfigValue, ConfigurationPage, MemoryPage};
use bytes::{Bytes, BytesMut};
use guri_transport::Transport;
use guri_wire::{set_gateway_config_mode, Address, ConfigCommand, CONFIG_PROMPT, MEMORY_TERMINATOR, PROBE};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Where the module stands with respect to configuration mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigState {
    /// Nothing known yet
    Unknown,
    /// Probe sent, waiting for the prompt
    Probing,
    /// Module showed the configuration prompt
    InConfig,
    /// Module did not answer the probe with a prompt
    NotInConfig,
    /// Reading and rewriting memory
    Provisioning,
    /// Identity confirmed by a get-NID reply
    Verified,
    /// Provisioning or verification failed
    Failed,
    /// Provisioned and left configuration mode
    ExitedConfig,
}

/// Deadlines used while talking to the module
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTiming {
    /// How long to wait for the prompt after a probe
    pub probe: Duration,
    /// Interval between prompt checks while waiting to enter config mode
    pub poll_interval: Duration,
    /// How long to wait for a memory dump
    pub memory_read: Duration,
    /// Quiet period that stale input is drained for before a command
    pub drain: Duration,
    /// How long to wait for the prompt after a command
    pub prompt: Duration,
    /// How long to wait for config mode after the enter command
    pub entry: Duration,
    /// How long to wait for a get-NID reply
    pub verify_reply: Duration,
    /// Get-NID requests sent before giving up on chatter
    pub verify_attempts: u32,
}

impl Default for ConfigTiming {
    fn default() -> Self {
        Self {
            probe: Duration::from_millis(500),
            poll_interval: Duration::from_millis(500),
            memory_read: Duration::from_millis(255),
            drain: Duration::from_millis(20),
            prompt: Duration::from_secs(2),
            entry: Duration::from_secs(60),
            verify_reply: Duration::from_secs(1),
            verify_attempts: 3,
        }
    }
}

/// What provisioning changed on the module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Identity read from memory before any change
    pub previous: Identity,
    /// Module had to be switched to the gateway role
    pub gateway_enabled: bool,
    /// Pairs written to configuration memory
    pub configuration: Vec<ConfigValue>,
    /// Pairs written to calibration memory
    pub calibration: Vec<ConfigValue>,
}

impl ProvisionReport {
    /// Whether the module already matched
    pub fn is_unchanged(&self) -> bool {
        !self.gateway_enabled && self.configuration.is_empty() && self.calibration.is_empty()
    }
}

impl fmt::Display for ProvisionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unchanged() {
            return write!(f, "device already provisioned ({})", self.previous);
        }
        write!(
            f,
            "gateway mode {}, {} configuration and {} calibration bytes written",
            if self.gateway_enabled { "enabled" } else { "unchanged" },
            self.configuration.len(),
            self.calibration.len()
        )
    }
}

/// Whether `data` is the configuration prompt
pub(crate) fn is_prompt(data: &[u8]) -> bool {
    data.first() == Some(&CONFIG_PROMPT)
}

/// Drives one transport through configuration mode
pub struct ConfigMode<'a> {
    pub(crate) transport: &'a mut dyn Transport,
    pub(crate) timing: ConfigTiming,
    pub(crate) state: ConfigState,
}

impl<'a> ConfigMode<'a> {
    /// Start in [`ConfigState::Unknown`] on a connected transport
    pub fn new(transport: &'a mut dyn Transport, timing: ConfigTiming) -> Self {
        Self {
            transport,
            timing,
            state: ConfigState::Unknown,
        }
    }

    /// Current state
    pub fn state(&self) -> ConfigState {
        self.state
    }

    pub(crate) async fn send(&mut self, bytes: &[u8]) -> Result<(), ConfigError> {
        debug!("{}: -> {:02x?}", self.transport.name(), bytes);
        self.transport.write(bytes, None).await?;
        Ok(())
    }

    /// Discard whatever the module sent before `bytes`, then send them.
    ///
    /// A prompt left over from an earlier exchange would otherwise be read
    /// as the first byte of the reply.
    async fn command(&mut self, bytes: &[u8]) -> Result<(), ConfigError> {
        let mut discarded = 0;
        while let Some(data) = self.transport.recv(self.timing.drain).await? {
            discarded += data.len();
        }
        if discarded > 0 {
            debug!("{}: discarded {} stale bytes", self.transport.name(), discarded);
        }
        self.send(bytes).await
    }

    /// Check for the configuration prompt
    pub async fn probe(&mut self) -> Result<bool, ConfigError> {
        self.probe_for(self.timing.probe).await
    }

    async fn probe_for(&mut self, limit: Duration) -> Result<bool, ConfigError> {
        self.state = ConfigState::Probing;
        self.send(&[PROBE]).await?;

        let in_config = match self.transport.recv(limit).await? {
            Some(data) => is_prompt(&data),
            None => false,
        };

        self.state = if in_config {
            ConfigState::InConfig
        } else {
            ConfigState::NotInConfig
        };
        debug!("{}: probe -> {:?}", self.transport.name(), self.state);
        Ok(in_config)
    }

    /// Wait until a chunk starting with the prompt arrives, skipping chatter
    async fn wait_for_prompt(&mut self, limit: Duration) -> Result<bool, ConfigError> {
        let deadline = Instant::now() + limit;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }

            match self.transport.recv(remaining.min(self.timing.poll_interval)).await? {
                Some(data) if is_prompt(&data) => return Ok(true),
                Some(data) => debug!("{}: ignoring {} bytes while waiting for prompt", self.transport.name(), data.len()),
                None => {}
            }
        }
    }

    async fn expect_prompt(&mut self, step: &'static str) -> Result<(), ConfigError> {
        if self.wait_for_prompt(self.timing.prompt).await? {
            Ok(())
        } else {
            Err(ConfigError::Timeout { step })
        }
    }

    /// Get the module into configuration mode.
    ///
    /// Sends the enter command addressed to `nid` only when the probe shows
    /// the module is not already there, then waits up to the entry timeout
    /// for the prompt (the module may need its button pressed).
    pub async fn enter(&mut self, nid: Address) -> Result<(), ConfigError> {
        if self.probe().await? {
            info!("{}: device already in configuration mode", self.transport.name());
            return Ok(());
        }

        info!("{}: requesting configuration mode", self.transport.name());
        self.send(&set_gateway_config_mode(nid)).await?;
        if self.probe().await? {
            return Ok(());
        }

        warn!(
            "{}: waiting for configuration mode, press the configuration button on the device",
            self.transport.name()
        );
        let deadline = Instant::now() + self.timing.entry;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if self.wait_for_prompt(self.timing.poll_interval.min(remaining)).await? {
                self.state = ConfigState::InConfig;
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if self.probe_for(self.timing.probe.min(remaining)).await? {
                return Ok(());
            }
        }

        self.state = ConfigState::Failed;
        Err(ConfigError::EntryTimeout(self.timing.entry))
    }

    /// Collect a memory dump.
    ///
    /// The dump may arrive in several chunks. Reading stops at the prompt
    /// that follows the page, which is stripped, or at the read deadline.
    async fn read_page(&mut self, command: ConfigCommand, page: MemoryPage) -> Result<Bytes, ConfigError> {
        self.command(command.bytes()).await?;

        let deadline = Instant::now() + self.timing.memory_read;
        let mut dump = BytesMut::new();

        loop {
            if dump.len() > page.min_len() && dump.last() == Some(&CONFIG_PROMPT) {
                dump.truncate(dump.len() - 1);
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.transport.recv(remaining).await? {
                Some(data) => dump.extend_from_slice(&data),
                None => break,
            }
        }

        if dump.is_empty() {
            return Err(ConfigError::Timeout {
                step: match page {
                    MemoryPage::Configuration => "configuration memory dump",
                    MemoryPage::Calibration => "calibration memory dump",
                },
            });
        }
        debug!("{}: read {} bytes of {} memory", self.transport.name(), dump.len(), page);
        Ok(dump.freeze())
    }

    /// Dump configuration memory
    pub async fn read_configuration(&mut self) -> Result<ConfigurationPage, ConfigError> {
        let raw = self
            .read_page(ConfigCommand::ReadConfiguration, MemoryPage::Configuration)
            .await?;
        ConfigurationPage::new(raw)
    }

    /// Dump calibration memory
    pub async fn read_calibration(&mut self) -> Result<CalibrationPage, ConfigError> {
        let raw = self
            .read_page(ConfigCommand::ReadCalibration, MemoryPage::Calibration)
            .await?;
        CalibrationPage::new(raw)
    }

    /// Switch to the gateway role unless `page` shows it already.
    ///
    /// Returns whether the command was sent.
    pub async fn ensure_gateway(&mut self, page: &ConfigurationPage) -> Result<bool, ConfigError> {
        if page.is_gateway() {
            return Ok(false);
        }

        info!(
            "{}: device type {} is not a gateway, enabling gateway mode",
            self.transport.name(),
            page.device_type()
        );
        self.command(ConfigCommand::EnableGateway.bytes()).await?;
        self.expect_prompt("gateway mode confirmation").await?;
        Ok(true)
    }

    async fn write_memory(
        &mut self,
        command: ConfigCommand,
        page: MemoryPage,
        values: &[ConfigValue],
    ) -> Result<(), ConfigError> {
        if values.is_empty() {
            return Ok(());
        }

        info!(
            "{}: writing {} memory: {}",
            self.transport.name(),
            page,
            values.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
        );
        self.command(command.bytes()).await?;
        self.expect_prompt("memory write prompt").await?;

        for value in values {
            self.send(&value.bytes()).await?;
        }

        self.send(&[MEMORY_TERMINATOR]).await?;
        self.expect_prompt("memory write confirmation").await
    }

    /// Write pairs to configuration memory
    pub async fn write_configuration(&mut self, values: &[ConfigValue]) -> Result<(), ConfigError> {
        self.write_memory(ConfigCommand::WriteConfiguration, MemoryPage::Configuration, values)
            .await
    }

    /// Write pairs to calibration memory
    pub async fn write_calibration(&mut self, values: &[ConfigValue]) -> Result<(), ConfigError> {
        self.write_memory(ConfigCommand::WriteCalibration, MemoryPage::Calibration, values)
            .await
    }

    /// Leave configuration mode.
    ///
    /// Not every firmware prints a prompt on exit, so a missing one only
    /// gets logged.
    pub async fn exit(&mut self) -> Result<(), ConfigError> {
        self.command(ConfigCommand::Exit.bytes()).await?;
        if !self.wait_for_prompt(self.timing.prompt).await? {
            debug!("{}: no prompt after exit", self.transport.name());
        }
        self.state = ConfigState::ExitedConfig;
        info!("{}: left configuration mode", self.transport.name());
        Ok(())
    }

    /// Enter configuration mode, bring gateway role and identity in line
    /// with `desired`, and exit again.
    ///
    /// On failure the module is asked to exit configuration mode before the
    /// error is returned.
    pub async fn provision(&mut self, desired: &Identity) -> Result<ProvisionReport, ConfigError> {
        if let Err(err) = self.enter(desired.nid).await {
            self.state = ConfigState::Failed;
            return Err(err);
        }
        self.state = ConfigState::Provisioning;

        match self.apply(desired).await {
            Ok(report) => {
                self.exit().await?;
                Ok(report)
            }
            Err(err) => {
                if let Err(exit_err) = self.exit().await {
                    warn!("{}: exit after failed provisioning: {}", self.transport.name(), exit_err);
                }
                self.state = ConfigState::Failed;
                Err(err)
            }
        }
    }

    async fn apply(&mut self, desired: &Identity) -> Result<ProvisionReport, ConfigError> {
        let configuration = self.read_configuration().await?;
        let calibration = self.read_calibration().await?;

        let previous = Identity {
            nid: calibration.nid(),
            sid: configuration.sid(),
            uid: configuration.uid(),
        };
        info!(
            "{}: device reports protocol={} type={} {}",
            self.transport.name(),
            configuration.using_protocol(),
            configuration.device_type(),
            previous
        );

        let gateway_enabled = self.ensure_gateway(&configuration).await?;

        let config_values = configuration.diff(desired);
        self.write_configuration(&config_values).await?;

        let calibration_values = calibration.diff(desired);
        self.write_calibration(&calibration_values).await?;

        Ok(ProvisionReport {
            previous,
            gateway_enabled,
            configuration: config_values,
            calibration: calibration_values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::memory::{DEVICE_TYPE_OFFSET, USING_PROTOCOL_OFFSET};
    use crate::testing::FakeDevice;
    use guri_transport::testing::{MockHandle, MockTransport};
    use guri_transport::Chunk;
    use guri_wire::{get_nid, PROBE};

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
    async fn test_probe_sees_prompt_without_entering() {
        let device = FakeDevice::new(&Identity::default());
        device.state().in_config = true;
        let (mut mock, handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        config.enter(Address::new([1, 2, 3, 4])).await.unwrap();

        assert_eq!(config.state(), ConfigState::InConfig);
        assert_eq!(handle.writes(), vec![vec![PROBE]]);
        assert_eq!(device.state().enter_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_means_not_in_config() {
        let device = FakeDevice::new(&Identity::default());
        let (mut mock, _handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        assert_eq!(config.state(), ConfigState::Unknown);
        assert!(!config.probe().await.unwrap());
        assert_eq!(config.state(), ConfigState::NotInConfig);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_ignores_non_prompt_reply() {
        let (mock, _handle) = MockTransport::new("serial:mock");
        let mut mock = mock.with_responder(|_| vec![Chunk::Data(bytes::Bytes::from_static(b"x>"))]);
        mock.connect().await.unwrap();

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        assert!(!config.probe().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_sends_command_with_nid() {
        let device = FakeDevice::new(&Identity::default());
        let (mut mock, handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        config.enter(Address::new([0xde, 0xad, 0xbe, 0xef])).await.unwrap();

        assert_eq!(config.state(), ConfigState::InConfig);
        assert_eq!(
            handle.writes(),
            vec![
                vec![PROBE],
                set_gateway_config_mode(Address::new([0xde, 0xad, 0xbe, 0xef])).to_vec(),
                vec![PROBE],
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_waits_for_button_press() {
        let device = FakeDevice::new(&Identity::default());
        device.state().enters_on_command = false;
        let (mut mock, _handle) = connected(&device).await;

        let pressed = device.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            pressed.state().in_config = true;
        });

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let start = Instant::now();
        config.enter(Address::WILDCARD).await.unwrap();

        assert_eq!(config.state(), ConfigState::InConfig);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_times_out() {
        let device = FakeDevice::new(&Identity::default());
        device.state().enters_on_command = false;
        let (mut mock, _handle) = connected(&device).await;

        let entry = Duration::from_millis(5_300);
        let timing = ConfigTiming {
            entry,
            ..Default::default()
        };
        let mut config = ConfigMode::new(&mut mock, timing);
        let start = Instant::now();
        let err = config.enter(Address::WILDCARD).await.unwrap_err();

        assert!(matches!(err, ConfigError::EntryTimeout(d) if d == entry));
        assert_eq!(config.state(), ConfigState::Failed);
        // Two initial probes, then the entry window with no overrun
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(6_300));
        assert!(elapsed < Duration::from_millis(6_310));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_rewrites_identity_and_gateway_role() {
        let current = identity([1, 1, 1, 1], [2, 2, 2, 2], [3, 3, 3, 3]);
        let desired = identity([1, 1, 1, 9], [2, 2, 2, 2], [3, 3, 4, 3]);
        let device = FakeDevice::new(&current);
        {
            let mut state = device.state();
            state.configuration[DEVICE_TYPE_OFFSET as usize] = 0;
            state.configuration[USING_PROTOCOL_OFFSET as usize] = 1;
        }
        let (mut mock, handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let report = config.provision(&desired).await.unwrap();

        assert_eq!(config.state(), ConfigState::ExitedConfig);
        assert_eq!(report.previous, current);
        assert!(report.gateway_enabled);
        assert_eq!(
            report.configuration,
            vec![ConfigValue::new(3, 0), ConfigValue::new(47, 4)]
        );
        assert_eq!(report.calibration, vec![ConfigValue::new(26, 9)]);
        assert!(!report.is_unchanged());

        assert_eq!(device.identity(), desired);
        {
            let state = device.state();
            assert_eq!(state.configuration[DEVICE_TYPE_OFFSET as usize], 1);
            assert_eq!(state.configuration[USING_PROTOCOL_OFFSET as usize], 0);
            assert!(!state.in_config);
        }

        let writes = handle.writes();
        let expected: Vec<Vec<u8>> = vec![
            vec![PROBE],
            set_gateway_config_mode(desired.nid).to_vec(),
            vec![PROBE],
            b"0".to_vec(),
            b"r".to_vec(),
            b"G".to_vec(),
            b"M".to_vec(),
            vec![3, 0],
            vec![47, 4],
            vec![MEMORY_TERMINATOR],
            b"HW".to_vec(),
            vec![26, 9],
            vec![MEMORY_TERMINATOR],
            b"X".to_vec(),
        ];
        assert_eq!(writes, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_matching_device_writes_nothing() {
        let current = identity([1, 1, 1, 1], [2, 2, 2, 2], [3, 3, 3, 3]);
        let device = FakeDevice::new(&current);
        device.state().in_config = true;
        let (mut mock, handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let report = config.provision(&current).await.unwrap();

        assert!(report.is_unchanged());
        assert_eq!(
            handle.writes(),
            vec![vec![PROBE], b"0".to_vec(), b"r".to_vec(), b"X".to_vec()]
        );
        assert!(!handle.writes().contains(&get_nid().to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dump_in_two_chunks_is_read_whole() {
        let current = identity([0xaa, 0xbb, 0xcc, 0xdd], [2, 2, 2, 2], [3, 3, 3, 3]);
        let device = FakeDevice::new(&current);
        {
            let mut state = device.state();
            state.in_config = true;
            state.dump_split = Some(60);
            state.configuration[60..].fill(0xee);
        }
        let (mut mock, _handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let configuration = config.read_configuration().await.unwrap();
        let calibration = config.read_calibration().await.unwrap();

        assert_eq!(configuration.uid(), current.uid);
        assert_eq!(configuration.sid(), current.sid);
        assert_eq!(calibration.nid(), current.nid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_with_split_dumps_keeps_nid() {
        let current = identity([0xaa, 0xbb, 0xcc, 0xdd], [2, 2, 2, 2], [3, 3, 3, 3]);
        let device = FakeDevice::new(&current);
        {
            let mut state = device.state();
            state.in_config = true;
            state.dump_split = Some(60);
            state.configuration[60..].fill(0xee);
        }
        let (mut mock, handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let report = config.provision(&current).await.unwrap();

        assert_eq!(report.previous, current);
        assert!(report.is_unchanged());
        assert!(!handle.writes().contains(&b"HW".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_left_over_from_entry_is_discarded() {
        let current = identity([0xaa, 0xbb, 0xcc, 0xdd], [0x55, 0x66, 0x77, 0x88], [0x11, 0x22, 0x33, 0x44]);
        let device = FakeDevice::new(&current);
        device.state().prompt_on_enter = true;
        let (mut mock, handle) = connected(&device).await;

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let report = config.provision(&Identity::default()).await.unwrap();

        assert_eq!(report.previous, current);
        assert!(!report.gateway_enabled);
        assert!(report.is_unchanged());
        assert!(!handle.writes().contains(&b"G".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_short_dump_fails_and_exits() {
        let (mock, handle) = MockTransport::new("serial:mock");
        let mut mock = mock.with_responder(|buf| match buf {
            [PROBE] => vec![Chunk::Data(bytes::Bytes::from_static(b">"))],
            b"0" => vec![Chunk::Data(bytes::Bytes::from(vec![0u8; 20]))],
            _ => Vec::new(),
        });
        mock.connect().await.unwrap();

        let mut config = ConfigMode::new(&mut mock, ConfigTiming::default());
        let err = config.provision(&Identity::default()).await.unwrap_err();

        assert!(matches!(err, ConfigError::MemoryTooShort { len: 20, .. }));
        assert_eq!(config.state(), ConfigState::Failed);
        assert_eq!(handle.writes().last().unwrap(), b"X");
    }
}
