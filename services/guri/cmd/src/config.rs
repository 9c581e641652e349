//! Configuration handling for guri.
//!
//! Settings come from up to three sources, each overriding the one before:
//! an optional YAML file, `GURI_*` environment variables and the command
//! line. The merged result is turned into one immutable `BridgeConfig`.

use anyhow::{bail, Context, Result};
use guri_bridge::{BridgeConfig, Upstream, DEFAULT_REMOTE};
use guri_transport::RetryLimit;
use guri_wire::Address;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// One layer of settings; unset fields defer to lower layers
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Serial device path
    pub device: Option<String>,
    /// Upstream `host:port`
    pub remote: Option<String>,
    /// Desired network ID
    pub nid: Option<Address>,
    /// Desired system ID
    pub sid: Option<Address>,
    /// Desired unique ID
    pub uid: Option<Address>,
    /// Check identity before bridging
    pub verify: Option<bool>,
    /// Provision the module before bridging
    pub auto_configure: Option<bool>,
    /// Use stdin/stdout instead of a network peer
    pub stdio: Option<bool>,
    /// Wrap the network peer in TLS
    pub tls: Option<bool>,
    /// CA bundle for TLS
    pub tls_ca: Option<PathBuf>,
    /// Reconnect lost links
    pub reconnect: Option<bool>,
    /// First reconnect delay
    #[serde(deserialize_with = "human_duration")]
    pub backoff_initial: Option<Duration>,
    /// Reconnect delay cap
    #[serde(deserialize_with = "human_duration")]
    pub backoff_max: Option<Duration>,
    /// Reconnect delay growth factor
    pub backoff_factor: Option<f64>,
    /// Reconnect budget: negative retries forever, 0 never
    pub max_retries: Option<i64>,
    /// How long to wait for the configuration prompt
    #[serde(deserialize_with = "human_duration")]
    pub entry_timeout: Option<Duration>,
}

fn human_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{}: expected a boolean, got {:?}", key, other),
    }
}

fn parse_address(key: &str, value: &str) -> Result<Address> {
    value
        .parse()
        .with_context(|| format!("{}: invalid address {:?}", key, value))
}

impl Settings {
    /// Read a YAML settings file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let settings = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(settings)
    }

    /// Settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Settings from `GURI_*` variables as returned by `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(remote) = lookup("GURI_REMOTE") {
            settings.remote = Some(remote);
        }
        for (key, slot) in [
            ("GURI_NID", &mut settings.nid),
            ("GURI_SID", &mut settings.sid),
            ("GURI_UID", &mut settings.uid),
        ] {
            if let Some(value) = lookup(key) {
                *slot = Some(parse_address(key, &value)?);
            }
        }
        for (key, slot) in [
            ("GURI_TLS", &mut settings.tls),
            ("GURI_RECONNECT", &mut settings.reconnect),
        ] {
            if let Some(value) = lookup(key) {
                *slot = Some(parse_bool(key, &value)?);
            }
        }
        if let Some(ca) = lookup("GURI_TLS_CA") {
            settings.tls_ca = Some(PathBuf::from(ca));
        }

        Ok(settings)
    }

    /// Overlay `higher` on top of `self`
    pub fn merge(self, higher: Settings) -> Settings {
        Settings {
            device: higher.device.or(self.device),
            remote: higher.remote.or(self.remote),
            nid: higher.nid.or(self.nid),
            sid: higher.sid.or(self.sid),
            uid: higher.uid.or(self.uid),
            verify: higher.verify.or(self.verify),
            auto_configure: higher.auto_configure.or(self.auto_configure),
            stdio: higher.stdio.or(self.stdio),
            tls: higher.tls.or(self.tls),
            tls_ca: higher.tls_ca.or(self.tls_ca),
            reconnect: higher.reconnect.or(self.reconnect),
            backoff_initial: higher.backoff_initial.or(self.backoff_initial),
            backoff_max: higher.backoff_max.or(self.backoff_max),
            backoff_factor: higher.backoff_factor.or(self.backoff_factor),
            max_retries: higher.max_retries.or(self.max_retries),
            entry_timeout: higher.entry_timeout.or(self.entry_timeout),
        }
    }

    /// Fill in defaults and produce the bridge configuration
    pub fn build(self) -> Result<BridgeConfig> {
        let Some(device) = self.device else {
            bail!("a serial device path is required (see --list)");
        };

        let mut config = BridgeConfig::new(device);
        config.identity.nid = self.nid.unwrap_or(Address::WILDCARD);
        config.identity.sid = self.sid.unwrap_or(Address::WILDCARD);
        config.identity.uid = self.uid.unwrap_or(Address::WILDCARD);
        config.verify = self.verify.unwrap_or(true);
        config.auto_configure = self.auto_configure.unwrap_or(false);
        config.reconnect = self.reconnect.unwrap_or(true);

        let remote = self.remote.unwrap_or_else(|| DEFAULT_REMOTE.to_string());
        config.upstream = if self.stdio.unwrap_or(false) {
            Upstream::Stdio
        } else if self.tls.unwrap_or(true) {
            Upstream::Tls {
                remote,
                ca_bundle: self.tls_ca,
            }
        } else {
            Upstream::Tcp { remote }
        };

        if let Some(initial) = self.backoff_initial {
            config.backoff.initial = initial;
        }
        if let Some(max_delay) = self.backoff_max {
            config.backoff.max_delay = max_delay;
        }
        if let Some(factor) = self.backoff_factor {
            if !factor.is_finite() || factor < 1.0 {
                bail!("backoff factor must be at least 1.0, got {}", factor);
            }
            config.backoff.factor = factor;
        }
        let retries = self
            .max_retries
            .unwrap_or(if config.reconnect { -1 } else { 0 });
        config.backoff.limit = RetryLimit::from_count(retries);

        if let Some(entry) = self.entry_timeout {
            config.timing.entry = entry;
        }

        Ok(config)
    }
}
