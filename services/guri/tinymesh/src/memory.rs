//! Configuration and calibration memory pages.
//!
//! In config mode the module dumps each page as raw bytes. Only a handful of
//! offsets matter to guri:
//!
//! | Page | Offset | Meaning |
//! |---|---|---|
//! | configuration | 3 | protocol mode flag (must be 0 for transparent gateway) |
//! | configuration | 14 | device type (1 = gateway) |
//! | configuration | 45..49 | unique ID |
//! | configuration | 49..53 | system ID |
//! | calibration | 23..27 | network ID |

use crate::error::ConfigError;
use crate::identity::Identity;
use bytes::Bytes;
use guri_wire::{Address, ADDRESS_LEN};
use std::fmt;

/// Offset of the protocol mode flag in configuration memory
pub const USING_PROTOCOL_OFFSET: u8 = 3;
/// Offset of the device type in configuration memory
pub const DEVICE_TYPE_OFFSET: u8 = 14;
/// Device type of a gateway
pub const DEVICE_TYPE_GATEWAY: u8 = 1;
/// Offset of the unique ID in configuration memory
pub const UID_OFFSET: u8 = 45;
/// Offset of the system ID in configuration memory
pub const SID_OFFSET: u8 = 49;
/// Offset of the network ID in calibration memory
pub const NID_OFFSET: u8 = 23;

/// Shortest configuration dump guri can use
pub const CONFIGURATION_MIN_LEN: usize = SID_OFFSET as usize + ADDRESS_LEN;
/// Shortest calibration dump guri can use
pub const CALIBRATION_MIN_LEN: usize = NID_OFFSET as usize + ADDRESS_LEN;

/// The two memory pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPage {
    /// Operational configuration
    Configuration,
    /// Factory calibration
    Calibration,
}

impl MemoryPage {
    /// Shortest dump guri can use
    pub fn min_len(self) -> usize {
        match self {
            MemoryPage::Configuration => CONFIGURATION_MIN_LEN,
            MemoryPage::Calibration => CALIBRATION_MIN_LEN,
        }
    }
}

impl fmt::Display for MemoryPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryPage::Configuration => write!(f, "configuration"),
            MemoryPage::Calibration => write!(f, "calibration"),
        }
    }
}

/// One byte to write at one offset of a memory page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigValue {
    /// Offset within the page
    pub offset: u8,
    /// New value
    pub value: u8,
}

impl ConfigValue {
    /// Create a new pair
    pub const fn new(offset: u8, value: u8) -> Self {
        Self { offset, value }
    }

    /// The pair as sent on the line
    pub fn bytes(&self) -> [u8; 2] {
        [self.offset, self.value]
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:#04x}", self.offset, self.value)
    }
}

fn check_len(page: MemoryPage, raw: &Bytes) -> Result<(), ConfigError> {
    if raw.len() < page.min_len() {
        return Err(ConfigError::MemoryTooShort {
            page,
            len: raw.len(),
            expected: page.min_len(),
        });
    }
    Ok(())
}

fn address_at(raw: &[u8], offset: u8) -> Address {
    let start = offset as usize;
    // Length checked on construction
    Address::from_slice(&raw[start..start + ADDRESS_LEN]).unwrap_or_default()
}

/// Bytes that differ between `current` and `desired`, as writes at
/// `base + i`. A wildcard `desired` produces nothing.
fn diff_address(base: u8, current: Address, desired: Address) -> impl Iterator<Item = ConfigValue> {
    let current = current.octets();
    let wanted = desired.octets();
    let skip = desired.is_wildcard();

    (0..ADDRESS_LEN as u8)
        .filter(move |&i| !skip && current[i as usize] != wanted[i as usize])
        .map(move |i| ConfigValue::new(base + i, wanted[i as usize]))
}

/// A configuration memory dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationPage(Bytes);

impl ConfigurationPage {
    /// Wrap a dump, checking it covers every offset guri reads
    pub fn new(raw: Bytes) -> Result<Self, ConfigError> {
        check_len(MemoryPage::Configuration, &raw)?;
        Ok(Self(raw))
    }

    /// Protocol mode flag
    pub fn using_protocol(&self) -> u8 {
        self.0[USING_PROTOCOL_OFFSET as usize]
    }

    /// Device type
    pub fn device_type(&self) -> u8 {
        self.0[DEVICE_TYPE_OFFSET as usize]
    }

    /// Whether the module is configured as a gateway
    pub fn is_gateway(&self) -> bool {
        self.device_type() == DEVICE_TYPE_GATEWAY
    }

    /// Unique ID
    pub fn uid(&self) -> Address {
        address_at(&self.0, UID_OFFSET)
    }

    /// System ID
    pub fn sid(&self) -> Address {
        address_at(&self.0, SID_OFFSET)
    }

    /// Writes needed to reach `desired`, in ascending offset order.
    ///
    /// Clears the protocol mode flag when set and rewrites each UID/SID
    /// byte that differs. Wildcard fields are left alone.
    pub fn diff(&self, desired: &Identity) -> Vec<ConfigValue> {
        let mut values = Vec::new();

        if self.using_protocol() != 0 {
            values.push(ConfigValue::new(USING_PROTOCOL_OFFSET, 0));
        }
        values.extend(diff_address(UID_OFFSET, self.uid(), desired.uid));
        values.extend(diff_address(SID_OFFSET, self.sid(), desired.sid));
        values
    }
}

/// A calibration memory dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationPage(Bytes);

impl CalibrationPage {
    /// Wrap a dump, checking it covers every offset guri reads
    pub fn new(raw: Bytes) -> Result<Self, ConfigError> {
        check_len(MemoryPage::Calibration, &raw)?;
        Ok(Self(raw))
    }

    /// Network ID
    pub fn nid(&self) -> Address {
        address_at(&self.0, NID_OFFSET)
    }

    /// Writes needed to reach `desired`, in ascending offset order
    pub fn diff(&self, desired: &Identity) -> Vec<ConfigValue> {
        diff_address(NID_OFFSET, self.nid(), desired.nid).collect()
    }
}
