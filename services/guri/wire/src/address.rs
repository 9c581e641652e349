//! Four-byte TinyMesh identifiers.
//!
//! Network, system and unique IDs are all 4-byte values written as
//! colon-separated hex groups (`aa:bb:cc:dd`). A single `::` may stand in
//! for a run of zero groups, so `::` alone is the all-zero address, which
//! acts as a wildcard when comparing against a device's identity.

use crate::error::AddressError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Address length in bytes
pub const ADDRESS_LEN: usize = 4;

/// A 4-byte TinyMesh identifier (NID, SID or UID)
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// The all-zero address, matching any other address
    pub const WILDCARD: Address = Address([0; ADDRESS_LEN]);

    /// Create an address from raw bytes
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Read an address from the first four bytes of `buf`
    pub fn from_slice(buf: &[u8]) -> Option<Self> {
        let bytes: [u8; ADDRESS_LEN] = buf.get(..ADDRESS_LEN)?.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Raw bytes
    pub const fn octets(&self) -> [u8; ADDRESS_LEN] {
        self.0
    }

    /// Whether this is the all-zero wildcard
    pub fn is_wildcard(&self) -> bool {
        self.0 == [0; ADDRESS_LEN]
    }

    /// Wildcard-aware comparison.
    ///
    /// True when either side is the all-zero address or both are
    /// byte-for-byte identical. This is deliberately not `PartialEq`: it
    /// is not transitive.
    pub fn matches(&self, other: &Address) -> bool {
        self.is_wildcard() || other.is_wildcard() || self.0 == other.0
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(AddressError::Empty);
        }

        let (head, tail) = match s.find("::") {
            Some(pos) => {
                let tail = &s[pos + 2..];
                if tail.contains("::") {
                    return Err(AddressError::MultipleElisions);
                }
                (&s[..pos], Some(tail))
            }
            None => (s, None),
        };

        let head = parse_groups(head)?;
        let mut bytes = [0u8; ADDRESS_LEN];

        match tail {
            None => {
                if head.len() != ADDRESS_LEN {
                    return Err(AddressError::GroupCount(head.len()));
                }
                bytes.copy_from_slice(&head);
            }
            Some(tail) => {
                let tail = parse_groups(tail)?;
                let explicit = head.len() + tail.len();
                if explicit > ADDRESS_LEN {
                    return Err(AddressError::GroupCount(explicit));
                }
                // Elided groups stay zero between head and tail
                bytes[..head.len()].copy_from_slice(&head);
                bytes[ADDRESS_LEN - tail.len()..].copy_from_slice(&tail);
            }
        }

        Ok(Self(bytes))
    }
}

/// Parse a run of colon-separated hex groups; an empty run yields no groups.
fn parse_groups(run: &str) -> Result<Vec<u8>, AddressError> {
    if run.is_empty() {
        return Ok(Vec::new());
    }

    run.split(':').map(parse_group).collect()
}

fn parse_group(group: &str) -> Result<u8, AddressError> {
    if group.is_empty() || !group.bytes().all(|c| c.is_ascii_hexdigit()) {
        return Err(AddressError::InvalidGroup(group.to_string()));
    }

    let digits = group.trim_start_matches('0');
    if digits.len() > 2 {
        return Err(AddressError::GroupOutOfRange(group.to_string()));
    }

    u8::from_str_radix(if digits.is_empty() { "0" } else { digits }, 16)
        .map_err(|_| AddressError::GroupOutOfRange(group.to_string()))
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
