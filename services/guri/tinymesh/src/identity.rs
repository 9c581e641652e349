//! The operator's desired module identity.

use guri_wire::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Network, system and unique IDs.
///
/// A wildcard (`::`) field accepts whatever the module has and is never
/// written during provisioning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Network ID
    #[serde(default)]
    pub nid: Address,
    /// System ID
    #[serde(default)]
    pub sid: Address,
    /// Unique ID
    #[serde(default)]
    pub uid: Address,
}

impl Identity {
    /// Whether every field is a wildcard
    pub fn is_wildcard(&self) -> bool {
        self.nid.is_wildcard() && self.sid.is_wildcard() && self.uid.is_wildcard()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nid={} sid={} uid={}", self.nid, self.sid, self.uid)
    }
}
