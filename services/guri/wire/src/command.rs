//! Provisioning command frames.
//!
//! Commands sent to the module are either fixed 10-byte packets addressed
//! through the radio stack, or single bytes understood only while the
//! module shows its configuration prompt.

use crate::address::Address;

/// Length of an addressed command packet
pub const COMMAND_FRAME_LEN: usize = 10;

/// Byte written to check for the configuration prompt
pub const PROBE: u8 = 0xFF;

/// Prompt printed by the module while in configuration mode
pub const CONFIG_PROMPT: u8 = b'>';

/// Terminates a run of `(offset, value)` pairs during a memory write
pub const MEMORY_TERMINATOR: u8 = 0xFF;

const COMMAND_TYPE: u8 = 0x03;
const CMD_SET_GATEWAY_CONFIG_MODE: u8 = 0x05;
const CMD_GET_NID: u8 = 0x10;

fn command_frame(target: Address, command: u8) -> [u8; COMMAND_FRAME_LEN] {
    let [a0, a1, a2, a3] = target.octets();
    [
        COMMAND_FRAME_LEN as u8,
        a0,
        a1,
        a2,
        a3,
        0x00, // sequence
        COMMAND_TYPE,
        command,
        0x00,
        0x00,
    ]
}

/// Ask the attached gateway for its network ID
pub fn get_nid() -> [u8; COMMAND_FRAME_LEN] {
    command_frame(Address::WILDCARD, CMD_GET_NID)
}

/// Ask the gateway with the given address to enter configuration mode
pub fn set_gateway_config_mode(target: Address) -> [u8; COMMAND_FRAME_LEN] {
    command_frame(target, CMD_SET_GATEWAY_CONFIG_MODE)
}

/// Single-byte commands accepted at the configuration prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Dump the configuration memory page
    ReadConfiguration,
    /// Dump the calibration memory page
    ReadCalibration,
    /// Switch the module to the gateway role
    EnableGateway,
    /// Start writing configuration memory
    WriteConfiguration,
    /// Start writing calibration memory
    WriteCalibration,
    /// Leave configuration mode
    Exit,
}

impl ConfigCommand {
    /// Bytes to put on the line for this command
    pub fn bytes(self) -> &'static [u8] {
        match self {
            ConfigCommand::ReadConfiguration => b"0",
            ConfigCommand::ReadCalibration => b"r",
            ConfigCommand::EnableGateway => b"G",
            ConfigCommand::WriteConfiguration => b"M",
            // Calibration writes need the unlock byte first
            ConfigCommand::WriteCalibration => b"HW",
            ConfigCommand::Exit => b"X",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_nid_frame() {
        assert_eq!(get_nid(), [0x0A, 0, 0, 0, 0, 0, 0x03, 0x10, 0, 0]);
    }

    #[test]
    fn test_set_gateway_config_mode_embeds_address() {
        let frame = set_gateway_config_mode(Address::new([0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(frame, [0x0A, 0xde, 0xad, 0xbe, 0xef, 0, 0x03, 0x05, 0, 0]);
    }

    #[test]
    fn test_config_command_bytes() {
        assert_eq!(ConfigCommand::ReadConfiguration.bytes(), b"0");
        assert_eq!(ConfigCommand::ReadCalibration.bytes(), b"r");
        assert_eq!(ConfigCommand::WriteCalibration.bytes(), b"HW");
        assert_eq!(ConfigCommand::Exit.bytes(), b"X");
    }
}
