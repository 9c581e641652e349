//! TinyMesh wire formats for guri.
//!
//! This crate holds the fixed-layout pieces of the TinyMesh serial protocol
//! that guri needs to understand: 4-byte device addresses, the 35-byte
//! "generic event" frame and the provisioning command frames.
//!
//! ## Generic Event Layout
//!
//! ```text
//! +--------+-------+-------+------+--------+------+-----------+---------+
//! | 0: len | 1..5  | 5..9  | 9    | 10     | 11   | 12..14    | 14..16  |
//! | (=35)  | sid   | uid   | rssi | netlvl | hops | packetnum | latency |
//! +--------+-------+-------+------+--------+------+-----------+---------+
//! | 16     | 17     | 18..20 | 20..24  | 24   | 25   | 26  | 27..31   |
//! | type=2 | detail | data   | address | temp | volt | dio | aio0/1   |
//! +--------+--------+--------+---------+------+------+-----+----------+
//! | 31..33 hw revision | 33..35 fw revision |
//! +--------------------+--------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod command;
pub mod error;
pub mod event;

// Re-export main types
pub use address::{Address, ADDRESS_LEN};
pub use command::{
    get_nid, set_gateway_config_mode, ConfigCommand, COMMAND_FRAME_LEN, CONFIG_PROMPT,
    MEMORY_TERMINATOR, PROBE,
};
pub use error::{AddressError, FrameError};
pub use event::{GenericEvent, DETAIL_NID_REPLY, GENERIC_EVENT_LEN, PACKET_TYPE_EVENT};
