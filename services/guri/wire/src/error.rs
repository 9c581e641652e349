//! Wire protocol error types.

use thiserror::Error;

/// Errors raised while decoding a TinyMesh frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer is not exactly one generic event long
    #[error("expected a generic event of 35 bytes, got {0}")]
    Incomplete(usize),

    /// Leading length marker is wrong
    #[error("bad length marker {0}, expected 35")]
    BadMarker(u8),

    /// Packet type is not a generic event
    #[error("packet type {0} is not a generic event")]
    WrongType(u8),
}

/// Errors raised while parsing a hex-colon address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Input was empty
    #[error("empty address")]
    Empty,

    /// A group was empty or contained non-hex characters
    #[error("invalid group {0:?}")]
    InvalidGroup(String),

    /// A group did not fit in one byte
    #[error("group {0:?} exceeds 0xff")]
    GroupOutOfRange(String),

    /// More than one `::` elision
    #[error("more than one '::' elision")]
    MultipleElisions,

    /// Wrong number of groups for the address length
    #[error("address has {0} groups, expected 4")]
    GroupCount(usize),
}
