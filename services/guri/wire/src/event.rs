//! Generic event decoding.
//!
//! The module reports telemetry and replies to addressed commands with a
//! fixed 35-byte "generic event". guri only decodes it to check identity
//! replies; everything else is relayed untouched.

use crate::address::Address;
use crate::error::FrameError;
use bytes::Buf;

/// Size of a generic event, which is also its leading length marker
pub const GENERIC_EVENT_LEN: usize = 35;

/// Packet type of a generic event
pub const PACKET_TYPE_EVENT: u8 = 2;

/// Detail code of a successful get-NID reply
pub const DETAIL_NID_REPLY: u8 = 18;

const PACKET_TYPE_OFFSET: usize = 16;

/// Decoded generic event
#[derive(Debug, Clone, PartialEq)]
pub struct GenericEvent {
    sid: Address,
    uid: Address,
    rssi: u8,
    network_level: u8,
    hops: u8,
    packet_number: u16,
    latency: u16,
    packet_type: u8,
    detail: u8,
    data: [u8; 2],
    address: Address,
    temperature: i16,
    voltage: f32,
    digital_io: u8,
    aio0: u16,
    aio1: u16,
    hw_revision: [u8; 2],
    fw_revision: [u8; 2],
}

impl GenericEvent {
    /// Decode a generic event from exactly one frame's worth of bytes
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() != GENERIC_EVENT_LEN {
            return Err(FrameError::Incomplete(buf.len()));
        }
        if buf[0] as usize != GENERIC_EVENT_LEN {
            return Err(FrameError::BadMarker(buf[0]));
        }
        if buf[PACKET_TYPE_OFFSET] != PACKET_TYPE_EVENT {
            return Err(FrameError::WrongType(buf[PACKET_TYPE_OFFSET]));
        }

        let mut buf = &buf[1..];
        let sid = take_address(&mut buf);
        let uid = take_address(&mut buf);
        let rssi = buf.get_u8();
        let network_level = buf.get_u8();
        let hops = buf.get_u8();
        let packet_number = buf.get_u16();
        let latency = buf.get_u16();
        let packet_type = buf.get_u8();
        let detail = buf.get_u8();
        let data = [buf.get_u8(), buf.get_u8()];
        let address = take_address(&mut buf);
        let temperature = buf.get_u8() as i16 - 128;
        let voltage = buf.get_u8() as f32 * 0.030;
        let digital_io = buf.get_u8();
        let aio0 = buf.get_u16();
        let aio1 = buf.get_u16();
        let hw_revision = [buf.get_u8(), buf.get_u8()];
        let fw_revision = [buf.get_u8(), buf.get_u8()];

        Ok(Self {
            sid,
            uid,
            rssi,
            network_level,
            hops,
            packet_number,
            latency,
            packet_type,
            detail,
            data,
            address,
            temperature,
            voltage,
            digital_io,
            aio0,
            aio1,
            hw_revision,
            fw_revision,
        })
    }

    /// System ID of the reporting module
    pub fn sid(&self) -> Address {
        self.sid
    }

    /// Unique ID of the reporting module
    pub fn uid(&self) -> Address {
        self.uid
    }

    /// Received signal strength
    pub fn rssi(&self) -> u8 {
        self.rssi
    }

    /// Network level (distance from the gateway in the mesh tree)
    pub fn network_level(&self) -> u8 {
        self.network_level
    }

    /// Number of hops the packet travelled
    pub fn hops(&self) -> u8 {
        self.hops
    }

    /// Per-module packet counter
    pub fn packet_number(&self) -> u16 {
        self.packet_number
    }

    /// Mesh latency reported by the module
    pub fn latency(&self) -> u16 {
        self.latency
    }

    /// Packet type, always [`PACKET_TYPE_EVENT`] once decoded
    pub fn packet_type(&self) -> u8 {
        self.packet_type
    }

    /// Event detail code
    pub fn detail(&self) -> u8 {
        self.detail
    }

    /// Two detail-specific data bytes
    pub fn data(&self) -> [u8; 2] {
        self.data
    }

    /// Address field; carries the network ID in a get-NID reply
    pub fn address(&self) -> Address {
        self.address
    }

    /// Module temperature in degrees Celsius
    pub fn temperature(&self) -> i16 {
        self.temperature
    }

    /// Supply voltage in volts
    pub fn voltage(&self) -> f32 {
        self.voltage
    }

    /// Digital IO bitmap
    pub fn digital_io(&self) -> u8 {
        self.digital_io
    }

    /// First analog input
    pub fn aio0(&self) -> u16 {
        self.aio0
    }

    /// Second analog input
    pub fn aio1(&self) -> u16 {
        self.aio1
    }

    /// Hardware revision
    pub fn hw_revision(&self) -> [u8; 2] {
        self.hw_revision
    }

    /// Firmware revision
    pub fn fw_revision(&self) -> [u8; 2] {
        self.fw_revision
    }

    /// Whether this is a successful reply to a get-NID command
    pub fn is_nid_reply(&self) -> bool {
        self.detail == DETAIL_NID_REPLY
    }
}

impl TryFrom<&[u8]> for GenericEvent {
    type Error = FrameError;

    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        Self::decode(buf)
    }
}

fn take_address(buf: &mut &[u8]) -> Address {
    let mut octets = [0u8; 4];
    buf.copy_to_slice(&mut octets);
    Address::new(octets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> [u8; GENERIC_EVENT_LEN] {
        let mut buf = [0u8; GENERIC_EVENT_LEN];
        buf[0] = 35;
        buf[1..5].copy_from_slice(&[1, 2, 3, 4]);
        buf[5..9].copy_from_slice(&[5, 6, 7, 8]);
        buf[9] = 0x9c;
        buf[10] = 1;
        buf[11] = 2;
        buf[12..14].copy_from_slice(&[0x12, 0x34]);
        buf[14..16].copy_from_slice(&[0x00, 0x2a]);
        buf[16] = 2;
        buf[17] = 18;
        buf[18..20].copy_from_slice(&[0xaa, 0xbb]);
        buf[20..24].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        buf[24] = 150;
        buf[25] = 100;
        buf[26] = 0x0f;
        buf[27..29].copy_from_slice(&[0x01, 0x00]);
        buf[29..31].copy_from_slice(&[0x00, 0x02]);
        buf[31..33].copy_from_slice(&[1, 3]);
        buf[33..35].copy_from_slice(&[1, 40]);
        buf
    }

    #[test]
    fn test_decode_fields() {
        let event = GenericEvent::decode(&sample()).unwrap();

        assert_eq!(event.sid(), Address::new([1, 2, 3, 4]));
        assert_eq!(event.uid(), Address::new([5, 6, 7, 8]));
        assert_eq!(event.rssi(), 0x9c);
        assert_eq!(event.network_level(), 1);
        assert_eq!(event.hops(), 2);
        assert_eq!(event.packet_number(), 0x1234);
        assert_eq!(event.latency(), 42);
        assert_eq!(event.packet_type(), PACKET_TYPE_EVENT);
        assert!(event.is_nid_reply());
        assert_eq!(event.data(), [0xaa, 0xbb]);
        assert_eq!(event.address(), Address::new([0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(event.temperature(), 22);
        assert!((event.voltage() - 3.0).abs() < 1e-4);
        assert_eq!(event.digital_io(), 0x0f);
        assert_eq!(event.aio0(), 0x0100);
        assert_eq!(event.aio1(), 2);
        assert_eq!(event.hw_revision(), [1, 3]);
        assert_eq!(event.fw_revision(), [1, 40]);
    }

    #[test]
    fn test_temperature_below_offset() {
        let mut buf = sample();
        buf[24] = 0;
        assert_eq!(GenericEvent::decode(&buf).unwrap().temperature(), -128);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let buf = sample();
        assert_eq!(GenericEvent::decode(&buf[..34]), Err(FrameError::Incomplete(34)));
        assert_eq!(GenericEvent::decode(&[]), Err(FrameError::Incomplete(0)));

        let mut long = buf.to_vec();
        long.push(0);
        assert_eq!(GenericEvent::decode(&long), Err(FrameError::Incomplete(36)));
    }

    #[test]
    fn test_decode_rejects_bad_marker() {
        let mut buf = sample();
        buf[0] = 34;
        assert_eq!(GenericEvent::decode(&buf), Err(FrameError::BadMarker(34)));
    }

    #[test]
    fn test_decode_rejects_wrong_type() {
        let mut buf = sample();
        buf[16] = 3;
        assert_eq!(GenericEvent::decode(&buf), Err(FrameError::WrongType(3)));
    }

    #[test]
    fn test_try_from_slice() {
        let buf = sample();
        assert!(GenericEvent::try_from(&buf[..]).is_ok());
    }
}
