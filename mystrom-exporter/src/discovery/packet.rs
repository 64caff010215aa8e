//! Discovery broadcast decoding.
//!
//! Devices announce themselves with a UDP broadcast whose payload starts with
//! the 6-byte hardware address followed by a 1-byte device type. Anything
//! after byte 6 is ignored.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use mystrom_common::MacAddress;

/// Minimum payload length of a discovery packet.
pub const MIN_PACKET_LEN: usize = MacAddress::LEN + 1;

/// Decoded payload of a discovery broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryPacket {
    pub mac: MacAddress,
    pub device_type: u8,
}

impl DiscoveryPacket {
    /// Decode a datagram payload. Payloads shorter than 7 bytes are noise.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < MIN_PACKET_LEN {
            return None;
        }

        Some(Self {
            mac: MacAddress::from_slice(data)?,
            device_type: data[MacAddress::LEN],
        })
    }
}

/// Latest known network identity of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub mac: MacAddress,
    pub source_ip: IpAddr,
    pub source_port: u16,
    pub device_type: u8,
    /// When the last broadcast of this device was received.
    pub last_seen: Instant,
}

impl DeviceRecord {
    pub fn new(packet: DiscoveryPacket, source: SocketAddr) -> Self {
        Self {
            mac: packet.mac,
            source_ip: source.ip(),
            source_port: source.port(),
            device_type: packet.device_type,
            last_seen: Instant::now(),
        }
    }
}

/// Decode a datagram received from `source` into a device record.
pub fn decode_datagram(data: &[u8], source: SocketAddr) -> Option<DeviceRecord> {
    DiscoveryPacket::decode(data).map(|packet| DeviceRecord::new(packet, source))
}
