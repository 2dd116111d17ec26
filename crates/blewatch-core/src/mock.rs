//! Packet and frame builders for testing.
//!
//! These helpers produce realistic advertisements without a radio, for unit
//! tests, integration tests and demo sessions.
//!
//! # Example
//!
//! ```
//! use blewatch_core::mock::PacketBuilder;
//!
//! let packet = PacketBuilder::new("AA:BB:CC:DD:EE:01")
//!     .name("Tag")
//!     .rssi(-58)
//!     .sensor_frame(2900, 3600, 0xFFFF)
//!     .build();
//! assert_eq!(packet.device.name.as_deref(), Some("Tag"));
//! assert!(!packet.service_data.is_empty());
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;

use blewatch_types::{AdvertisementPacket, DataMap};

use crate::decoder::REALTIME_FRAME_LEN;

/// Service UUID used by [`PacketBuilder::sensor_frame`].
pub const SENSOR_SERVICE_UUID: &str = "00004000-0000-1000-8000-00805f9b34fb";

/// Build a 20-byte realtime sensor frame.
///
/// Unused regions (device id, mini UUID) are filled with recognizable bytes.
pub fn sensor_frame(mv: u16, uptime: u32, countdown: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REALTIME_FRAME_LEN);
    frame.extend_from_slice(&[0xD0, 0x01, 0x02, 0x03, 0x04, 0x05]);
    frame.extend_from_slice(&mv.to_be_bytes());
    frame.extend_from_slice(&[0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01]);
    frame.extend_from_slice(&uptime.to_be_bytes());
    frame.extend_from_slice(&countdown.to_be_bytes());
    frame
}

/// Builder for [`AdvertisementPacket`]s.
///
/// Payloads are collected in the live shape; call
/// [`serialized`](Self::serialized) to emit the hex shape used in session files.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    packet: AdvertisementPacket,
    service_data: BTreeMap<String, Bytes>,
    manufacturer_data: BTreeMap<u16, Bytes>,
    serialized: bool,
}

impl PacketBuilder {
    /// Start a packet for `id` at -60 dBm.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            packet: AdvertisementPacket::new(id, -60),
            service_data: BTreeMap::new(),
            manufacturer_data: BTreeMap::new(),
            serialized: false,
        }
    }

    /// Start a packet without a device id.
    pub fn anonymous() -> Self {
        let mut builder = Self::new("");
        builder.packet.device.id = None;
        builder
    }

    /// Set the advertised name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.packet.device.name = Some(name.into());
        self
    }

    /// Set the RSSI.
    #[must_use]
    pub fn rssi(mut self, rssi: i16) -> Self {
        self.packet.rssi = rssi;
        self
    }

    /// Set the raw TX power, sentinel included.
    #[must_use]
    pub fn tx_power(mut self, tx_power: i16) -> Self {
        self.packet.tx_power = Some(tx_power);
        self
    }

    /// Add an advertised service UUID.
    #[must_use]
    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        self.packet.uuids.push(uuid.into());
        self
    }

    /// Add a service data entry.
    #[must_use]
    pub fn service_data(mut self, key: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        self.service_data.insert(key.into(), bytes.into());
        self
    }

    /// Add a manufacturer data entry.
    #[must_use]
    pub fn manufacturer_data(mut self, company: u16, bytes: impl Into<Bytes>) -> Self {
        self.manufacturer_data.insert(company, bytes.into());
        self
    }

    /// Add a realtime sensor frame as service data.
    #[must_use]
    pub fn sensor_frame(self, mv: u16, uptime: u32, countdown: u16) -> Self {
        self.service_data(SENSOR_SERVICE_UUID, sensor_frame(mv, uptime, countdown))
    }

    /// Emit payloads in the serialized (hex) shape.
    #[must_use]
    pub fn serialized(mut self) -> Self {
        self.serialized = true;
        self
    }

    /// Build the packet.
    pub fn build(self) -> AdvertisementPacket {
        let mut packet = self.packet;
        packet.service_data = DataMap::Live(self.service_data);
        packet.manufacturer_data = DataMap::Live(self.manufacturer_data);
        if self.serialized {
            packet.service_data = packet.service_data.into_serialized();
            packet.manufacturer_data = packet.manufacturer_data.into_serialized();
        }
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_frame_layout() {
        let frame = sensor_frame(3000, 0x0A0B_0C0D, 0xFFFF);
        assert_eq!(frame.len(), REALTIME_FRAME_LEN);
        assert_eq!(&frame[6..8], &[0x0B, 0xB8]);
        assert_eq!(&frame[14..18], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(&frame[18..20], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_builder_serialized_shape() {
        let packet = PacketBuilder::new("dev")
            .manufacturer_data(0x004C, vec![0x02u8, 0x15])
            .serialized()
            .build();
        match &packet.manufacturer_data {
            DataMap::Serialized(map) => {
                assert_eq!(map.get("0x004C").map(String::as_str), Some("02 15"));
            }
            DataMap::Live(_) => panic!("expected serialized payload"),
        }
    }

    #[test]
    fn test_anonymous_packet_has_no_id() {
        let packet = PacketBuilder::anonymous().rssi(-70).build();
        assert_eq!(packet.device_id(), None);
        assert_eq!(packet.rssi, -70);
    }
}
