//! Platform-agnostic types for blewatch.
//!
//! This crate holds the data model shared by the engine (blewatch-core) and
//! any host application: advertisement packets as they arrive from a packet
//! source, the canonical per-device record, and the hex codec used by the
//! session file format.
//!
//! # Features
//!
//! - [`AdvertisementPacket`] with payload maps in live or serialized shape
//! - [`DeviceRecord`] with reception statistics and bounded decoded history
//! - Hex and manufacturer-key codecs ([`hex`])
//! - Error types for payload parsing
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use blewatch_types::{AdvertisementPacket, DataMap};
//!
//! let mut packet = AdvertisementPacket::new("AA:BB:CC:DD:EE:FF", -60);
//! packet.service_data = DataMap::Serialized(BTreeMap::from([
//!     ("00004000-0000-1000-8000-00805f9b34fb".to_string(), "0A FF".to_string()),
//! ]));
//! assert_eq!(packet.device_id(), Some("AA:BB:CC:DD:EE:FF"));
//! ```

pub mod error;
pub mod hex;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    AdvertisementPacket, BatterySample, DataMap, DecodedHistory, DeviceRecord, DeviceStats,
    ManufacturerData, MotionSample, PacketDevice, PayloadKey, RawData, ServiceData,
    DEFAULT_HISTORY_CAP, TX_POWER_UNKNOWN, UNKNOWN_NAME, normalize_tx_power,
};
