//! Core types for advertisement packets and canonical device state.

use core::fmt;
use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;

use crate::error::ParseResult;
use crate::hex;

/// Name used for devices that never advertised one.
pub const UNKNOWN_NAME: &str = "unknown";

/// Raw TX power value meaning "not reported" (the signed 8-bit minimum).
pub const TX_POWER_UNKNOWN: i16 = i8::MIN as i16;

/// Default number of decoded samples retained per history series.
pub const DEFAULT_HISTORY_CAP: usize = 120;

/// Map the TX power sentinel to `None`.
///
/// ```
/// use blewatch_types::normalize_tx_power;
///
/// assert_eq!(normalize_tx_power(Some(-128)), None);
/// assert_eq!(normalize_tx_power(Some(-40)), Some(-40));
/// assert_eq!(normalize_tx_power(None), None);
/// ```
#[must_use]
pub fn normalize_tx_power(tx_power: Option<i16>) -> Option<i16> {
    tx_power.filter(|&power| power != TX_POWER_UNKNOWN)
}

/// Key type of an advertisement payload map.
///
/// Service data is keyed by UUID strings, manufacturer data by the 16-bit
/// company identifier. Both have a canonical string form used on the wire.
pub trait PayloadKey: Ord + Clone + fmt::Debug {
    /// Serialized form of the key.
    fn to_key_string(&self) -> String;

    /// Parse the serialized form back into a key.
    fn parse_key(key: &str) -> ParseResult<Self>;
}

impl PayloadKey for String {
    fn to_key_string(&self) -> String {
        self.clone()
    }

    fn parse_key(key: &str) -> ParseResult<Self> {
        Ok(key.to_string())
    }
}

impl PayloadKey for u16 {
    fn to_key_string(&self) -> String {
        hex::format_manufacturer_key(*self)
    }

    fn parse_key(key: &str) -> ParseResult<Self> {
        hex::parse_manufacturer_key(key)
    }
}

/// Advertisement payload map in either of its two shapes.
///
/// Live sources hand over byte buffers keyed by their native key type.
/// Recorded sessions carry the serialized shape: string keys mapped to
/// space-separated hex strings. Both shapes describe the same bytes and
/// decode identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMap<K: PayloadKey> {
    /// Key → raw byte buffer, as produced by a live scanner.
    Live(BTreeMap<K, Bytes>),
    /// Serialized key → hex string, as stored in session files.
    Serialized(BTreeMap<String, String>),
}

/// Service data keyed by service UUID.
pub type ServiceData = DataMap<String>;

/// Manufacturer data keyed by company identifier.
pub type ManufacturerData = DataMap<u16>;

impl<K: PayloadKey> Default for DataMap<K> {
    fn default() -> Self {
        DataMap::Live(BTreeMap::new())
    }
}

impl<K: PayloadKey> DataMap<K> {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            DataMap::Live(map) => map.len(),
            DataMap::Serialized(map) => map.len(),
        }
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this map holds live byte buffers.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, DataMap::Live(_))
    }

    /// Serialized keys in map order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        match self {
            DataMap::Live(map) => map.keys().map(PayloadKey::to_key_string).collect(),
            DataMap::Serialized(map) => map.keys().cloned().collect(),
        }
    }

    /// Convert to the serialized shape.
    #[must_use]
    pub fn to_hex_map(&self) -> BTreeMap<String, String> {
        match self {
            DataMap::Live(map) => map
                .iter()
                .map(|(key, bytes)| (key.to_key_string(), hex::encode(bytes)))
                .collect(),
            DataMap::Serialized(map) => map.clone(),
        }
    }

    /// Convert to the live shape.
    ///
    /// # Errors
    ///
    /// Fails on the first key or hex value that does not parse.
    pub fn to_byte_map(&self) -> ParseResult<BTreeMap<K, Bytes>> {
        match self {
            DataMap::Live(map) => Ok(map.clone()),
            DataMap::Serialized(map) => map
                .iter()
                .map(|(key, value)| -> ParseResult<(K, Bytes)> {
                    Ok((K::parse_key(key)?, Bytes::from(hex::decode(value)?)))
                })
                .collect(),
        }
    }

    /// Convert to the live shape, skipping entries that do not parse.
    #[must_use]
    pub fn to_byte_map_lossy(&self) -> BTreeMap<K, Bytes> {
        match self {
            DataMap::Live(map) => map.clone(),
            DataMap::Serialized(map) => map
                .iter()
                .filter_map(|(key, value)| {
                    let key = K::parse_key(key).ok()?;
                    let bytes = hex::decode(value).ok()?;
                    Some((key, Bytes::from(bytes)))
                })
                .collect(),
        }
    }

    /// Return a copy in the serialized shape.
    #[must_use]
    pub fn into_serialized(self) -> Self {
        if self.is_live() {
            DataMap::Serialized(self.to_hex_map())
        } else {
            self
        }
    }
}

#[cfg(feature = "serde")]
impl<K: PayloadKey> Serialize for DataMap<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_hex_map().serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de, K: PayloadKey> Deserialize<'de> for DataMap<K> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, String>::deserialize(deserializer).map(DataMap::Serialized)
    }
}

/// Identity fields of an advertising peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PacketDevice {
    /// Stable device identifier. Packets without one are dropped on ingest.
    #[cfg_attr(feature = "serde", serde(default))]
    pub id: Option<String>,
    /// Advertised local name, if any.
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: Option<String>,
}

/// A single advertisement as delivered by a packet source.
///
/// Packets are transient: the store consumes them and keeps only the
/// normalized [`RawData`] of the most recent one.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct AdvertisementPacket {
    /// Advertising device.
    pub device: PacketDevice,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Advertised TX power in dBm; `-128` means unknown.
    #[cfg_attr(feature = "serde", serde(default))]
    pub tx_power: Option<i16>,
    /// Advertised service UUIDs, in advertisement order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub uuids: Vec<String>,
    /// Manufacturer specific data.
    #[cfg_attr(feature = "serde", serde(default))]
    pub manufacturer_data: ManufacturerData,
    /// Service data.
    #[cfg_attr(feature = "serde", serde(default))]
    pub service_data: ServiceData,
}

impl AdvertisementPacket {
    /// Create a packet for a device with no payloads.
    pub fn new(id: impl Into<String>, rssi: i16) -> Self {
        Self {
            device: PacketDevice {
                id: Some(id.into()),
                name: None,
            },
            rssi,
            ..Default::default()
        }
    }

    /// The device id, if present and non-empty.
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.device.id.as_deref().filter(|id| !id.is_empty())
    }

    /// TX power with the unknown sentinel mapped to `None`.
    #[must_use]
    pub fn normalized_tx_power(&self) -> Option<i16> {
        normalize_tx_power(self.tx_power)
    }

    /// Return a copy with both payload maps in the serialized shape and the
    /// TX power sentinel normalized.
    #[must_use]
    pub fn to_serialized(&self) -> Self {
        Self {
            device: self.device.clone(),
            rssi: self.rssi,
            tx_power: self.normalized_tx_power(),
            uuids: self.uuids.clone(),
            manufacturer_data: self.manufacturer_data.clone().into_serialized(),
            service_data: self.service_data.clone().into_serialized(),
        }
    }
}

/// Reception statistics for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DeviceStats {
    /// Packets received since the device was first seen.
    pub total: u64,
    /// Packets received in the current sampling interval.
    pub bucket: u32,
    /// Packets received in the last completed sampling interval.
    pub rate: u32,
    /// Weakest RSSI observed.
    pub rssi_min: i16,
    /// Strongest RSSI observed.
    pub rssi_max: i16,
}

impl DeviceStats {
    /// Fresh statistics for a device first seen at `rssi`.
    #[must_use]
    pub fn first_seen(rssi: i16) -> Self {
        Self {
            rssi_min: rssi,
            rssi_max: rssi,
            ..Default::default()
        }
    }

    /// Widen the RSSI extrema to include `rssi`.
    pub fn observe_rssi(&mut self, rssi: i16) {
        self.rssi_min = self.rssi_min.min(rssi);
        self.rssi_max = self.rssi_max.max(rssi);
    }

    /// Spread between the strongest and weakest RSSI observed.
    #[must_use]
    pub fn rssi_delta(&self) -> u32 {
        (i32::from(self.rssi_max) - i32::from(self.rssi_min)).unsigned_abs()
    }
}

/// Normalized payloads of the most recent packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct RawData {
    /// Advertised service UUIDs.
    pub uuids: Vec<String>,
    /// Manufacturer data by company identifier.
    #[cfg_attr(feature = "serde", serde(with = "hex_map"))]
    pub manufacturer_data: BTreeMap<u16, Bytes>,
    /// Service data by service UUID.
    #[cfg_attr(feature = "serde", serde(with = "hex_map"))]
    pub service_data: BTreeMap<String, Bytes>,
    /// TX power in dBm, `None` when not reported.
    pub tx_power: Option<i16>,
}

/// A decoded battery reading.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatterySample {
    /// When the sample was decoded.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub t: OffsetDateTime,
    /// Battery voltage in millivolts.
    pub mv: u16,
    /// Estimated charge, 0-100.
    pub percent: f32,
}

/// A decoded motion/trigger reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MotionSample {
    /// When the sample was decoded.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub t: OffsetDateTime,
    /// Whether the trigger is active.
    pub active: bool,
    /// Remaining trigger countdown (0 when inactive).
    pub countdown: u16,
}

/// Bounded history of decoded sensor samples.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecodedHistory {
    /// Battery samples, oldest first.
    pub battery: VecDeque<BatterySample>,
    /// Motion samples, oldest first.
    pub motion: VecDeque<MotionSample>,
    /// Last decoded device uptime.
    pub uptime: Option<u32>,
}

impl DecodedHistory {
    /// Append a battery sample, evicting the oldest beyond `cap`.
    pub fn push_battery(&mut self, sample: BatterySample, cap: usize) {
        push_capped(&mut self.battery, sample, cap);
    }

    /// Append a motion sample, evicting the oldest beyond `cap`.
    pub fn push_motion(&mut self, sample: MotionSample, cap: usize) {
        push_capped(&mut self.motion, sample, cap);
    }

    /// Whether nothing has been decoded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.battery.is_empty() && self.motion.is_empty() && self.uptime.is_none()
    }
}

fn push_capped<T>(series: &mut VecDeque<T>, sample: T, cap: usize) {
    series.push_back(sample);
    while series.len() > cap {
        series.pop_front();
    }
}

/// Canonical state of one device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DeviceRecord {
    /// Stable device identifier.
    pub id: String,
    /// Best known name, [`UNKNOWN_NAME`] if never advertised.
    pub name: String,
    /// Latest RSSI in dBm.
    pub rssi: i16,
    /// When the last packet was received.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub last_seen: OffsetDateTime,
    /// Reception statistics.
    pub stats: DeviceStats,
    /// Payloads of the most recent packet.
    pub raw: RawData,
    /// Decoded sensor history.
    pub decoded: DecodedHistory,
}

impl DeviceRecord {
    /// Create a record for a device seen for the first time.
    pub fn new(id: impl Into<String>, name: Option<&str>, rssi: i16, now: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            name: name
                .filter(|n| !n.is_empty())
                .unwrap_or(UNKNOWN_NAME)
                .to_string(),
            rssi,
            last_seen: now,
            stats: DeviceStats::first_seen(rssi),
            raw: RawData::default(),
            decoded: DecodedHistory::default(),
        }
    }

    /// Whether the record still carries the unknown-name sentinel.
    #[must_use]
    pub fn has_unknown_name(&self) -> bool {
        self.name == UNKNOWN_NAME
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {} dBm, {} pkts, {}/s",
            self.name, self.id, self.rssi, self.stats.total, self.stats.rate
        )
    }
}

/// Serde adapter writing byte maps as serialized hex maps.
#[cfg(feature = "serde")]
mod hex_map {
    use std::collections::BTreeMap;

    use bytes::Bytes;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{DataMap, PayloadKey};
    use crate::hex;

    pub fn serialize<K, S>(map: &BTreeMap<K, Bytes>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: PayloadKey,
        S: Serializer,
    {
        serializer.collect_map(
            map.iter()
                .map(|(key, bytes)| (key.to_key_string(), hex::encode(bytes))),
        )
    }

    pub fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, Bytes>, D::Error>
    where
        K: PayloadKey,
        D: Deserializer<'de>,
    {
        let serialized = BTreeMap::<String, String>::deserialize(deserializer)?;
        DataMap::<K>::Serialized(serialized)
            .to_byte_map()
            .map_err(D::Error::custom)
    }
}
