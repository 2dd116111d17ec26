//! Decoder for the embedded sensor sub-protocol.
//!
//! Some tags broadcast a 20-byte realtime frame inside their service data
//! (service `0x4000`), or inside manufacturer data under the same identifier.
//! The frame layout is:
//!
//! | Bytes | Field | Encoding |
//! |-------|-------|----------|
//! | 0-5   | Device id | opaque |
//! | 6-7   | Battery voltage (mV) | u16 BE |
//! | 8-13  | Mini UUID | opaque |
//! | 14-17 | Device uptime | u32 BE |
//! | 18-19 | Motion countdown | u16 BE, `0xFFFF` = not triggered |
//!
//! Payload maps arrive either live (byte buffers) or serialized (hex strings).
//! Each shape has its own entry point; both locate the matching entry, reduce
//! it to a byte slice and hand it to the same frame parser, so identical bytes
//! always decode identically.
//!
//! A short frame or a map without a matching key yields `None`. Callers treat
//! that as "nothing decoded this cycle", never as a fault.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use bytes::{Buf, Bytes};
use serde::Serialize;
use tracing::debug;

use blewatch_types::{DataMap, PayloadKey, hex};

/// Service identifier carrying the realtime frame.
pub const SENSOR_SERVICE_ID: &str = "4000";

/// Length of the realtime frame in bytes.
pub const REALTIME_FRAME_LEN: usize = 20;

/// Motion countdown value meaning "not triggered".
pub const MOTION_IDLE: u16 = 0xFFFF;

/// Battery voltage mapped to 0%.
pub const BATTERY_EMPTY_MV: u16 = 2000;

/// Battery voltage mapped to 100%.
pub const BATTERY_FULL_MV: u16 = 3000;

/// Decoded battery state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatteryReading {
    /// Battery voltage in millivolts.
    pub mv: u16,
    /// Estimated charge, 0-100.
    pub percent: f32,
}

/// Decoded motion/trigger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MotionReading {
    /// Whether the trigger is active.
    pub active: bool,
    /// Remaining countdown, 0 when not triggered.
    pub countdown: u16,
}

/// Result of decoding one sensor frame.
///
/// Fields are optional so extension formats may report a subset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorFrame {
    /// Name of the format that produced this frame.
    pub format: &'static str,
    /// Battery state, if the format carries it.
    pub battery: Option<BatteryReading>,
    /// Device uptime counter, if the format carries it.
    pub uptime: Option<u32>,
    /// Motion state, if the format carries it.
    pub motion: Option<MotionReading>,
}

/// Estimate coin-cell charge from voltage.
///
/// Linear between [`BATTERY_EMPTY_MV`] (0%) and [`BATTERY_FULL_MV`] (100%),
/// clamped outside that range.
///
/// ```
/// use blewatch_core::decoder::estimate_battery_percent;
///
/// assert_eq!(estimate_battery_percent(3000), 100.0);
/// assert_eq!(estimate_battery_percent(2500), 50.0);
/// assert_eq!(estimate_battery_percent(1800), 0.0);
/// ```
pub fn estimate_battery_percent(mv: u16) -> f32 {
    if mv >= BATTERY_FULL_MV {
        return 100.0;
    }
    if mv <= BATTERY_EMPTY_MV {
        return 0.0;
    }
    let span = f32::from(BATTERY_FULL_MV - BATTERY_EMPTY_MV);
    (f32::from(mv - BATTERY_EMPTY_MV) / span * 100.0).clamp(0.0, 100.0)
}

/// Parse the 20-byte realtime frame.
///
/// Returns `None` if `data` is shorter than [`REALTIME_FRAME_LEN`]. Trailing
/// bytes beyond the frame are ignored.
pub fn parse_realtime_frame(data: &[u8]) -> Option<SensorFrame> {
    if data.len() < REALTIME_FRAME_LEN {
        return None;
    }

    let mut buf = &data[6..REALTIME_FRAME_LEN];
    let mv = buf.get_u16();
    buf.advance(6); // mini uuid
    let uptime = buf.get_u32();
    let trigger = buf.get_u16();
    let active = trigger != MOTION_IDLE;

    Some(SensorFrame {
        format: RealtimeFormat.name(),
        battery: Some(BatteryReading {
            mv,
            percent: estimate_battery_percent(mv),
        }),
        uptime: Some(uptime),
        motion: Some(MotionReading {
            active,
            countdown: if active { trigger } else { 0 },
        }),
    })
}

/// A frame layout the [`Decoder`] can recognize.
///
/// Implement this to plug additional vendor formats into the decoder.
pub trait FrameFormat: Send + Sync {
    /// Short format name, reported in [`SensorFrame::format`].
    fn name(&self) -> &'static str;

    /// Whether a payload entry with this serialized key carries the format.
    fn matches(&self, key: &str) -> bool;

    /// Parse the entry's bytes.
    fn parse(&self, data: &[u8]) -> Option<SensorFrame>;
}

/// The standard 20-byte realtime frame on service `0x4000`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealtimeFormat;

impl FrameFormat for RealtimeFormat {
    fn name(&self) -> &'static str {
        "realtime"
    }

    fn matches(&self, key: &str) -> bool {
        key.to_ascii_lowercase().contains(SENSOR_SERVICE_ID)
    }

    fn parse(&self, data: &[u8]) -> Option<SensorFrame> {
        parse_realtime_frame(data)
    }
}

/// Payload decoder holding an ordered list of frame formats.
pub struct Decoder {
    formats: Vec<Box<dyn FrameFormat>>,
}

impl Decoder {
    /// Decoder with no formats registered; decodes nothing.
    pub fn empty() -> Self {
        Self {
            formats: Vec::new(),
        }
    }

    /// Decoder recognizing the standard realtime frame.
    pub fn standard() -> Self {
        Self::empty().with_format(RealtimeFormat)
    }

    /// Register an additional format, tried after those already registered.
    #[must_use]
    pub fn with_format(mut self, format: impl FrameFormat + 'static) -> Self {
        self.formats.push(Box::new(format));
        self
    }

    /// Names of the registered formats, in priority order.
    pub fn format_names(&self) -> Vec<&'static str> {
        self.formats.iter().map(|f| f.name()).collect()
    }

    /// Decode a payload map in either shape.
    pub fn decode<K: PayloadKey>(&self, data: &DataMap<K>) -> Option<SensorFrame> {
        match data {
            DataMap::Live(map) => self.decode_live(map),
            DataMap::Serialized(map) => self.decode_serialized::<K>(map),
        }
    }

    /// Decode a live map of raw byte buffers.
    pub fn decode_live<K: PayloadKey>(&self, map: &BTreeMap<K, Bytes>) -> Option<SensorFrame> {
        map.iter().find_map(|(key, bytes)| {
            let format = self.format_for(&key.to_key_string())?;
            Some((format, bytes.as_ref()))
        })
        .and_then(|(format, bytes)| self.run(format, bytes))
    }

    /// Decode a serialized map of hex strings.
    ///
    /// Keys are rewritten to the canonical form of `K` before matching, so
    /// `"16384"` and `"0x4000"` select the same format for a `u16` map. Keys
    /// that do not parse as `K` are skipped.
    pub fn decode_serialized<K: PayloadKey>(
        &self,
        map: &BTreeMap<String, String>,
    ) -> Option<SensorFrame> {
        let (format, hex_value) = map.iter().find_map(|(key, value)| {
            let key = K::parse_key(key).ok()?.to_key_string();
            Some((self.format_for(&key)?, value))
        })?;
        match hex::decode(hex_value) {
            Ok(bytes) => self.run(format, &bytes),
            Err(e) => {
                debug!("Skipping {} payload with bad hex: {}", format.name(), e);
                None
            }
        }
    }

    fn format_for(&self, key: &str) -> Option<&dyn FrameFormat> {
        self.formats
            .iter()
            .find(|format| format.matches(key))
            .map(|format| format.as_ref())
    }

    fn run(&self, format: &dyn FrameFormat, bytes: &[u8]) -> Option<SensorFrame> {
        match catch_unwind(AssertUnwindSafe(|| format.parse(bytes))) {
            Ok(frame) => {
                if frame.is_none() {
                    debug!(
                        "{} frame not decoded ({} bytes)",
                        format.name(),
                        bytes.len()
                    );
                }
                frame
            }
            Err(_) => {
                debug!("{} format panicked while parsing", format.name());
                None
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("formats", &self.format_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::sensor_frame;

    const SERVICE_KEY: &str = "00004000-0000-1000-8000-00805f9b34fb";

    fn live(key: &str, bytes: Vec<u8>) -> DataMap<String> {
        DataMap::Live(BTreeMap::from([(key.to_string(), Bytes::from(bytes))]))
    }

    #[test]
    fn test_parse_full_battery_idle() {
        let frame = parse_realtime_frame(&sensor_frame(3000, 42, MOTION_IDLE)).unwrap();
        let battery = frame.battery.unwrap();
        assert_eq!(battery.mv, 3000);
        assert_eq!(battery.percent, 100.0);
        assert_eq!(frame.uptime, Some(42));

        let motion = frame.motion.unwrap();
        assert!(!motion.active);
        assert_eq!(motion.countdown, 0);
    }

    #[test]
    fn test_parse_empty_battery_triggered() {
        let frame = parse_realtime_frame(&sensor_frame(2000, 0x0102_0304, 30)).unwrap();
        assert_eq!(frame.battery.unwrap().percent, 0.0);
        assert_eq!(frame.uptime, Some(0x0102_0304));

        let motion = frame.motion.unwrap();
        assert!(motion.active);
        assert_eq!(motion.countdown, 30);
    }

    #[test]
    fn test_parse_big_endian_fields() {
        let mut bytes = vec![0u8; 20];
        bytes[6] = 0x0B;
        bytes[7] = 0xB8; // 3000
        bytes[14..18].copy_from_slice(&[0x00, 0x00, 0x01, 0x00]);
        bytes[18] = 0x00;
        bytes[19] = 0x05;
        let frame = parse_realtime_frame(&bytes).unwrap();
        assert_eq!(frame.battery.unwrap().mv, 3000);
        assert_eq!(frame.uptime, Some(256));
        assert_eq!(frame.motion.unwrap().countdown, 5);
    }

    #[test]
    fn test_parse_short_frame() {
        assert!(parse_realtime_frame(&[0u8; 19]).is_none());
        assert!(parse_realtime_frame(&[]).is_none());
    }

    #[test]
    fn test_battery_percent_clamps() {
        assert_eq!(estimate_battery_percent(0), 0.0);
        assert_eq!(estimate_battery_percent(2000), 0.0);
        assert!((estimate_battery_percent(2750) - 75.0).abs() < 0.01);
        assert_eq!(estimate_battery_percent(3000), 100.0);
        assert_eq!(estimate_battery_percent(u16::MAX), 100.0);
    }

    #[test]
    fn test_decode_matches_key_case_insensitively() {
        let decoder = Decoder::standard();
        let data = live("0000400A-FEED", sensor_frame(2500, 1, MOTION_IDLE));
        assert!(decoder.decode(&data).is_some());

        let data = live("ABCD4000", sensor_frame(2500, 1, MOTION_IDLE));
        assert!(decoder.decode(&data).is_some());
    }

    #[test]
    fn test_decode_no_matching_key() {
        let decoder = Decoder::standard();
        let data = live("180f", sensor_frame(2500, 1, MOTION_IDLE));
        assert!(decoder.decode(&data).is_none());
        assert!(decoder.decode(&DataMap::<String>::default()).is_none());
    }

    #[test]
    fn test_decode_live_and_serialized_agree() {
        let decoder = Decoder::standard();
        let bytes = sensor_frame(2750, 99, 12);
        let live_map = live(SERVICE_KEY, bytes.clone());
        let serialized = DataMap::<String>::Serialized(live_map.to_hex_map());

        let a = decoder.decode(&live_map).unwrap();
        let b = decoder.decode(&serialized).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_manufacturer_data() {
        let decoder = Decoder::standard();
        let data = DataMap::<u16>::Live(BTreeMap::from([(
            0x4000,
            Bytes::from(sensor_frame(2600, 5, MOTION_IDLE)),
        )]));
        let frame = decoder.decode(&data).unwrap();
        assert_eq!(frame.battery.unwrap().mv, 2600);
    }

    #[test]
    fn test_decode_decimal_manufacturer_key() {
        let decoder = Decoder::standard();
        let frame = sensor_frame(2600, 5, MOTION_IDLE);
        let live = DataMap::<u16>::Live(BTreeMap::from([(0x4000, Bytes::from(frame.clone()))]));
        let serialized = DataMap::<u16>::Serialized(BTreeMap::from([(
            "16384".to_string(),
            hex::encode(&frame),
        )]));

        assert_eq!(decoder.decode(&serialized), decoder.decode(&live));
        assert_eq!(decoder.decode(&serialized).unwrap().battery.unwrap().mv, 2600);
    }

    #[test]
    fn test_decode_serialized_bad_hex() {
        let decoder = Decoder::standard();
        let data = DataMap::<String>::Serialized(BTreeMap::from([(
            SERVICE_KEY.to_string(),
            "not hex".to_string(),
        )]));
        assert!(decoder.decode(&data).is_none());
    }

    #[test]
    fn test_empty_decoder_decodes_nothing() {
        let decoder = Decoder::empty();
        let data = live(SERVICE_KEY, sensor_frame(2500, 1, MOTION_IDLE));
        assert!(decoder.decode(&data).is_none());
    }

    struct CounterFormat;

    impl FrameFormat for CounterFormat {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn matches(&self, key: &str) -> bool {
            key.eq_ignore_ascii_case("aa16")
        }

        fn parse(&self, data: &[u8]) -> Option<SensorFrame> {
            let countdown = u16::from(*data.first()?);
            Some(SensorFrame {
                format: self.name(),
                battery: None,
                uptime: None,
                motion: Some(MotionReading {
                    active: countdown > 0,
                    countdown,
                }),
            })
        }
    }

    struct PanickingFormat;

    impl FrameFormat for PanickingFormat {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn matches(&self, _key: &str) -> bool {
            true
        }

        fn parse(&self, _data: &[u8]) -> Option<SensorFrame> {
            panic!("bad format");
        }
    }

    #[test]
    fn test_extension_format() {
        let decoder = Decoder::standard().with_format(CounterFormat);
        assert_eq!(decoder.format_names(), vec!["realtime", "counter"]);

        let frame = decoder.decode(&live("AA16", vec![7])).unwrap();
        assert_eq!(frame.format, "counter");
        assert!(frame.battery.is_none());
        assert_eq!(frame.motion.unwrap().countdown, 7);
    }

    #[test]
    fn test_panicking_format_degrades_to_none() {
        let decoder = Decoder::empty().with_format(PanickingFormat);
        assert!(decoder.decode(&live("any", vec![1, 2, 3])).is_none());
    }
}
