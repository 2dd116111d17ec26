//! Recorded replay sessions.
//!
//! A session is a JSON document:
//!
//! ```json
//! {
//!   "meta": { "name": "desk", "created": 1718000000000, "version": 1 },
//!   "packets": [
//!     { "t": 0, "device": { "id": "AA:BB", "name": null }, "rssi": -60,
//!       "txPower": null, "uuids": [], "manufacturerData": { "0xFFFF": "0A FF 10" },
//!       "serviceData": {} }
//!   ]
//! }
//! ```
//!
//! `t` is the packet's offset in milliseconds from the start of the recording.
//! [`ReplaySession`] can only be obtained through validation: the packet list
//! is non-empty, every offset is finite, non-negative and at most
//! [`MAX_OFFSET_MS`], every hex payload parses, and packets are sorted by
//! offset (stable for equal offsets).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use blewatch_types::AdvertisementPacket;

use crate::error::{Error, Result};

/// Current session format version.
pub const SESSION_VERSION: u32 = 1;

/// Largest accepted packet offset in milliseconds (about 49.7 days).
pub const MAX_OFFSET_MS: f64 = u32::MAX as f64;

/// Session header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Human readable session name.
    #[serde(default)]
    pub name: String,
    /// Creation time, milliseconds since the Unix epoch.
    #[serde(default)]
    pub created: i64,
    /// Format version.
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    SESSION_VERSION
}

impl SessionMeta {
    /// Header for a session created now.
    pub fn now(name: impl Into<String>) -> Self {
        let created = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        Self {
            name: name.into(),
            created: i64::try_from(created).unwrap_or(i64::MAX),
            version: SESSION_VERSION,
        }
    }
}

impl Default for SessionMeta {
    fn default() -> Self {
        Self {
            name: String::new(),
            created: 0,
            version: SESSION_VERSION,
        }
    }
}

/// A packet with its offset into the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPacket {
    /// Offset from the start of the recording, in milliseconds.
    pub t: f64,
    /// The recorded packet.
    #[serde(flatten)]
    pub packet: AdvertisementPacket,
}

impl SessionPacket {
    /// Pair a packet with its offset.
    pub fn new(t: f64, packet: AdvertisementPacket) -> Self {
        Self { t, packet }
    }
}

#[derive(Deserialize)]
struct SessionDocument {
    #[serde(default)]
    meta: SessionMeta,
    packets: Option<Vec<SessionPacket>>,
}

/// A validated, offset-ordered replay session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaySession {
    meta: SessionMeta,
    packets: Vec<SessionPacket>,
}

impl ReplaySession {
    /// Validate and order a packet list.
    ///
    /// Payload maps are converted to the serialized shape and TX power
    /// sentinels are normalized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSession`] if the list is empty, an offset is
    /// negative, not finite or above [`MAX_OFFSET_MS`], or a payload does not
    /// parse.
    pub fn new(meta: SessionMeta, packets: Vec<SessionPacket>) -> Result<Self> {
        if packets.is_empty() {
            return Err(Error::invalid_session("packet list is empty"));
        }

        let mut validated = Vec::with_capacity(packets.len());
        for (i, entry) in packets.into_iter().enumerate() {
            if !entry.t.is_finite() || entry.t < 0.0 {
                return Err(Error::invalid_session(format!(
                    "packet {}: offset {} is not a non-negative number",
                    i, entry.t
                )));
            }
            if entry.t > MAX_OFFSET_MS {
                return Err(Error::invalid_session(format!(
                    "packet {}: offset {} exceeds the maximum of {} ms",
                    i, entry.t, MAX_OFFSET_MS
                )));
            }
            let packet = entry.packet.to_serialized();
            packet
                .manufacturer_data
                .to_byte_map()
                .and(packet.service_data.to_byte_map().map(|_| ()))
                .map_err(|e| Error::invalid_session(format!("packet {}: {}", i, e)))?;
            validated.push(SessionPacket::new(entry.t, packet));
        }

        // Vec::sort_by is stable: equal offsets keep file order.
        validated.sort_by(|a, b| a.t.total_cmp(&b.t));

        Ok(Self {
            meta,
            packets: validated,
        })
    }

    /// Parse and validate a session document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSession`] if the text is not a session document
    /// or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: SessionDocument = serde_json::from_str(json)
            .map_err(|e| Error::invalid_session(format!("malformed session: {}", e)))?;
        let packets = document
            .packets
            .ok_or_else(|| Error::invalid_session("missing packet list"))?;
        let session = Self::new(document.meta, packets)?;
        debug!(
            "Parsed session '{}' ({} packets)",
            session.meta.name,
            session.len()
        );
        Ok(session)
    }

    /// Read and validate a session file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let session = Self::from_json(&text)?;
        info!(
            "Loaded session '{}' from {} ({} packets, {:?})",
            session.meta.name,
            path.display(),
            session.len(),
            session.duration()
        );
        Ok(session)
    }

    /// Pretty-printed JSON document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the session to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)?;
        info!("Saved session '{}' to {}", self.meta.name, path.display());
        Ok(())
    }

    /// Session header.
    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    /// Packets in offset order.
    pub fn packets(&self) -> &[SessionPacket] {
        &self.packets
    }

    /// Number of packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Always `false` for a validated session.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Offsets relative to the first packet, in milliseconds.
    pub fn relative_offsets(&self) -> Vec<f64> {
        let first = self.packets.first().map_or(0.0, |p| p.t);
        self.packets.iter().map(|p| p.t - first).collect()
    }

    /// Time between the first and last packet at real-time speed.
    pub fn duration(&self) -> Duration {
        match (self.packets.first(), self.packets.last()) {
            (Some(first), Some(last)) => {
                Duration::try_from_secs_f64((last.t - first.t) / 1000.0).unwrap_or(Duration::MAX)
            }
            _ => Duration::ZERO,
        }
    }

    /// Distinct device ids in order of first appearance.
    pub fn device_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.packets
            .iter()
            .filter_map(|p| p.packet.device_id())
            .filter(|id| seen.insert(*id))
            .map(str::to_string)
            .collect()
    }
}
