//! Canonical per-device state.
//!
//! [`DeviceStore`] is the single owner and mutator of device records. Every
//! mutating operation runs under one store-wide lock, so upserts and the
//! periodic rate tick never interleave on the same counters. Reads and
//! published events always carry clones; no caller ever holds a reference
//! into the store.
//!
//! # Example
//!
//! ```
//! use blewatch_core::{DeviceStore, EventBus};
//! use blewatch_core::mock::PacketBuilder;
//!
//! let store = DeviceStore::new(EventBus::shared());
//! let record = store
//!     .upsert(&PacketBuilder::new("dev-1").rssi(-50).build())
//!     .unwrap();
//! assert_eq!(record.stats.total, 1);
//! assert_eq!(store.len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blewatch_types::{
    AdvertisementPacket, BatterySample, DEFAULT_HISTORY_CAP, DeviceRecord, MotionSample, RawData,
    UNKNOWN_NAME,
};

use crate::bus::{BusEvent, EventBus};
use crate::decoder::{Decoder, SensorFrame};
use crate::traits::PacketSink;

/// Options for a [`DeviceStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Maximum samples kept per decoded history series.
    pub history_cap: usize,
    /// Period of the rate tick started by [`DeviceStore::start_rate_ticker`].
    pub rate_interval: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            history_cap: DEFAULT_HISTORY_CAP,
            rate_interval: Duration::from_secs(1),
        }
    }
}

impl StoreOptions {
    /// Create new options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the decoded history cap (at least 1).
    #[must_use]
    pub fn history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap.max(1);
        self
    }

    /// Set the rate tick period.
    #[must_use]
    pub fn rate_interval(mut self, interval: Duration) -> Self {
        self.rate_interval = interval;
        self
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Records in first-seen order.
    records: Vec<DeviceRecord>,
    /// Device id -> position in `records`.
    index: HashMap<String, usize>,
}

/// Store of device records keyed by device id.
///
/// Share it with `Arc<DeviceStore>`; all methods take `&self`.
pub struct DeviceStore {
    inner: Mutex<StoreInner>,
    bus: Arc<EventBus>,
    decoder: Decoder,
    options: StoreOptions,
}

impl DeviceStore {
    /// Create an empty store publishing on `bus`, with default options and
    /// the standard decoder.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_options(bus, StoreOptions::default())
    }

    /// Create an empty store with the given options.
    pub fn with_options(bus: Arc<EventBus>, options: StoreOptions) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            bus,
            decoder: Decoder::standard(),
            options,
        }
    }

    /// Replace the payload decoder.
    #[must_use]
    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// The bus this store publishes on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The store options.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Merge a packet into the store, timestamped now.
    ///
    /// Returns a snapshot of the updated record, or `None` if the packet had
    /// no device id and was dropped.
    pub fn upsert(&self, packet: &AdvertisementPacket) -> Option<DeviceRecord> {
        self.upsert_at(packet, OffsetDateTime::now_utc())
    }

    /// Merge a packet into the store with an explicit receive time.
    pub fn upsert_at(&self, packet: &AdvertisementPacket, now: OffsetDateTime) -> Option<DeviceRecord> {
        let Some(id) = packet.device_id() else {
            warn!("Dropping packet without device id (rssi {} dBm)", packet.rssi);
            return None;
        };

        // Decoding and payload normalization need no lock.
        let frame = self.decode(packet);
        let raw = RawData {
            uuids: packet.uuids.clone(),
            manufacturer_data: packet.manufacturer_data.to_byte_map_lossy(),
            service_data: packet.service_data.to_byte_map_lossy(),
            tx_power: packet.normalized_tx_power(),
        };
        let name = packet.device.name.as_deref();

        let snapshot = {
            let mut inner = self.lock();
            let StoreInner { records, index } = &mut *inner;
            let record = match index.get(id).copied() {
                Some(pos) => {
                    let record = &mut records[pos];
                    record.rssi = packet.rssi;
                    record.last_seen = now;
                    record.stats.observe_rssi(packet.rssi);
                    if let Some(name) = name.filter(|n| !n.is_empty() && *n != UNKNOWN_NAME) {
                        if record.name != name {
                            debug!("Device {} renamed {} -> {}", id, record.name, name);
                            record.name = name.to_string();
                        }
                    }
                    record
                }
                None => {
                    debug!("New device {} ({})", id, name.unwrap_or(UNKNOWN_NAME));
                    index.insert(id.to_string(), records.len());
                    records.push(DeviceRecord::new(id, name, packet.rssi, now));
                    let last = records.len() - 1;
                    &mut records[last]
                }
            };

            record.raw = raw;
            record.stats.total = record.stats.total.saturating_add(1);
            record.stats.bucket = record.stats.bucket.saturating_add(1);
            if let Some(frame) = frame {
                apply_frame(record, &frame, now, self.options.history_cap);
            }
            record.clone()
        };

        self.bus.publish(&BusEvent::DeviceUpdated(snapshot.clone()));
        Some(snapshot)
    }

    /// Snapshot of every record, in first-seen order.
    pub fn get_all(&self) -> Vec<DeviceRecord> {
        self.lock().records.clone()
    }

    /// Snapshot of one record.
    pub fn get_by_id(&self, id: &str) -> Option<DeviceRecord> {
        let inner = self.lock();
        inner.index.get(id).map(|&pos| inner.records[pos].clone())
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether no device has been seen.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every record and publish [`BusEvent::Reset`].
    pub fn clear(&self) {
        let removed = {
            let mut inner = self.lock();
            let removed = inner.records.len();
            inner.records.clear();
            inner.index.clear();
            removed
        };
        info!("Cleared {} devices", removed);
        self.bus.publish(&BusEvent::Reset);
    }

    /// Close the current sampling interval: `rate = bucket; bucket = 0` for
    /// every record.
    pub fn tick_rates(&self) {
        let mut inner = self.lock();
        for record in &mut inner.records {
            record.stats.rate = record.stats.bucket;
            record.stats.bucket = 0;
        }
    }

    /// Start a background task calling [`tick_rates`](Self::tick_rates) every
    /// [`StoreOptions::rate_interval`].
    ///
    /// The task runs until the cancellation token is triggered.
    pub fn start_rate_ticker(self: &Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = store.options.rate_interval;

        tokio::spawn(async move {
            debug!("Starting rate ticker ({:?})", period);
            let mut ticker = interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Rate ticker cancelled");
                        break;
                    }
                    _ = ticker.tick() => store.tick_rates(),
                }
            }
        })
    }

    fn decode(&self, packet: &AdvertisementPacket) -> Option<SensorFrame> {
        self.decoder
            .decode(&packet.service_data)
            .or_else(|| self.decoder.decode(&packet.manufacturer_data))
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // Nothing under this lock panics; recover the data regardless.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn apply_frame(record: &mut DeviceRecord, frame: &SensorFrame, now: OffsetDateTime, cap: usize) {
    let decoded = &mut record.decoded;
    if let Some(battery) = frame.battery {
        decoded.push_battery(
            BatterySample {
                t: now,
                mv: battery.mv,
                percent: battery.percent,
            },
            cap,
        );
    }
    if let Some(motion) = frame.motion {
        decoded.push_motion(
            MotionSample {
                t: now,
                active: motion.active,
                countdown: motion.countdown,
            },
            cap,
        );
    }
    if frame.uptime.is_some() {
        decoded.uptime = frame.uptime;
    }
}

impl PacketSink for DeviceStore {
    fn deliver(&self, packet: &AdvertisementPacket) {
        // Dropped packets are already logged by upsert.
        let _ = self.upsert(packet);
    }
}

impl std::fmt::Debug for DeviceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStore")
            .field("devices", &self.len())
            .field("decoder", &self.decoder)
            .field("options", &self.options)
            .finish()
    }
}
