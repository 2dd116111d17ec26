//! Event-driven device-state engine for BLE advertisements.
//!
//! This crate ingests advertisement packets, from a live scanner adapter or a
//! recorded session, folds them into canonical per-device records, decodes
//! the embedded sensor frame, and republishes state changes on an in-process
//! event bus.
//!
//! # Features
//!
//! - **Event bus**: synchronous, ordered publish/subscribe with per-handler
//!   panic isolation ([`EventBus`])
//! - **Device store**: merge/upsert with running statistics, bounded decoded
//!   history and defensive snapshots ([`DeviceStore`])
//! - **Sensor decoding**: 20-byte realtime frame on service `0x4000`, from
//!   live bytes or hex strings alike ([`Decoder`])
//! - **Session replay**: recorded timing reproduced with pause, resume, loop
//!   and rate scaling on a single re-armed timer ([`ReplayScheduler`])
//! - **Recording**: bounded capture into the session format ([`Recorder`])
//! - **Queries**: pure filter/sort over store snapshots ([`filter::query`])
//!
//! # Data Flow
//!
//! ```text
//! packet source ──deliver──> DeviceStore ──DEVICE_UPDATED──> consumers
//!       │                        │
//!       └──ADVERTISEMENT──> Recorder          query(snapshot) <── on demand
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use blewatch_core::{DeviceStore, EventBus, Topic};
//! use blewatch_core::filter::{query, QueryConfig};
//! use blewatch_core::mock::PacketBuilder;
//!
//! let bus = EventBus::shared();
//! bus.subscribe(Topic::DeviceUpdated, |event| println!("{:?}", event.topic()));
//!
//! let store = DeviceStore::new(Arc::clone(&bus));
//! store.upsert(&PacketBuilder::new("AA:01").name("Tag").rssi(-52).sensor_frame(2900, 60, 0xFFFF).build());
//! store.upsert(&PacketBuilder::new("AA:02").rssi(-95).build());
//!
//! let visible = query(&store.get_all(), &QueryConfig::new().min_rssi(-80));
//! assert_eq!(visible.len(), 1);
//! assert_eq!(visible[0].decoded.battery[0].mv, 2900);
//! ```

pub mod bus;
pub mod config;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod mock;
pub mod playback;
pub mod recorder;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod traits;

// Re-export the data model
pub use blewatch_types::types;

// Core exports
pub use bus::{BusEvent, EventBus, ScanStatus, SubscriptionId, Topic};
pub use config::{Config, ConfigError, ValidationError, default_config_path};
pub use decoder::{
    BatteryReading, Decoder, FrameFormat, MotionReading, RealtimeFormat, SensorFrame,
    estimate_battery_percent,
};
pub use error::{Error, Result};
pub use filter::{FilterField, QueryConfig, SortKey, SortOrder, query};
pub use playback::{MIN_LOOP_PERIOD, Playback, PlaybackState};
pub use recorder::Recorder;
pub use scheduler::{ReplayOptions, ReplayScheduler};
pub use session::{MAX_OFFSET_MS, ReplaySession, SessionMeta, SessionPacket};
pub use store::{DeviceStore, StoreOptions};
pub use traits::PacketSink;
