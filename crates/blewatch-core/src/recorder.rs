//! Bounded capture of advertisements into a replay session.
//!
//! The [`Recorder`] listens on [`Topic::Advertisement`], independently of the
//! store, and keeps every packet with its offset from [`Recorder::start`].
//! Capture stops growing at `max_records`: later packets are dropped and a
//! single warning is logged.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;
use tracing::{info, warn};

use blewatch_types::AdvertisementPacket;

use crate::bus::{BusEvent, EventBus, SubscriptionId, Topic};
use crate::error::Result;
use crate::session::{ReplaySession, SessionMeta, SessionPacket};

/// Default capture limit.
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

#[derive(Debug)]
struct Capture {
    records: Vec<SessionPacket>,
    started: Instant,
    truncated: bool,
    max_records: usize,
}

impl Capture {
    fn push(&mut self, packet: &AdvertisementPacket) {
        if self.records.len() >= self.max_records {
            if !self.truncated {
                warn!(
                    "Recorder reached {} packets; further packets will be dropped",
                    self.max_records
                );
                self.truncated = true;
            }
            return;
        }
        let t = self.started.elapsed().as_secs_f64() * 1000.0;
        self.records
            .push(SessionPacket::new(t.round(), packet.to_serialized()));
    }
}

/// Records advertisements published on a bus.
pub struct Recorder {
    bus: Arc<EventBus>,
    capture: Arc<Mutex<Capture>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Recorder {
    /// Create a stopped recorder with the given capture limit.
    pub fn new(bus: Arc<EventBus>, max_records: usize) -> Self {
        Self {
            bus,
            capture: Arc::new(Mutex::new(Capture {
                records: Vec::new(),
                started: Instant::now(),
                truncated: false,
                max_records: max_records.max(1),
            })),
            subscription: Mutex::new(None),
        }
    }

    /// Begin a new capture, discarding any previous one.
    ///
    /// Returns `false` (and keeps the current capture) if already recording.
    pub fn start(&self) -> bool {
        let mut subscription = lock(&self.subscription);
        if subscription.is_some() {
            return false;
        }

        {
            let mut capture = lock(&self.capture);
            capture.records.clear();
            capture.truncated = false;
            capture.started = Instant::now();
        }

        let capture = Arc::clone(&self.capture);
        let id = self.bus.subscribe(Topic::Advertisement, move |event| {
            if let BusEvent::Advertisement(packet) = event {
                lock(&capture).push(packet);
            }
        });
        *subscription = Some(id);
        info!("Recording started");
        true
    }

    /// Stop capturing. Returns `false` if not recording.
    pub fn stop(&self) -> bool {
        let Some(id) = lock(&self.subscription).take() else {
            return false;
        };
        self.bus.unsubscribe(id);
        info!("Recording stopped ({} packets)", self.len());
        true
    }

    /// Whether a capture is in progress.
    pub fn is_recording(&self) -> bool {
        lock(&self.subscription).is_some()
    }

    /// Number of packets captured.
    pub fn len(&self) -> usize {
        lock(&self.capture).records.len()
    }

    /// Whether nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether packets were dropped at the capture limit.
    pub fn is_truncated(&self) -> bool {
        lock(&self.capture).truncated
    }

    /// Capture limit.
    pub fn max_records(&self) -> usize {
        lock(&self.capture).max_records
    }

    /// Build a replay session from the capture.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSession`](crate::Error::InvalidSession) if
    /// nothing was captured.
    pub fn session(&self, name: &str) -> Result<ReplaySession> {
        let records = lock(&self.capture).records.clone();
        ReplaySession::new(SessionMeta::now(name), records)
    }

    /// The capture as a pretty-printed session document.
    pub fn to_json(&self, name: &str) -> Result<String> {
        self.session(name)?.to_json()
    }

    /// Write the capture to `path` as a session document.
    pub fn save<P: AsRef<Path>>(&self, path: P, name: &str) -> Result<()> {
        self.session(name)?.save(path)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(id) = lock(&self.subscription).take() {
            self.bus.unsubscribe(id);
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("recording", &self.is_recording())
            .field("packets", &self.len())
            .field("truncated", &self.is_truncated())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
