//! In-process event bus.
//!
//! A synchronous publish/subscribe registry: [`EventBus::publish`] calls every
//! handler subscribed to the event's [`Topic`] on the caller's thread, in
//! subscription order, before returning. There is no queueing and no
//! backpressure. A handler that panics is logged and skipped; the remaining
//! handlers still receive the event.
//!
//! Async consumers can bridge a topic onto a channel with
//! [`EventBus::subscribe_channel`].

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use blewatch_types::{AdvertisementPacket, DeviceRecord};

/// Event topics exposed to consumers.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new topics
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum Topic {
    /// Raw packet from a packet source (source -> store, recorder).
    Advertisement,
    /// Updated device snapshot (store -> consumers).
    DeviceUpdated,
    /// A packet source started or stopped.
    ScanStatus,
    /// The store was cleared.
    Reset,
}

impl Topic {
    /// Wire name of the topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Advertisement => "ADVERTISEMENT",
            Topic::DeviceUpdated => "DEVICE_UPDATED",
            Topic::ScanStatus => "SCAN_STATUS",
            Topic::Reset => "RESET",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of [`Topic::ScanStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatus {
    /// Whether the source is currently delivering packets.
    pub running: bool,
    /// Source name, e.g. `"replay"` or `"live"`.
    pub source: String,
}

impl ScanStatus {
    /// Status event for the replay scheduler.
    pub fn replay(running: bool) -> Self {
        Self {
            running,
            source: "replay".to_string(),
        }
    }
}

/// Events carried by the bus.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum BusEvent {
    /// A packet as delivered by its source.
    Advertisement(AdvertisementPacket),
    /// An independent snapshot of a device after an upsert.
    DeviceUpdated(DeviceRecord),
    /// A packet source changed state.
    ScanStatus(ScanStatus),
    /// All devices were removed from the store.
    Reset,
}

impl BusEvent {
    /// Topic this event is published under.
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::Advertisement(_) => Topic::Advertisement,
            BusEvent::DeviceUpdated(_) => Topic::DeviceUpdated,
            BusEvent::ScanStatus(_) => Topic::ScanStatus,
            BusEvent::Reset => Topic::Reset,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
}

/// Synchronous topic -> ordered handler registry.
///
/// Share it between components with `Arc<EventBus>`.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<Topic, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bus behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register `handler` for `topic`.
    ///
    /// Handlers run synchronously inside [`publish`](Self::publish), after all
    /// handlers registered earlier for the same topic.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry().entry(topic).or_default().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        trace!("Subscribed {:?} to {}", id, topic);
        id
    }

    /// Forward every event on `topic` into an unbounded channel.
    pub fn subscribe_channel(
        &self,
        topic: Topic,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<BusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(topic, move |event| {
            // Receiver dropped: nothing left to forward to.
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        for subscribers in registry.values_mut() {
            if let Some(pos) = subscribers.iter().position(|s| s.id == id) {
                subscribers.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every current subscriber of its topic.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn publish(&self, event: &BusEvent) -> usize {
        let topic = event.topic();
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let handlers: Vec<(SubscriptionId, Handler)> = self
            .registry()
            .get(&topic)
            .map(|subs| {
                subs.iter()
                    .map(|s| (s.id, Arc::clone(&s.handler)))
                    .collect()
            })
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!("Event handler {:?} panicked while handling {}", id, topic),
            }
        }
        delivered
    }

    /// Number of handlers subscribed to `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry().get(&topic).map_or(0, Vec::len)
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<Topic, Vec<Subscriber>>> {
        // Handlers never run under this lock.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry();
        let counts: HashMap<Topic, usize> =
            registry.iter().map(|(topic, subs)| (*topic, subs.len())).collect();
        f.debug_struct("EventBus")
            .field("subscribers", &counts)
            .finish()
    }
}
