//! Trait abstractions for packet consumers.
//!
//! Packet sources (the replay scheduler, or a live scanner adapter in a host
//! application) hand every packet to a [`PacketSink`]. The
//! [`DeviceStore`](crate::store::DeviceStore) is the usual sink; closures work
//! too, which keeps tests and ad-hoc tooling simple.

use blewatch_types::AdvertisementPacket;

/// Consumer of advertisement packets.
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use blewatch_core::PacketSink;
/// use blewatch_types::AdvertisementPacket;
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = {
///     let seen = Arc::clone(&seen);
///     move |packet: &AdvertisementPacket| {
///         seen.lock().unwrap().push(packet.rssi);
///     }
/// };
///
/// sink.deliver(&AdvertisementPacket::new("dev", -42));
/// assert_eq!(*seen.lock().unwrap(), vec![-42]);
/// ```
pub trait PacketSink: Send + Sync {
    /// Accept one packet. Must not block.
    fn deliver(&self, packet: &AdvertisementPacket);
}

impl<F> PacketSink for F
where
    F: Fn(&AdvertisementPacket) + Send + Sync,
{
    fn deliver(&self, packet: &AdvertisementPacket) {
        self(packet)
    }
}
