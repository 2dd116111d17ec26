//! End-to-end tests: session -> scheduler -> store -> bus -> recorder -> query.

use std::sync::Arc;
use std::time::Duration;

use blewatch_core::filter::{QueryConfig, SortKey, SortOrder, query};
use blewatch_core::mock::PacketBuilder;
use blewatch_core::{
    BusEvent, DeviceStore, Error, EventBus, PlaybackState, Recorder, ReplayOptions,
    ReplayScheduler, ReplaySession, SessionMeta, SessionPacket, Topic,
};

fn demo_session() -> ReplaySession {
    let packets = vec![
        SessionPacket::new(
            0.0,
            PacketBuilder::new("AA:01")
                .name("Zebra")
                .rssi(-50)
                .tx_power(-128)
                .sensor_frame(3000, 10, 0xFFFF)
                .build(),
        ),
        SessionPacket::new(
            200.0,
            PacketBuilder::new("AA:02").name("Alpha").rssi(-90).build(),
        ),
        SessionPacket::new(
            500.0,
            PacketBuilder::new("AA:01")
                .rssi(-70)
                .sensor_frame(2000, 11, 25)
                .build(),
        ),
    ];
    ReplaySession::new(SessionMeta::now("demo"), packets).unwrap()
}

#[tokio::test(start_paused = true)]
async fn replay_populates_store() {
    let bus = EventBus::shared();
    let (_id, mut updates) = bus.subscribe_channel(Topic::DeviceUpdated);
    let store = Arc::new(DeviceStore::new(Arc::clone(&bus)));
    let scheduler =
        ReplayScheduler::new(store.clone(), Arc::clone(&bus), ReplayOptions::default()).unwrap();

    scheduler.load(demo_session()).await.unwrap();
    scheduler.start().await.unwrap();
    assert_eq!(scheduler.wait_stopped().await.unwrap(), PlaybackState::Stopped);

    assert_eq!(store.len(), 2);
    let zebra = store.get_by_id("AA:01").unwrap();
    assert_eq!(zebra.name, "Zebra");
    assert_eq!(zebra.stats.total, 2);
    assert_eq!(zebra.stats.rssi_min, -70);
    assert_eq!(zebra.stats.rssi_max, -50);
    assert_eq!(zebra.raw.tx_power, None);

    let battery: Vec<f32> = zebra.decoded.battery.iter().map(|s| s.percent).collect();
    assert_eq!(battery, vec![100.0, 0.0]);
    let motion: Vec<bool> = zebra.decoded.motion.iter().map(|s| s.active).collect();
    assert_eq!(motion, vec![false, true]);
    assert_eq!(zebra.decoded.uptime, Some(11));

    let mut count = 0;
    while let Ok(BusEvent::DeviceUpdated(_)) = updates.try_recv() {
        count += 1;
    }
    assert_eq!(count, 3);
}

#[tokio::test(start_paused = true)]
async fn query_over_replayed_state() {
    let bus = EventBus::shared();
    let store = Arc::new(DeviceStore::new(Arc::clone(&bus)));
    let scheduler =
        ReplayScheduler::new(store.clone(), Arc::clone(&bus), ReplayOptions::default()).unwrap();
    scheduler.load(demo_session()).await.unwrap();
    scheduler.start().await.unwrap();
    scheduler.wait_stopped().await.unwrap();

    let snapshot = store.get_all();
    let strong = query(&snapshot, &QueryConfig::new().min_rssi(-80));
    assert_eq!(strong.len(), 1);
    assert_eq!(strong[0].id, "AA:01");

    let by_name = query(&snapshot, &QueryConfig::new().sort(SortKey::Name, SortOrder::Asc));
    let names: Vec<&str> = by_name.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Zebra"]);
}

#[tokio::test(start_paused = true)]
async fn recorder_output_replays_identically() {
    // First pass: replay the demo session while recording.
    let bus = EventBus::shared();
    let store = Arc::new(DeviceStore::new(Arc::clone(&bus)));
    let recorder = Recorder::new(Arc::clone(&bus), 100);
    let scheduler =
        ReplayScheduler::new(store.clone(), Arc::clone(&bus), ReplayOptions::default()).unwrap();

    recorder.start();
    scheduler.load(demo_session()).await.unwrap();
    scheduler.start().await.unwrap();
    scheduler.wait_stopped().await.unwrap();
    recorder.stop();

    let json = recorder.to_json("captured").unwrap();
    let captured = ReplaySession::from_json(&json).unwrap();
    assert_eq!(captured.len(), 3);
    assert_eq!(captured.relative_offsets(), vec![0.0, 200.0, 500.0]);

    // Second pass: replay the capture into a fresh store.
    let bus2 = EventBus::shared();
    let store2 = Arc::new(DeviceStore::new(Arc::clone(&bus2)));
    let scheduler2 = ReplayScheduler::new(store2.clone(), bus2, ReplayOptions::default()).unwrap();
    scheduler2.load(captured).await.unwrap();
    scheduler2.start().await.unwrap();
    scheduler2.wait_stopped().await.unwrap();

    let first: Vec<_> = store.get_all().into_iter().map(|r| (r.id, r.name, r.stats.total, r.decoded.battery.len())).collect();
    let second: Vec<_> = store2.get_all().into_iter().map(|r| (r.id, r.name, r.stats.total, r.decoded.battery.len())).collect();
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn rejected_session_leaves_store_unchanged() {
    let bus = EventBus::shared();
    let store = Arc::new(DeviceStore::new(Arc::clone(&bus)));
    store.upsert(&PacketBuilder::new("existing").build());

    let scheduler =
        ReplayScheduler::new(store.clone(), Arc::clone(&bus), ReplayOptions::default()).unwrap();
    let result = ReplaySession::from_json(r#"{"meta":{"name":"empty","created":0,"version":1},"packets":[]}"#);
    assert!(matches!(result, Err(Error::InvalidSession(_))));

    assert!(matches!(scheduler.start().await, Err(Error::NoSessionLoaded)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.len(), 1);
    assert_eq!(store.get_by_id("existing").unwrap().stats.total, 1);
}

#[tokio::test(start_paused = true)]
async fn rate_ticker_tracks_replay_rate() {
    let bus = EventBus::shared();
    let store = Arc::new(DeviceStore::new(Arc::clone(&bus)));
    let cancel = tokio_util::sync::CancellationToken::new();
    let ticker = store.start_rate_ticker(cancel.clone());

    let packets = (0..5)
        .map(|i| SessionPacket::new(f64::from(i) * 100.0, PacketBuilder::new("busy").build()))
        .collect();
    let session = ReplaySession::new(SessionMeta::now("burst"), packets).unwrap();
    let scheduler =
        ReplayScheduler::new(store.clone(), Arc::clone(&bus), ReplayOptions::default()).unwrap();
    scheduler.load(session).await.unwrap();
    scheduler.start().await.unwrap();
    scheduler.wait_stopped().await.unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    let stats = store.get_by_id("busy").unwrap().stats;
    assert_eq!(stats.rate, 5);
    assert_eq!(stats.bucket, 0);

    cancel.cancel();
    ticker.await.unwrap();
}
