//! Replay scheduler.
//!
//! [`ReplayScheduler`] plays a [`ReplaySession`] into a [`PacketSink`] and onto
//! the event bus, reproducing the recorded timing. It is a handle to a
//! background task that owns the [`Playback`] clock and at most one pending
//! timer: after each delivery the next deadline is computed and a single
//! sleep is armed for it. Control calls are messages to that task and return
//! once the task has applied them, so after [`ReplayScheduler::stop`] returns
//! no further packet is delivered.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use blewatch_core::{DeviceStore, EventBus, ReplayOptions, ReplayScheduler, ReplaySession};
//!
//! # #[tokio::main(flavor = "current_thread", start_paused = true)]
//! # async fn main() -> blewatch_core::Result<()> {
//! let bus = EventBus::shared();
//! let store = Arc::new(DeviceStore::new(Arc::clone(&bus)));
//! let scheduler = ReplayScheduler::new(store.clone(), bus, ReplayOptions::default())?;
//!
//! let session = ReplaySession::from_json(
//!     r#"{"packets":[{"t":0,"device":{"id":"a"},"rssi":-60},
//!                    {"t":100,"device":{"id":"b"},"rssi":-70}]}"#,
//! )?;
//! scheduler.load(session).await?;
//! scheduler.start().await?;
//! scheduler.wait_stopped().await?;
//! assert_eq!(store.len(), 2);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use crate::bus::{BusEvent, EventBus, ScanStatus};
use crate::error::{Error, Result};
use crate::playback::{Playback, PlaybackState, RunEnd, validate_rate};
use crate::session::ReplaySession;
use crate::traits::PacketSink;

/// Options for a [`ReplayScheduler`].
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Playback speed multiplier (1.0 = real time).
    pub playback_rate: f64,
    /// Restart from the beginning after the last packet.
    ///
    /// Runs start at least [`MIN_LOOP_PERIOD`](crate::playback::MIN_LOOP_PERIOD)
    /// apart, so a session whose packets share one offset repeats at that
    /// period rather than back to back.
    pub loop_playback: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            playback_rate: 1.0,
            loop_playback: false,
        }
    }
}

impl ReplayOptions {
    /// Create new options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the playback rate.
    #[must_use]
    pub fn playback_rate(mut self, rate: f64) -> Self {
        self.playback_rate = rate;
        self
    }

    /// Enable or disable looping.
    #[must_use]
    pub fn loop_playback(mut self, enable: bool) -> Self {
        self.loop_playback = enable;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        validate_rate(self.playback_rate).map(|_| ())
    }
}

enum Command {
    Load(Box<ReplaySession>, oneshot::Sender<()>),
    Start(oneshot::Sender<Result<()>>),
    Pause(oneshot::Sender<bool>),
    Resume(oneshot::Sender<bool>),
    Stop(oneshot::Sender<bool>),
    SetRate(f64, oneshot::Sender<Result<()>>),
    SetLoop(bool, oneshot::Sender<()>),
}

/// Handle to a replay task.
///
/// Dropping the handle shuts the task down without delivering further packets.
pub struct ReplayScheduler {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PlaybackState>,
    task: JoinHandle<()>,
}

impl ReplayScheduler {
    /// Spawn a scheduler delivering to `sink` and publishing on `bus`.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(sink: Arc<dyn PacketSink>, bus: Arc<EventBus>, options: ReplayOptions) -> Result<Self> {
        let playback = Playback::new(options.playback_rate, options.loop_playback)?;
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(PlaybackState::Idle);

        let worker = Worker {
            playback,
            session: None,
            sink,
            bus,
            state: state_tx,
        };
        let task = tokio::spawn(worker.run(rx));

        Ok(Self {
            commands,
            state,
            task,
        })
    }

    /// Load a session, replacing any current one.
    ///
    /// A session that is playing is stopped first.
    pub async fn load(&self, session: ReplaySession) -> Result<()> {
        self.request(|tx| Command::Load(Box::new(session), tx)).await
    }

    /// Start playback from the first packet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSessionLoaded`] if no session was loaded.
    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await?
    }

    /// Pause playback. Returns `false` if it was not playing.
    pub async fn pause(&self) -> Result<bool> {
        self.request(Command::Pause).await
    }

    /// Resume paused playback. Returns `false` (and does nothing) if not paused.
    pub async fn resume(&self) -> Result<bool> {
        self.request(Command::Resume).await
    }

    /// Stop playback and cancel the pending timer.
    ///
    /// Idempotent; returns `false` if playback was not active. No packet is
    /// delivered after this returns.
    pub async fn stop(&self) -> Result<bool> {
        self.request(Command::Stop).await
    }

    /// Change the playback rate, keeping the current position.
    pub async fn set_playback_rate(&self, rate: f64) -> Result<()> {
        self.request(|tx| Command::SetRate(rate, tx)).await?
    }

    /// Enable or disable looping.
    pub async fn set_loop(&self, enable: bool) -> Result<()> {
        self.request(|tx| Command::SetLoop(enable, tx)).await
    }

    /// Current playback state.
    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    /// Wait until playback is no longer active.
    ///
    /// Returns immediately if playback is not playing or paused.
    pub async fn wait_stopped(&self) -> Result<PlaybackState> {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| !s.is_active())
            .await
            .map_err(|_| Error::SchedulerClosed)?;
        Ok(*settled)
    }

    /// Stop playback and wait for the task to exit.
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        // A join error means a sink panicked.
        let _ = task.await;
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| Error::SchedulerClosed)?;
        rx.await.map_err(|_| Error::SchedulerClosed)
    }
}

impl std::fmt::Debug for ReplayScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayScheduler")
            .field("state", &self.state())
            .finish()
    }
}

struct Worker {
    playback: Playback,
    session: Option<ReplaySession>,
    sink: Arc<dyn PacketSink>,
    bus: Arc<EventBus>,
    state: watch::Sender<PlaybackState>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self.playback.next_deadline();
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = wait_until(deadline) => self.fire(),
            }
        }

        if self.playback.stop() {
            self.publish_status(false);
        }
        debug!("Replay scheduler exited");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Load(session, ack) => {
                let was_playing = self.playback.state() == PlaybackState::Playing;
                if self.playback.stop() {
                    info!("Stopping current replay to load a new session");
                    // A pause already published the stop.
                    if was_playing {
                        self.publish_status(false);
                    }
                }
                info!(
                    "Replay session '{}' loaded ({} packets)",
                    session.meta().name,
                    session.len()
                );
                self.playback.load(session.relative_offsets());
                self.session = Some(*session);
                self.sync_state();
                let _ = ack.send(());
            }
            Command::Start(ack) => {
                let before = self.playback.state();
                let result = self.playback.start(Instant::now());
                match &result {
                    Ok(()) if before == PlaybackState::Playing => debug!("Replay already playing"),
                    Ok(()) => {
                        info!(
                            "Replay playing at {}x from packet {}{}",
                            self.playback.rate(),
                            self.playback.index(),
                            if self.playback.is_looping() { " (looping)" } else { "" }
                        );
                        self.publish_status(true);
                        self.sync_state();
                    }
                    Err(e) => debug!("Replay start rejected: {}", e),
                }
                let _ = ack.send(result);
            }
            Command::Pause(ack) => {
                let paused = self.playback.pause(Instant::now());
                if paused {
                    info!("Replay paused at packet {}", self.playback.index());
                    self.publish_status(false);
                    self.sync_state();
                }
                let _ = ack.send(paused);
            }
            Command::Resume(ack) => {
                let resumed = self.playback.resume(Instant::now());
                if resumed {
                    info!("Replay resumed at packet {}", self.playback.index());
                    self.publish_status(true);
                    self.sync_state();
                } else {
                    debug!("Resume ignored in state {}", self.playback.state());
                }
                let _ = ack.send(resumed);
            }
            Command::Stop(ack) => {
                let stopped = self.playback.stop();
                if stopped {
                    info!("Replay stopped");
                    self.publish_status(false);
                    self.sync_state();
                }
                let _ = ack.send(stopped);
            }
            Command::SetRate(rate, ack) => {
                let result = self.playback.set_rate(rate, Instant::now());
                if result.is_ok() {
                    debug!("Playback rate set to {}x", rate);
                }
                let _ = ack.send(result);
            }
            Command::SetLoop(enable, ack) => {
                self.playback.set_looping(enable);
                let _ = ack.send(());
            }
        }
    }

    fn fire(&mut self) {
        let Some(tick) = self.playback.poll(Instant::now()) else {
            return;
        };
        let Some(entry) = self
            .session
            .as_ref()
            .and_then(|session| session.packets().get(tick.index))
        else {
            return;
        };

        self.sink.deliver(&entry.packet);
        self.bus.publish(&BusEvent::Advertisement(entry.packet.clone()));

        match tick.end {
            Some(RunEnd::Looped) => debug!("Replay looped"),
            Some(RunEnd::Finished) => {
                info!("Replay finished");
                self.publish_status(false);
                self.sync_state();
            }
            None => {}
        }
    }

    fn publish_status(&self, running: bool) {
        self.bus
            .publish(&BusEvent::ScanStatus(ScanStatus::replay(running)));
    }

    fn sync_state(&self) {
        self.state.send_replace(self.playback.state());
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::bus::Topic;
    use crate::mock::PacketBuilder;
    use crate::session::{SessionMeta, SessionPacket};

    type Log = Arc<Mutex<Vec<(String, Duration)>>>;

    /// Sink recording (device id, time since `t0`) per delivery.
    fn timing_sink(t0: Instant) -> (Log, Arc<dyn PacketSink>) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let clone = Arc::clone(&log);
        let sink = move |packet: &blewatch_types::AdvertisementPacket| {
            let id = packet.device_id().unwrap_or_default().to_string();
            clone.lock().unwrap().push((id, t0.elapsed()));
        };
        (log, Arc::new(sink))
    }

    fn session(offsets: &[(f64, &str)]) -> ReplaySession {
        let packets = offsets
            .iter()
            .map(|(t, id)| SessionPacket::new(*t, PacketBuilder::new(*id).build()))
            .collect();
        ReplaySession::new(SessionMeta::default(), packets).unwrap()
    }

    fn ids(log: &Log) -> Vec<String> {
        log.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_session() {
        let (_, sink) = timing_sink(Instant::now());
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), ReplayOptions::default()).unwrap();
        assert!(matches!(scheduler.start().await, Err(Error::NoSessionLoaded)));
        assert_eq!(scheduler.state(), PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_at_recorded_offsets() {
        let t0 = Instant::now();
        let (log, sink) = timing_sink(t0);
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), ReplayOptions::default()).unwrap();
        scheduler
            .load(session(&[(0.0, "a"), (200.0, "b"), (500.0, "c")]))
            .await
            .unwrap();
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.wait_stopped().await.unwrap(), PlaybackState::Stopped);

        let log = log.lock().unwrap();
        let times: Vec<u128> = log.iter().map(|(_, t)| t.as_millis()).collect();
        assert_eq!(times, vec![0, 200, 500]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offsets_relative_to_first_packet() {
        let t0 = Instant::now();
        let (log, sink) = timing_sink(t0);
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), ReplayOptions::default()).unwrap();
        scheduler
            .load(session(&[(1000.0, "a"), (1100.0, "b")]))
            .await
            .unwrap();
        scheduler.start().await.unwrap();
        scheduler.wait_stopped().await.unwrap();

        let times: Vec<u128> = log.lock().unwrap().iter().map(|(_, t)| t.as_millis()).collect();
        assert_eq!(times, vec![0, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_delivers_once() {
        let t0 = Instant::now();
        let (log, sink) = timing_sink(t0);
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), ReplayOptions::default()).unwrap();
        scheduler
            .load(session(&[(0.0, "a"), (200.0, "b"), (500.0, "c")]))
            .await
            .unwrap();
        scheduler.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(scheduler.pause().await.unwrap());
        assert_eq!(ids(&log), vec!["a", "b"]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ids(&log), vec!["a", "b"]);
        assert_eq!(scheduler.state(), PlaybackState::Paused);

        assert!(scheduler.resume().await.unwrap());
        scheduler.wait_stopped().await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2].0, "c");
        // 250ms before the pause, 2000ms paused, 250ms after.
        assert_eq!(log[2].1.as_millis(), 2500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_when_not_paused() {
        let (log, sink) = timing_sink(Instant::now());
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), ReplayOptions::default()).unwrap();
        assert!(!scheduler.resume().await.unwrap());

        scheduler.load(session(&[(0.0, "a"), (100.0, "b")])).await.unwrap();
        scheduler.start().await.unwrap();
        assert!(!scheduler.resume().await.unwrap());
        scheduler.wait_stopped().await.unwrap();
        assert_eq!(ids(&log), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_delivery() {
        let (log, sink) = timing_sink(Instant::now());
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), ReplayOptions::default()).unwrap();
        scheduler
            .load(session(&[(0.0, "a"), (100.0, "b"), (200.0, "c")]))
            .await
            .unwrap();
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(scheduler.stop().await.unwrap());
        assert!(!scheduler.stop().await.unwrap());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(ids(&log), vec!["a", "b"]);
        assert_eq!(scheduler.state(), PlaybackState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_rate_scales_timing() {
        let t0 = Instant::now();
        let (log, sink) = timing_sink(t0);
        let options = ReplayOptions::new().playback_rate(4.0);
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), options).unwrap();
        scheduler.load(session(&[(0.0, "a"), (400.0, "b")])).await.unwrap();
        scheduler.start().await.unwrap();
        scheduler.wait_stopped().await.unwrap();

        assert_eq!(log.lock().unwrap()[1].1.as_millis(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_rate_rejected() {
        let (_, sink) = timing_sink(Instant::now());
        let options = ReplayOptions::new().playback_rate(0.0);
        assert!(options.validate().is_err());
        assert!(ReplayScheduler::new(sink.clone(), EventBus::shared(), options).is_err());

        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), ReplayOptions::default()).unwrap();
        assert!(scheduler.set_playback_rate(-2.0).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_replays_until_stopped() {
        let (log, sink) = timing_sink(Instant::now());
        let options = ReplayOptions::new().loop_playback(true);
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), options).unwrap();
        scheduler.load(session(&[(0.0, "a"), (100.0, "b")])).await.unwrap();
        scheduler.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        scheduler.stop().await.unwrap();
        // Run 1: a@0 b@100. Run 2: a@100 b@200. Run 3: a@200.
        assert_eq!(ids(&log), vec!["a", "b", "a", "b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_single_packet_repeats_at_min_period() {
        let (log, sink) = timing_sink(Instant::now());
        let options = ReplayOptions::new().loop_playback(true);
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), options).unwrap();
        scheduler.load(session(&[(0.0, "a")])).await.unwrap();
        scheduler.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        scheduler.stop().await.unwrap();
        let times: Vec<u128> = log.lock().unwrap().iter().map(|(_, t)| t.as_millis()).collect();
        assert_eq!(times, vec![0, 100, 200]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_far_future_packet_held_back() {
        let (log, sink) = timing_sink(Instant::now());
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), ReplayOptions::default()).unwrap();
        scheduler
            .load(session(&[(0.0, "a"), (crate::session::MAX_OFFSET_MS, "b")]))
            .await
            .unwrap();
        scheduler.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ids(&log), vec!["a"]);
        assert!(scheduler.stop().await.unwrap());
        assert_eq!(scheduler.state(), PlaybackState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_while_paused_publishes_one_stop() {
        let bus = EventBus::shared();
        let (_id, mut status) = bus.subscribe_channel(Topic::ScanStatus);
        let (_, sink) = timing_sink(Instant::now());
        let scheduler = ReplayScheduler::new(sink, Arc::clone(&bus), ReplayOptions::default()).unwrap();

        scheduler.load(session(&[(0.0, "a"), (500.0, "b")])).await.unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.pause().await.unwrap());
        scheduler.load(session(&[(0.0, "c")])).await.unwrap();
        assert_eq!(scheduler.state(), PlaybackState::Loaded);

        let mut running = Vec::new();
        while let Ok(BusEvent::ScanStatus(s)) = status.try_recv() {
            running.push(s.running);
        }
        assert_eq!(running, vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_advertisements_and_status() {
        let bus = EventBus::shared();
        let (_id, mut adverts) = bus.subscribe_channel(Topic::Advertisement);
        let (_id, mut status) = bus.subscribe_channel(Topic::ScanStatus);
        let (_, sink) = timing_sink(Instant::now());
        let scheduler = ReplayScheduler::new(sink, Arc::clone(&bus), ReplayOptions::default()).unwrap();

        scheduler.load(session(&[(0.0, "a"), (50.0, "b")])).await.unwrap();
        scheduler.start().await.unwrap();
        scheduler.wait_stopped().await.unwrap();

        let mut delivered = Vec::new();
        while let Ok(BusEvent::Advertisement(packet)) = adverts.try_recv() {
            delivered.push(packet.device_id().unwrap_or_default().to_string());
        }
        assert_eq!(delivered, vec!["a", "b"]);

        let mut statuses = Vec::new();
        while let Ok(BusEvent::ScanStatus(s)) = status.try_recv() {
            statuses.push((s.running, s.source));
        }
        assert_eq!(
            statuses,
            vec![(true, "replay".to_string()), (false, "replay".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_finish_replays() {
        let (log, sink) = timing_sink(Instant::now());
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), ReplayOptions::default()).unwrap();
        scheduler.load(session(&[(0.0, "a")])).await.unwrap();

        scheduler.start().await.unwrap();
        scheduler.wait_stopped().await.unwrap();
        scheduler.start().await.unwrap();
        scheduler.wait_stopped().await.unwrap();
        assert_eq!(ids(&log), vec!["a", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_while_playing_replaces_session() {
        let (log, sink) = timing_sink(Instant::now());
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), ReplayOptions::default()).unwrap();
        scheduler.load(session(&[(0.0, "a"), (100.0, "b")])).await.unwrap();
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        scheduler.load(session(&[(0.0, "x")])).await.unwrap();
        assert_eq!(scheduler.state(), PlaybackState::Loaded);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ids(&log), vec!["a"]);

        scheduler.start().await.unwrap();
        scheduler.wait_stopped().await.unwrap();
        assert_eq!(ids(&log), vec!["a", "x"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown() {
        let (_, sink) = timing_sink(Instant::now());
        let scheduler = ReplayScheduler::new(sink, EventBus::shared(), ReplayOptions::default()).unwrap();
        scheduler.load(session(&[(0.0, "a"), (10_000.0, "b")])).await.unwrap();
        scheduler.start().await.unwrap();
        scheduler.shutdown().await;
    }
}
