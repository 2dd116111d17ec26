//! Virtual clock for session playback.
//!
//! [`Playback`] is the timing state machine behind the replay scheduler. It
//! performs no I/O and owns no timer: callers pass the current instant in, ask
//! for the single next deadline, and call [`Playback::poll`] when it passes.
//!
//! Packet `i` is due at `origin + (offset[i] - offset[0]) / rate`, where
//! `origin` is the instant virtual time zero maps to. Pausing freezes the
//! virtual position; resuming moves `origin` so that the position continues
//! from where it froze. Nothing is skipped or delivered twice. A packet whose
//! due instant cannot be represented is never due.
//!
//! A looping run lasts at least [`MIN_LOOP_PERIOD`] of real time, so a
//! sequence with a zero span repeats at that period.
//!
//! ```text
//! Idle --load--> Loaded --start--> Playing <--pause/resume--> Paused
//!                                     |                          |
//!                                     +--end / stop--> Stopped <-+
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Shortest real time between the starts of two looping runs.
pub const MIN_LOOP_PERIOD: Duration = Duration::from_millis(100);

/// Playback lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No session loaded.
    Idle,
    /// Session loaded, not started.
    Loaded,
    /// Delivering packets.
    Playing,
    /// Position frozen until resumed.
    Paused,
    /// Finished or stopped; `start` replays from the beginning.
    Stopped,
}

impl PlaybackState {
    /// Whether packets may still be delivered without a new `start`.
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Paused)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loaded => "loaded",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// How a run through the sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// Looping is on; playback restarted at index 0.
    Looped,
    /// Playback reached the end and stopped.
    Finished,
}

/// A packet that became due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Index of the packet to deliver.
    pub index: usize,
    /// Set when this was the last packet of the sequence.
    pub end: Option<RunEnd>,
}

/// Validate a playback rate.
pub fn validate_rate(rate: f64) -> Result<f64> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(Error::invalid_config(format!(
            "playback rate must be a positive number, got {}",
            rate
        )))
    }
}

/// Playback timing state machine.
#[derive(Debug, Clone)]
pub struct Playback {
    /// Offsets relative to the first packet, ms, ascending.
    offsets: Vec<f64>,
    state: PlaybackState,
    index: usize,
    rate: f64,
    looping: bool,
    /// Instant that virtual time zero maps to while playing.
    origin: Instant,
    /// Virtual position (session ms) frozen while paused.
    frozen_ms: f64,
}

impl Playback {
    /// Create an idle playback at the given rate.
    pub fn new(rate: f64, looping: bool) -> Result<Self> {
        Ok(Self {
            offsets: Vec::new(),
            state: PlaybackState::Idle,
            index: 0,
            rate: validate_rate(rate)?,
            looping,
            origin: Instant::now(),
            frozen_ms: 0.0,
        })
    }

    /// Current state.
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Index of the next packet to deliver.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of packets loaded.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether no sequence is loaded.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Playback rate multiplier.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Whether playback restarts at the end.
    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Load a new sequence of relative offsets (ms, ascending).
    ///
    /// Replaces any current sequence and leaves playback in `Loaded`, or
    /// `Idle` if `offsets` is empty.
    pub fn load(&mut self, offsets: Vec<f64>) {
        self.state = if offsets.is_empty() {
            PlaybackState::Idle
        } else {
            PlaybackState::Loaded
        };
        self.offsets = offsets;
        self.index = 0;
        self.frozen_ms = 0.0;
    }

    /// Start from the first packet.
    ///
    /// Starting while playing is a no-op; starting while paused resumes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSessionLoaded`] if nothing is loaded.
    pub fn start(&mut self, now: Instant) -> Result<()> {
        match self.state {
            PlaybackState::Idle => Err(Error::NoSessionLoaded),
            PlaybackState::Playing => Ok(()),
            PlaybackState::Paused => {
                self.resume(now);
                Ok(())
            }
            PlaybackState::Loaded | PlaybackState::Stopped => {
                self.index = 0;
                self.origin = now;
                self.frozen_ms = 0.0;
                self.state = PlaybackState::Playing;
                Ok(())
            }
        }
    }

    /// Freeze the virtual position. Returns `false` unless playing.
    pub fn pause(&mut self, now: Instant) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }
        self.frozen_ms = self.position_ms(now);
        self.state = PlaybackState::Paused;
        true
    }

    /// Continue from the frozen position. Returns `false` unless paused.
    pub fn resume(&mut self, now: Instant) -> bool {
        if self.state != PlaybackState::Paused {
            return false;
        }
        self.origin = rebase(now, self.frozen_ms, self.rate);
        self.state = PlaybackState::Playing;
        true
    }

    /// Stop playback. Returns `false` if it was not playing or paused.
    pub fn stop(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = PlaybackState::Stopped;
        true
    }

    /// Change the rate, keeping the current virtual position.
    pub fn set_rate(&mut self, rate: f64, now: Instant) -> Result<()> {
        let rate = validate_rate(rate)?;
        if self.state == PlaybackState::Playing {
            let position = self.position_ms(now);
            self.rate = rate;
            self.origin = rebase(now, position, rate);
        } else {
            self.rate = rate;
        }
        Ok(())
    }

    /// Enable or disable looping.
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Virtual position in session milliseconds.
    pub fn position_ms(&self, now: Instant) -> f64 {
        match self.state {
            PlaybackState::Playing => {
                now.saturating_duration_since(self.origin).as_secs_f64() * 1000.0 * self.rate
            }
            PlaybackState::Paused => self.frozen_ms,
            _ => 0.0,
        }
    }

    /// Instant the next packet is due, if playing.
    ///
    /// `None` while playing means the packet lies beyond any representable
    /// instant at the current rate.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.state != PlaybackState::Playing {
            return None;
        }
        let offset = *self.offsets.get(self.index)?;
        self.origin.checked_add(real_duration(offset, self.rate)?)
    }

    /// Time until the next packet is due, if playing.
    ///
    /// This is `max(0, offset / rate - elapsed)`.
    pub fn wait(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Take the next packet if it is due at `now`.
    ///
    /// After the last packet, playback either restarts at index 0 (looping)
    /// or moves to `Stopped`. The next run starts at `now`, or
    /// [`MIN_LOOP_PERIOD`] after the previous run started if that is later.
    pub fn poll(&mut self, now: Instant) -> Option<Tick> {
        let deadline = self.next_deadline()?;
        if deadline > now {
            return None;
        }

        let index = self.index;
        self.index += 1;
        let end = if self.index < self.offsets.len() {
            None
        } else if self.looping {
            self.index = 0;
            self.origin = self
                .origin
                .checked_add(MIN_LOOP_PERIOD)
                .map_or(now, |earliest| earliest.max(now));
            Some(RunEnd::Looped)
        } else {
            self.state = PlaybackState::Stopped;
            Some(RunEnd::Finished)
        };
        Some(Tick { index, end })
    }
}

/// Real time needed to cover `ms` of session time at `rate`.
fn real_duration(ms: f64, rate: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(ms / rate / 1000.0).ok()
}

/// Origin that puts virtual position `ms` at `now`.
fn rebase(now: Instant, ms: f64, rate: f64) -> Instant {
    real_duration(ms, rate)
        .and_then(|elapsed| now.checked_sub(elapsed))
        .unwrap_or(now)
}
