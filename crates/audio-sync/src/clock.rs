//! Audio/video clock synchronization.
//!
//! Two floating-point clocks are shared with the rest of the player:
//! - `playback_start`: estimated wall-clock time (seconds, see [`hires_time`]) at which
//!   position zero was played. Read and corrected by the video side as well.
//! - `audio_pts`: presentation timestamp (seconds) of the audio most recently handed to the
//!   sink.
//!
//! Both are updated lock-free. Apart from the baseline reset of `audio_pts`, every update
//! applies a delta through a `compare_exchange_weak` retry loop so concurrent writers never
//! lose each other's updates.

use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use atomic_float::AtomicF64;

use crate::config::SyncConfig;

/// Monotonic seconds since the first call in this process.
pub fn hires_time() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Receives a notification whenever the audio thread establishes a new baseline.
pub trait ClockListener: Send + Sync {
    fn notify_baseline(&self, pts: f64);
}

/// The clocks shared by the audio and video threads.
#[derive(Debug)]
pub struct SharedClocks {
    playback_start: AtomicF64,
    audio_pts: AtomicF64,
}

impl Default for SharedClocks {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedClocks {
    pub fn new() -> Self {
        Self {
            playback_start: AtomicF64::new(0.0),
            audio_pts: AtomicF64::new(0.0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn playback_start(&self) -> f64 {
        self.playback_start.load(Ordering::Acquire)
    }

    pub fn audio_pts(&self) -> f64 {
        self.audio_pts.load(Ordering::Acquire)
    }

    /// Shift the playback start clock by `delta` seconds. Returns the new value.
    pub fn shift_playback_start(&self, delta: f64) -> f64 {
        apply_delta(&self.playback_start, delta)
    }

    /// Advance the audio clock by `delta` seconds. Returns the new value.
    pub fn advance_audio_pts(&self, delta: f64) -> f64 {
        apply_delta(&self.audio_pts, delta)
    }

    /// Raise the audio clock to at least `pts`; never moves it backwards.
    pub fn raise_audio_pts(&self, pts: f64) -> f64 {
        let mut current = self.audio_pts.load(Ordering::Acquire);
        loop {
            if current >= pts {
                return current;
            }
            match self.audio_pts.compare_exchange_weak(
                current,
                pts,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return pts,
                Err(actual) => current = actual,
            }
        }
    }

    /// Start a new baseline. The only outright store on `audio_pts`.
    pub fn reset_audio_pts(&self, pts: f64) {
        self.audio_pts.store(pts, Ordering::Release);
    }
}

fn apply_delta(cell: &AtomicF64, delta: f64) -> f64 {
    let mut current = cell.load(Ordering::Acquire);
    loop {
        let next = current + delta;
        match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return next,
            Err(actual) => current = actual,
        }
    }
}

/// Correction to apply to `playback_start` for a measured drift, if any.
///
/// `delta = playback_start + audio_pts - now`. Outside the tolerated band a fixed step is
/// applied against the drift direction.
pub fn drift_correction(delta: f64, config: &SyncConfig) -> Option<f64> {
    if delta.abs() > config.drift_threshold_secs {
        Some(if delta < 0.0 {
            config.drift_correction_secs
        } else {
            -config.drift_correction_secs
        })
    } else {
        None
    }
}

type TimeSource = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Audio-thread side of the clock bookkeeping.
pub struct ClockSync {
    clocks: Arc<SharedClocks>,
    listener: Option<Arc<dyn ClockListener>>,
    config: SyncConfig,
    now: TimeSource,
}

impl ClockSync {
    pub fn new(
        clocks: Arc<SharedClocks>,
        listener: Option<Arc<dyn ClockListener>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            clocks,
            listener,
            config,
            now: Arc::new(hires_time),
        }
    }

    /// Replace the wall clock (tests, or a player with its own time reference).
    pub fn with_time_source(mut self, now: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.now = Arc::new(now);
        self
    }

    pub fn clocks(&self) -> &Arc<SharedClocks> {
        &self.clocks
    }

    /// Nudge `playback_start` toward the audio clock. Returns the applied correction.
    pub fn correct_drift(&self) -> Option<f64> {
        let delta = self.clocks.playback_start() + self.clocks.audio_pts() - (self.now)();
        let correction = drift_correction(delta, &self.config)?;
        let start = self.clocks.shift_playback_start(correction);
        tracing::trace!(delta, correction, playback_start = start, "audio drift corrected");
        Some(correction)
    }

    /// Heuristic advance after the sink reported it had not consumed a buffer yet.
    pub fn advance(&self, secs: f64) -> f64 {
        self.clocks.advance_audio_pts(secs)
    }

    /// A fresh packet timestamp was observed.
    pub fn observe_pts(&self, pts: f64) -> f64 {
        self.clocks.raise_audio_pts(pts)
    }

    /// Set a new audio baseline and tell dependent clocks about it.
    pub fn establish_baseline(&self, pts: f64) {
        self.clocks.reset_audio_pts(pts);
        tracing::debug!(pts, "audio baseline established");
        if let Some(listener) = &self.listener {
            listener.notify_baseline(pts);
        }
    }
}
