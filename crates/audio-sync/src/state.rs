//! Player state shared between the audio thread and its controllers.
//!
//! Owned by the playback session and referenced by the audio thread (consumer) and by
//! whatever issues pause/resume/seek commands. Flags are plain atomics so the hot path can
//! read them without locking; the mutex/condvar pair exists only for the blocking pause wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::queue::PacketQueue;

/// Pause flags as seen by the audio thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PauseState {
    Running,
    Paused,
    /// Paused, but a seek happened: packets keep flowing until a new baseline is set.
    SeekingWhilePaused,
}

/// Shared pause/seek flags plus the pause condition variable.
#[derive(Debug, Default)]
pub struct PlayerState {
    paused: AtomicBool,
    seeking_while_paused: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl PlayerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn pause_state(&self) -> PauseState {
        match (
            self.paused.load(Ordering::Acquire),
            self.seeking_while_paused.load(Ordering::Acquire),
        ) {
            (false, _) => PauseState::Running,
            (true, false) => PauseState::Paused,
            (true, true) => PauseState::SeekingWhilePaused,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_seeking_while_paused(&self) -> bool {
        self.seeking_while_paused.load(Ordering::Acquire)
    }

    /// Paused and not seeking: the audio thread must stop consuming packets.
    pub fn holds_output(&self) -> bool {
        self.pause_state() == PauseState::Paused
    }

    pub fn pause(&self) {
        self.set_flag(&self.paused, true);
    }

    pub fn resume(&self) {
        self.set_flag(&self.paused, false);
    }

    /// Mark that a seek happened while paused.
    pub fn begin_seek_while_paused(&self) {
        self.set_flag(&self.seeking_while_paused, true);
    }

    /// Clear the seeking flag, returning whether it was set.
    pub fn take_seek_while_paused(&self) -> bool {
        self.seeking_while_paused.swap(false, Ordering::AcqRel)
    }

    /// Block while output is held. Returns early on cancellation.
    pub fn wait_while_paused(&self, cancel: &CancelToken) {
        let mut guard = self.lock.lock().unwrap();
        while self.holds_output() && !cancel.is_cancelled() {
            guard = self.cv.wait(guard).unwrap();
        }
    }

    /// Wake any thread blocked in [`PlayerState::wait_while_paused`].
    pub fn wake_all(&self) {
        let _guard = self.lock.lock().unwrap();
        self.cv.notify_all();
    }

    // Flags are flipped under the lock so a waiter cannot miss the notification.
    fn set_flag(&self, flag: &AtomicBool, value: bool) {
        let _guard = self.lock.lock().unwrap();
        flag.store(value, Ordering::Release);
        self.cv.notify_all();
    }
}

/// Cooperative cancellation flag, polled at the audio thread's interruption points.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Controller-side handle: flips the shared flags and wakes a consumer blocked in the
/// packet queue so the new state is observed promptly.
#[derive(Clone)]
pub struct AudioControl {
    state: Arc<PlayerState>,
    packets: Arc<PacketQueue>,
}

impl AudioControl {
    pub fn new(state: Arc<PlayerState>, packets: Arc<PacketQueue>) -> Self {
        Self { state, packets }
    }

    pub fn pause(&self) {
        self.state.pause();
        self.packets.wake_consumers();
    }

    pub fn resume(&self) {
        self.state.resume();
        self.packets.wake_consumers();
    }

    pub fn begin_seek_while_paused(&self) {
        self.state.begin_seek_while_paused();
        self.packets.wake_consumers();
    }
}
