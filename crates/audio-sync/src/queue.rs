//! Thread-safe bounded queues.
//!
//! Two queues connect the stages:
//! - [`PacketQueue`]: demuxer thread → audio thread (encoded packets, FIFO)
//! - [`SharedAudio`]: audio thread → CPAL callback (interleaved `f32` samples)
//!
//! Both keep a `done` flag under the same mutex as the data to make shutdown deterministic,
//! and use a single [`Condvar`] as a general "state changed" signal.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::packet::EncodedPacket;
use crate::state::CancelToken;

/// Bounded multi-producer queue of encoded packets consumed by the audio thread.
pub struct PacketQueue {
    inner: Mutex<PacketInner>,
    cv: Condvar,
    capacity: usize,
}

struct PacketInner {
    packets: VecDeque<EncodedPacket>,
    done: bool,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PacketInner {
                packets: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a packet, blocking while the queue is full.
    ///
    /// Returns `false` (dropping the packet) if the queue is closed before space frees up.
    pub fn push_blocking(&self, packet: EncodedPacket) -> bool {
        let mut g = self.inner.lock().unwrap();
        while g.packets.len() >= self.capacity && !g.done {
            g = self.cv.wait(g).unwrap();
        }
        if g.done {
            return false;
        }
        g.packets.push_back(packet);
        drop(g);
        self.cv.notify_all();
        true
    }

    /// Take the next packet in FIFO order.
    ///
    /// Blocks until a packet is available. Returns `None` without waiting further when no
    /// packet is ready and either `hold()` is true or the queue is closed. `hold` is
    /// re-evaluated on every wake-up (see [`PacketQueue::wake_consumers`]).
    pub fn pop(&self, hold: impl Fn() -> bool) -> Option<EncodedPacket> {
        let mut g = self.inner.lock().unwrap();
        loop {
            if let Some(packet) = g.packets.pop_front() {
                drop(g);
                self.cv.notify_all();
                return Some(packet);
            }
            if g.done || hold() {
                return None;
            }
            g = self.cv.wait(g).unwrap();
        }
    }

    /// Wake blocked consumers so they re-check their hold predicate.
    pub fn wake_consumers(&self) {
        let _g = self.inner.lock().unwrap();
        self.cv.notify_all();
    }

    /// Drop every queued packet (used when seeking).
    pub fn clear(&self) {
        let mut g = self.inner.lock().unwrap();
        let dropped = g.packets.len();
        g.packets.clear();
        drop(g);
        self.cv.notify_all();
        if dropped > 0 {
            tracing::debug!(dropped, "packet queue flushed");
        }
    }

    /// Mark end of input and wake all waiters. Idempotent.
    pub fn close(&self) {
        let mut g = self.inner.lock().unwrap();
        g.done = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Accept packets again after [`PacketQueue::close`] (input rewound by a seek).
    pub fn reopen(&self) {
        let mut g = self.inner.lock().unwrap();
        g.done = false;
        drop(g);
        self.cv.notify_all();
    }

    /// Closed and fully drained.
    pub fn is_finished(&self) -> bool {
        let g = self.inner.lock().unwrap();
        g.done && g.packets.is_empty()
    }
}

/// Compute a conservative queue capacity in **samples** for a `(rate, channels, seconds)` target.
///
/// - If `buffer_seconds` is non-finite or `<= 0.0`, a safe fallback is used.
/// - The returned value is `ceil(rate_hz * buffer_seconds) * channels` (saturating).
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        0.25
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

/// Thread-safe bounded queue for interleaved `f32` audio samples.
///
/// The producer (audio thread) may block; the consumer (CPAL callback) never does.
pub struct SharedAudio {
    channels: usize,
    inner: Mutex<SharedInner>,
    cv: Condvar,
    max_buffered_samples: usize,
}

struct SharedInner {
    queue: VecDeque<f32>,
    done: bool,
}

impl SharedAudio {
    /// `max_buffered_samples` is a cap in **samples** (not frames).
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        Self {
            channels: channels.max(1),
            inner: Mutex::new(SharedInner {
                queue: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(1),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Current buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        let g = self.inner.lock().unwrap();
        g.queue.len() / self.channels
    }

    /// Mark the queue as finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        let mut g = self.inner.lock().unwrap();
        g.done = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Push interleaved samples, blocking when the queue is full.
    ///
    /// If the queue is closed while waiting, the remaining samples are dropped.
    /// Returns `true` if the call had to wait for the consumer at least once.
    pub fn push_interleaved_blocking(&self, samples: &[f32]) -> bool {
        let mut offset = 0;
        let mut waited = false;

        while offset < samples.len() {
            let mut g = self.inner.lock().unwrap();

            while g.queue.len() >= self.max_buffered_samples && !g.done {
                waited = true;
                g = self.cv.wait(g).unwrap();
            }
            if g.done {
                return waited;
            }

            let room = self.max_buffered_samples - g.queue.len();
            let take = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;

            drop(g);
            self.cv.notify_all();
        }
        waited
    }

    /// Return immediately with up to `max_frames` frames, or `None` if currently empty.
    pub fn pop_available(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.inner.lock().unwrap();

        let available_frames = g.queue.len() / self.channels;
        let take_samples = available_frames.min(max_frames) * self.channels;
        if take_samples == 0 {
            return None;
        }

        let out: Vec<f32> = g.queue.drain(..take_samples).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Drop buffered samples without playing them.
    pub fn discard(&self) {
        let mut g = self.inner.lock().unwrap();
        g.queue.clear();
        drop(g);
        self.cv.notify_all();
    }
}

/// Block until `q` is closed+empty OR `cancel` is set.
///
/// Returns `true` if the queue drained normally, `false` if cancelled.
pub fn wait_until_done_and_empty_or_cancel(q: &Arc<SharedAudio>, cancel: &CancelToken) -> bool {
    let mut g = q.inner.lock().unwrap();
    loop {
        if cancel.is_cancelled() {
            return false;
        }

        if g.done && g.queue.is_empty() {
            return true;
        }

        let (ng, _timeout) = q.cv.wait_timeout(g, Duration::from_millis(50)).unwrap();
        g = ng;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn packet(pts: i64) -> EncodedPacket {
        EncodedPacket::new(0, Some(pts), vec![1, 2, 3])
    }

    #[test]
    fn pop_returns_packets_in_fifo_order() {
        let q = PacketQueue::new(8);
        for pts in 0..3 {
            assert!(q.push_blocking(packet(pts)));
        }
        let order: Vec<_> = (0..3).filter_map(|_| q.pop(|| false)).map(|p| p.pts).collect();
        assert_eq!(order, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn pop_prefers_ready_packet_over_hold() {
        let q = PacketQueue::new(8);
        q.push_blocking(packet(5));
        assert_eq!(q.pop(|| true).unwrap().pts, Some(5));
        assert!(q.pop(|| true).is_none());
    }

    #[test]
    fn pop_returns_none_when_closed_and_empty() {
        let q = PacketQueue::new(8);
        q.push_blocking(packet(1));
        q.close();
        assert!(q.pop(|| false).is_some());
        assert!(q.pop(|| false).is_none());
        assert!(q.is_finished());
        assert!(!q.push_blocking(packet(2)));
    }

    #[test]
    fn reopen_accepts_packets_again() {
        let q = PacketQueue::new(8);
        q.close();
        q.reopen();
        assert!(!q.is_finished());
        assert!(q.push_blocking(packet(1)));
    }

    #[test]
    fn wake_consumers_reevaluates_hold() {
        let q = Arc::new(PacketQueue::new(8));
        let hold = Arc::new(AtomicBool::new(false));
        let (q2, hold2) = (q.clone(), hold.clone());
        let handle = thread::spawn(move || q2.pop(|| hold2.load(Ordering::SeqCst)));

        thread::sleep(Duration::from_millis(20));
        hold.store(true, Ordering::SeqCst);
        q.wake_consumers();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn blocked_pop_receives_pushed_packet() {
        let q = Arc::new(PacketQueue::new(8));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop(|| false));
        thread::sleep(Duration::from_millis(20));
        q.push_blocking(packet(9));
        assert_eq!(handle.join().unwrap().unwrap().pts, Some(9));
    }

    #[test]
    fn push_blocks_until_space_or_clear() {
        let q = Arc::new(PacketQueue::new(1));
        q.push_blocking(packet(0));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.push_blocking(packet(1)));
        thread::sleep(Duration::from_millis(20));
        q.clear();
        assert!(handle.join().unwrap());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn calc_max_buffered_samples_fallbacks() {
        assert_eq!(calc_max_buffered_samples(48_000, 2, 2.0), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, -1.0), 24_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, f32::NAN), 24_000);
    }

    #[test]
    fn shared_audio_push_reports_waiting() {
        let q = Arc::new(SharedAudio::new(2, 4));
        assert!(!q.push_interleaved_blocking(&[0.1, 0.2]));

        let q_pop = q.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q_pop.pop_available(8)
        });
        assert!(q.push_interleaved_blocking(&[0.3, 0.4, 0.5, 0.6]));
        assert_eq!(handle.join().unwrap().unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(q.len_frames(), 1);
    }

    #[test]
    fn shared_audio_pop_available_empty() {
        let q = SharedAudio::new(2, 16);
        assert!(q.pop_available(4).is_none());
    }

    #[test]
    fn wait_until_done_and_empty_or_cancel_respects_cancel() {
        let q = Arc::new(SharedAudio::new(2, 64));
        q.push_interleaved_blocking(&[1.0, 2.0]);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(!wait_until_done_and_empty_or_cancel(&q, &cancel));
    }

    #[test]
    fn wait_until_done_and_empty_or_cancel_returns_true_when_closed() {
        let q = Arc::new(SharedAudio::new(2, 64));
        q.close();
        assert!(wait_until_done_and_empty_or_cancel(&q, &CancelToken::new()));
    }
}
