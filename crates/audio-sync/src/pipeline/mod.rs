//! Audio thread lifecycle.
//!
//! The audio thread pulls packets from the [`PacketQueue`], hands them to the
//! [`DecodeOrchestrator`] and reacts to pause/resume, seek-while-paused and cancellation
//! requested by other threads.
//!
//! Loop shape:
//! - cancellation check at the top of every pass
//! - paused (and not seeking): pause the sink once, block on the pause condvar
//! - leaving pause: resume the sink once, then deliver any postponed packet
//! - inner burst: pop packets until the queue holds, a packet is rejected or a flush
//!   marker shows up
//!
//! The sink is initialized on the thread and deinitialized exactly once on every exit path
//! (including errors and panics) by [`SinkGuard`].

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use crate::decode::{DecodeOrchestrator, PacketOutcome};
use crate::engine::{AudioSink, DecoderEngine, ResamplerEngine};
use crate::error::{AudioThreadError, ThreadExit};
use crate::packet::EncodedPacket;
use crate::queue::PacketQueue;
use crate::state::{CancelToken, PlayerState};

/// Everything the audio thread owns or shares, minus the sink.
pub struct AudioThreadParts<D: DecoderEngine, E: ResamplerEngine> {
    pub orchestrator: DecodeOrchestrator<D, E>,
    pub packets: Arc<PacketQueue>,
    pub state: Arc<PlayerState>,
    pub cancel: CancelToken,
}

/// Owns the initialized sink; deinitializes it when dropped.
struct SinkGuard<S: AudioSink>(S);

impl<S: AudioSink> Deref for SinkGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.0
    }
}

impl<S: AudioSink> DerefMut for SinkGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.0
    }
}

impl<S: AudioSink> Drop for SinkGuard<S> {
    fn drop(&mut self) {
        self.0.deinitialize_thread();
    }
}

/// Run the audio thread body on the current thread until cancellation, end of stream or a
/// fatal error.
pub fn run_audio_thread<D, E, S>(
    parts: AudioThreadParts<D, E>,
    mut sink: S,
) -> Result<ThreadExit, AudioThreadError>
where
    D: DecoderEngine,
    E: ResamplerEngine,
    S: AudioSink,
{
    sink.initialize_thread().map_err(AudioThreadError::SinkInit)?;
    let mut sink = SinkGuard(sink);

    let AudioThreadParts {
        mut orchestrator,
        packets,
        state,
        cancel,
    } = parts;

    let mut scratch: Vec<u8> = Vec::new();
    let mut postponed: Option<EncodedPacket> = None;
    let mut output_paused = false;
    let mut initialized = false;

    tracing::debug!(stream = orchestrator.active_stream().index, "audio thread started");

    loop {
        if cancel.is_cancelled() {
            tracing::debug!("audio thread interrupted");
            return Ok(ThreadExit::Cancelled);
        }

        if state.holds_output() {
            if !output_paused {
                sink.pause_output();
                output_paused = true;
                tracing::debug!("output paused");
            }
            state.wait_while_paused(&cancel);
            continue;
        } else if output_paused && !state.is_seeking_while_paused() {
            sink.resume_output();
            output_paused = false;
            tracing::debug!("output resumed");
        }

        if let Some(packet) = postponed.take() {
            if !state.is_seeking_while_paused() {
                orchestrator.handle_packet(&packet, &mut scratch, &mut *sink, &cancel);
            }
        }

        loop {
            let Some(packet) = packets.pop(|| state.holds_output() || cancel.is_cancelled())
            else {
                break;
            };

            if !initialized {
                let Some(baseline) = orchestrator.packet_seconds(&packet) else {
                    tracing::error!(
                        stream = packet.stream_index,
                        "first audio packet has no timestamp"
                    );
                    return Err(AudioThreadError::MissingBaselineTimestamp {
                        stream_index: packet.stream_index,
                    });
                };
                orchestrator.sync().establish_baseline(baseline);

                if state.take_seek_while_paused() {
                    tracing::debug!(pts = baseline, "seeked while paused, packet postponed");
                    postponed = Some(packet);
                    break;
                }
            }
            initialized = true;

            let outcome = orchestrator.handle_packet(&packet, &mut scratch, &mut *sink, &cancel);
            if outcome != PacketOutcome::Decoded || state.holds_output() {
                break;
            }
        }

        // A postponed packet is still owed to the sink once the pause ends.
        if packets.is_finished() && postponed.is_none() {
            tracing::debug!("packet queue finished");
            return Ok(ThreadExit::EndOfStream);
        }
    }
}

/// Handle to a running audio thread.
pub struct AudioThreadHandle {
    cancel: CancelToken,
    state: Arc<PlayerState>,
    packets: Arc<PacketQueue>,
    handle: JoinHandle<Result<ThreadExit, AudioThreadError>>,
}

impl AudioThreadHandle {
    /// Request cancellation and wake the thread wherever it is blocked.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.state.wake_all();
        self.packets.wake_consumers();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread to exit.
    pub fn join(self) -> Result<ThreadExit, AudioThreadError> {
        self.handle.join().map_err(|_| AudioThreadError::Panicked)?
    }
}

/// Start the audio thread.
///
/// `make_sink` runs on the new thread, so the sink itself does not need to be `Send`.
pub fn spawn_audio_thread<D, E, S, F>(
    parts: AudioThreadParts<D, E>,
    make_sink: F,
) -> Result<AudioThreadHandle>
where
    D: DecoderEngine + 'static,
    E: ResamplerEngine + 'static,
    E::Context: 'static,
    S: AudioSink,
    F: FnOnce() -> S + Send + 'static,
{
    let cancel = parts.cancel.clone();
    let state = parts.state.clone();
    let packets = parts.packets.clone();

    let handle = thread::Builder::new()
        .name("audio".into())
        .spawn(move || {
            let result = run_audio_thread(parts, make_sink());
            match &result {
                Ok(exit) => tracing::debug!(?exit, "audio thread finished"),
                Err(e) => tracing::error!("audio thread failed: {e}"),
            }
            result
        })
        .context("spawn audio thread")?;

    Ok(AudioThreadHandle {
        cancel,
        state,
        packets,
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockSync, SharedClocks};
    use crate::config::SyncConfig;
    use crate::resample::{ResampleManager, RubatoEngine};
    use crate::state::AudioControl;
    use crate::testing::{
        DecoderLog, RecordingListener, RecordingSink, ScriptedDecoder, SinkLog, TARGET, packet,
        stream, wait_until,
    };
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        parts: AudioThreadParts<ScriptedDecoder, RubatoEngine>,
        decoder_log: Arc<DecoderLog>,
        listener: Arc<RecordingListener>,
        packets: Arc<PacketQueue>,
        state: Arc<PlayerState>,
        cancel: CancelToken,
    }

    fn harness(configure: impl FnOnce(&mut ScriptedDecoder)) -> Harness {
        let decoder_log = Arc::new(DecoderLog::default());
        let mut decoder = ScriptedDecoder::new(decoder_log.clone());
        configure(&mut decoder);
        let listener = Arc::new(RecordingListener::default());
        let sync = ClockSync::new(
            SharedClocks::shared(),
            Some(listener.clone()),
            SyncConfig::default(),
        )
        .with_time_source(|| 0.0);
        let orchestrator = DecodeOrchestrator::new(
            decoder,
            vec![stream(0), stream(1)],
            0,
            ResampleManager::new(RubatoEngine::default(), TARGET),
            sync,
        )
        .unwrap();

        let packets = PacketQueue::shared(64);
        let state = PlayerState::shared();
        let cancel = CancelToken::new();
        Harness {
            parts: AudioThreadParts {
                orchestrator,
                packets: packets.clone(),
                state: state.clone(),
                cancel: cancel.clone(),
            },
            decoder_log,
            listener,
            packets,
            state,
            cancel,
        }
    }

    fn writes(log: &SinkLog) -> usize {
        log.write_sizes().len()
    }

    #[test]
    fn flush_marker_first_sets_baseline_without_frames() {
        let h = harness(|_| {});
        h.packets.push_blocking(EncodedPacket::flush_marker(0, Some(0)));
        h.packets.push_blocking(packet(0, 0, 32));
        h.packets.close();

        let log = Arc::new(SinkLog::default());
        let exit = run_audio_thread(h.parts, RecordingSink::new(log.clone())).unwrap();

        assert_eq!(exit, ThreadExit::EndOfStream);
        assert_eq!(h.listener.baselines(), vec![0.0]);
        assert_eq!(h.decoder_log.submits.load(Ordering::SeqCst), 1);
        assert_eq!(log.write_sizes(), vec![32 * TARGET.frame_bytes()]);
        assert_eq!(SinkLog::count(&log.inits), 1);
        assert_eq!(SinkLog::count(&log.deinits), 1);
    }

    #[test]
    fn missing_first_timestamp_is_a_typed_error() {
        let h = harness(|_| {});
        h.packets
            .push_blocking(EncodedPacket::new(1, None, vec![1; 8]));
        h.packets.close();

        let log = Arc::new(SinkLog::default());
        let result = run_audio_thread(h.parts, RecordingSink::new(log.clone()));

        assert!(matches!(
            result,
            Err(AudioThreadError::MissingBaselineTimestamp { stream_index: 1 })
        ));
        assert_eq!(writes(&log), 0);
        assert_eq!(SinkLog::count(&log.deinits), 1);
    }

    #[test]
    fn sink_init_failure_skips_deinit() {
        let h = harness(|_| {});
        let log = Arc::new(SinkLog::default());
        let mut sink = RecordingSink::new(log.clone());
        sink.fail_init = true;

        let result = run_audio_thread(h.parts, sink);
        assert!(matches!(result, Err(AudioThreadError::SinkInit(_))));
        assert_eq!(SinkLog::count(&log.deinits), 0);
    }

    #[test]
    fn rejected_packet_does_not_stop_the_thread() {
        let h = harness(|d| d.unopenable = vec![1]);
        h.packets.push_blocking(packet(0, 0, 4));
        h.packets.push_blocking(packet(1, 10, 4));
        h.packets.push_blocking(packet(0, 20, 4));
        h.packets.close();

        let log = Arc::new(SinkLog::default());
        let exit = run_audio_thread(h.parts, RecordingSink::new(log.clone())).unwrap();

        assert_eq!(exit, ThreadExit::EndOfStream);
        assert_eq!(writes(&log), 2);
    }

    #[test]
    fn cancellation_mid_delivery_deinitializes_once() {
        let h = harness(|d| d.frames_per_packet = 3);
        for i in 0..4 {
            h.packets.push_blocking(packet(0, i * 10, 8));
        }

        let log = Arc::new(SinkLog::default());
        let mut sink = RecordingSink::new(log.clone());
        sink.cancel_on_write = Some((2, h.cancel.clone()));

        let exit = run_audio_thread(h.parts, sink).unwrap();

        assert_eq!(exit, ThreadExit::Cancelled);
        assert_eq!(writes(&log), 2);
        assert_eq!(SinkLog::count(&log.deinits), 1);
        assert_eq!(h.packets.len(), 3);
    }

    #[test]
    fn paused_thread_never_writes_until_resumed() {
        let h = harness(|_| {});
        let control = AudioControl::new(h.state.clone(), h.packets.clone());
        control.pause();
        for i in 0..3 {
            h.packets.push_blocking(packet(0, i * 10, 8));
        }

        let log = Arc::new(SinkLog::default());
        let sink_log = log.clone();
        let handle = spawn_audio_thread(h.parts, move || RecordingSink::new(sink_log)).unwrap();

        assert!(wait_until(WAIT, || SinkLog::count(&log.pauses) == 1));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(writes(&log), 0);
        assert_eq!(h.packets.len(), 3);

        control.resume();
        assert!(wait_until(WAIT, || writes(&log) == 3));
        assert_eq!(SinkLog::count(&log.resumes), 1);

        h.packets.close();
        assert_eq!(handle.join().unwrap(), ThreadExit::EndOfStream);
        assert_eq!(SinkLog::count(&log.deinits), 1);
    }

    #[test]
    fn pausing_a_running_thread_stops_consumption() {
        let h = harness(|_| {});
        let control = AudioControl::new(h.state.clone(), h.packets.clone());
        h.packets.push_blocking(packet(0, 0, 8));

        let log = Arc::new(SinkLog::default());
        let sink_log = log.clone();
        let handle = spawn_audio_thread(h.parts, move || RecordingSink::new(sink_log)).unwrap();
        assert!(wait_until(WAIT, || writes(&log) == 1));

        control.pause();
        assert!(wait_until(WAIT, || SinkLog::count(&log.pauses) == 1));
        h.packets.push_blocking(packet(0, 10, 8));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(writes(&log), 1);

        control.resume();
        assert!(wait_until(WAIT, || writes(&log) == 2));

        handle.cancel();
        assert_eq!(handle.join().unwrap(), ThreadExit::Cancelled);
    }

    #[test]
    fn seek_while_paused_sets_baseline_and_postpones_audio() {
        let h = harness(|_| {});
        let control = AudioControl::new(h.state.clone(), h.packets.clone());
        control.pause();
        control.begin_seek_while_paused();
        h.packets.push_blocking(packet(0, 1000, 8));
        h.packets.push_blocking(packet(0, 1020, 8));

        let log = Arc::new(SinkLog::default());
        let sink_log = log.clone();
        let handle = spawn_audio_thread(h.parts, move || RecordingSink::new(sink_log)).unwrap();

        assert!(wait_until(WAIT, || SinkLog::count(&log.pauses) == 1));
        assert_eq!(h.listener.baselines(), vec![1.0]);
        assert!(!h.state.is_seeking_while_paused());
        assert_eq!(writes(&log), 0);
        assert_eq!(h.packets.len(), 1);

        control.resume();
        assert!(wait_until(WAIT, || writes(&log) == 2));
        // The first packet after the postponed one re-anchors the clock.
        assert_eq!(h.listener.baselines(), vec![1.0, 1.02]);

        h.packets.close();
        assert_eq!(handle.join().unwrap(), ThreadExit::EndOfStream);
    }

    #[test]
    fn finished_queue_waits_for_postponed_packet() {
        let h = harness(|_| {});
        let control = AudioControl::new(h.state.clone(), h.packets.clone());
        control.pause();
        control.begin_seek_while_paused();
        h.packets.push_blocking(packet(0, 3000, 8));
        h.packets.close();

        let log = Arc::new(SinkLog::default());
        let sink_log = log.clone();
        let handle = spawn_audio_thread(h.parts, move || RecordingSink::new(sink_log)).unwrap();

        assert!(wait_until(WAIT, || SinkLog::count(&log.pauses) == 1));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        assert_eq!(h.listener.baselines(), vec![3.0]);
        assert_eq!(writes(&log), 0);

        control.resume();
        assert_eq!(handle.join().unwrap(), ThreadExit::EndOfStream);
        assert_eq!(writes(&log), 1);
    }

    #[test]
    fn cancel_wakes_thread_blocked_on_empty_queue() {
        let h = harness(|_| {});
        let log = Arc::new(SinkLog::default());
        let sink_log = log.clone();
        let handle = spawn_audio_thread(h.parts, move || RecordingSink::new(sink_log)).unwrap();

        assert!(wait_until(WAIT, || SinkLog::count(&log.inits) == 1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());

        handle.cancel();
        assert_eq!(handle.join().unwrap(), ThreadExit::Cancelled);
        assert_eq!(SinkLog::count(&log.deinits), 1);
    }

    #[test]
    fn cancel_wakes_paused_thread() {
        let h = harness(|_| {});
        h.state.pause();
        let log = Arc::new(SinkLog::default());
        let sink_log = log.clone();
        let handle = spawn_audio_thread(h.parts, move || RecordingSink::new(sink_log)).unwrap();

        assert!(wait_until(WAIT, || SinkLog::count(&log.pauses) == 1));
        handle.cancel();
        assert_eq!(handle.join().unwrap(), ThreadExit::Cancelled);
        assert_eq!(SinkLog::count(&log.deinits), 1);
    }

    #[test]
    fn panicking_thread_joins_as_error() {
        let h = harness(|_| {});
        let handle = spawn_audio_thread(h.parts, || -> RecordingSink {
            panic!("sink construction failed")
        })
        .unwrap();
        assert!(matches!(handle.join(), Err(AudioThreadError::Panicked)));
    }
}
