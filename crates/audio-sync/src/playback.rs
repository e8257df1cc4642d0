//! Playback stage (CPAL output).
//!
//! [`CpalSink`] is the production [`AudioSink`]. The audio thread writes interleaved `f32`
//! buffers into a bounded [`SharedAudio`] queue and the CPAL callback drains it.
//!
//! The callback:
//! - refills a small local buffer from the shared queue without blocking
//! - outputs silence while paused, without draining the queue
//! - converts `f32` samples to the device sample format

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::config::PlaybackConfig;
use crate::device::OutputTarget;
use crate::engine::AudioSink;
use crate::queue::{SharedAudio, calc_max_buffered_samples, wait_until_done_and_empty_or_cancel};
use crate::state::CancelToken;

/// Configuration for the CPAL output callback.
#[derive(Clone, Debug)]
pub struct CallbackConfig {
    /// Maximum number of frames to pull from the queue per refill.
    pub refill_max_frames: usize,
    /// When `true`, the callback outputs silence and does not drain the queue.
    pub paused: Arc<AtomicBool>,
}

/// Build a CPAL output stream that plays audio from `queue`.
///
/// `queue` must hold interleaved `f32` samples in the stream's channel count and rate.
/// Underruns are filled with silence.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SharedAudio>,
    cfg: CallbackConfig,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, cfg),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, cfg),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, cfg),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, cfg),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    cfg: CallbackConfig,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut buf = LocalBuffer::default();
    let refill_max_frames = cfg.refill_max_frames.max(1);
    let queue_cb = queue.clone();
    let paused = cfg.paused;

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
            if paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }

            let mut written = 0;
            while written < data.len() {
                if buf.pos >= buf.samples.len() {
                    match queue_cb.pop_available(refill_max_frames) {
                        Some(samples) => {
                            buf.samples = samples;
                            buf.pos = 0;
                        }
                        None => {
                            data[written..].fill(silence);
                            break;
                        }
                    }
                }
                let take = (buf.samples.len() - buf.pos).min(data.len() - written);
                for (dst, src) in data[written..written + take]
                    .iter_mut()
                    .zip(&buf.samples[buf.pos..buf.pos + take])
                {
                    *dst = <T as cpal::Sample>::from_sample::<f32>(*src);
                }
                buf.pos += take;
                written += take;
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Samples fetched from the queue but not yet copied to the device.
#[derive(Default)]
struct LocalBuffer {
    pos: usize,
    samples: Vec<f32>,
}

/// [`AudioSink`] playing through a CPAL output stream.
///
/// The stream is created in [`AudioSink::initialize_thread`] because CPAL streams cannot
/// move between threads; construct the sink on the audio thread.
pub struct CpalSink {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    playback: PlaybackConfig,
    cancel: CancelToken,
    paused: Arc<AtomicBool>,
    queue: Option<Arc<SharedAudio>>,
    stream: Option<cpal::Stream>,
}

impl CpalSink {
    pub fn new(output: &OutputTarget, playback: PlaybackConfig, cancel: CancelToken) -> Self {
        Self {
            device: output.device.clone(),
            config: output.config.clone(),
            playback,
            cancel,
            paused: Arc::new(AtomicBool::new(false)),
            queue: None,
            stream: None,
        }
    }
}

impl AudioSink for CpalSink {
    fn initialize_thread(&mut self) -> Result<()> {
        let stream_config = self.config.config();
        let channels = stream_config.channels as usize;
        let max_buffered = calc_max_buffered_samples(
            stream_config.sample_rate,
            channels,
            self.playback.buffer_seconds,
        );
        let queue = Arc::new(SharedAudio::new(channels, max_buffered));

        let stream = build_output_stream(
            &self.device,
            &stream_config,
            self.config.sample_format(),
            &queue,
            CallbackConfig {
                refill_max_frames: self.playback.refill_max_frames,
                paused: self.paused.clone(),
            },
        )?;
        stream.play().context("start output stream")?;
        tracing::debug!(channels, max_buffered, "output stream started");

        self.queue = Some(queue);
        self.stream = Some(stream);
        Ok(())
    }

    fn deinitialize_thread(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.close();
            if wait_until_done_and_empty_or_cancel(&queue, &self.cancel) {
                // Let the device play out its own buffer.
                thread::sleep(Duration::from_millis(100));
            } else {
                queue.discard();
            }
        }
        self.stream = None;
        tracing::debug!("output stream closed");
    }

    fn pause_output(&mut self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    fn resume_output(&mut self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    fn write(&mut self, bytes: &[u8]) -> bool {
        let Some(queue) = &self.queue else {
            return true;
        };
        let waited = match bytemuck::try_cast_slice::<u8, f32>(bytes) {
            Ok(samples) => queue.push_interleaved_blocking(samples),
            Err(_) => {
                let samples: Vec<f32> = bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                queue.push_interleaved_blocking(&samples)
            }
        };
        !waited
    }
}
