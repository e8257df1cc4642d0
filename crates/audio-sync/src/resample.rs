//! Resample stage.
//!
//! [`ResampleManager`] converts decoded frames from whatever the active stream produces into
//! the fixed output signature. It keeps one conversion context and rebuilds it only when the
//! source signature changes.
//!
//! [`RubatoEngine`] is the conversion engine used in production: sample format decoding,
//! channel mapping and Rubato's streaming sinc resampler.

use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::config::RESAMPLE_HEADROOM_FRAMES;
use crate::engine::{ResampleContext, ResamplerEngine};
use crate::format::{self, FormatSignature};
use crate::packet::DecodedFrame;

/// Result of handing one frame to the [`ResampleManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resampled {
    /// No conversion context: deliver the frame's own bytes unchanged.
    Passthrough,
    /// `len` converted bytes are at the start of the scratch buffer.
    Converted { len: usize, undersized: bool },
}

/// Output frames reserved for converting `samples` source frames from `src_rate` to
/// `dst_rate`: `ceil(samples * dst_rate / src_rate) + headroom`.
pub fn output_capacity(samples: usize, src_rate: u32, dst_rate: u32) -> usize {
    let src_rate = u64::from(src_rate.max(1));
    let scaled = (samples as u64 * u64::from(dst_rate)).div_ceil(src_rate);
    scaled as usize + RESAMPLE_HEADROOM_FRAMES
}

/// Owns the conversion context for the active source signature.
pub struct ResampleManager<E: ResamplerEngine> {
    engine: E,
    target: FormatSignature,
    current: FormatSignature,
    context: Option<E::Context>,
    rebuilds: usize,
}

impl<E: ResamplerEngine> ResampleManager<E> {
    pub fn new(engine: E, target: FormatSignature) -> Self {
        Self {
            engine,
            target,
            current: target,
            context: None,
            rebuilds: 0,
        }
    }

    pub fn target(&self) -> &FormatSignature {
        &self.target
    }

    /// Number of context rebuilds so far (successful or not).
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    /// Convert `frame` into `scratch`, growing it as needed (it never shrinks).
    ///
    /// Returns `None` when the frame must be dropped.
    pub fn process(&mut self, frame: &DecodedFrame, scratch: &mut Vec<u8>) -> Option<Resampled> {
        let signature = frame.signature();
        if signature != self.current {
            self.rebuild(signature);
        }

        let Some(context) = self.context.as_mut() else {
            return Some(Resampled::Passthrough);
        };

        let capacity = output_capacity(frame.sample_count, frame.sample_rate, self.target.sample_rate);
        let frame_bytes = self.target.frame_bytes();
        let buffer_size = capacity * frame_bytes;
        if scratch.len() < buffer_size {
            scratch.resize(buffer_size, 0);
        }

        let converted = match context.convert(frame, &mut scratch[..buffer_size], capacity) {
            Ok(n) => n.min(capacity),
            Err(e) => {
                tracing::error!("resample convert failed: {e:#}");
                return None;
            }
        };

        let undersized = converted == capacity;
        if undersized {
            tracing::warn!(capacity, "audio buffer is probably too small");
            if let Err(e) = context.reinit() {
                tracing::error!("resample context reinit failed: {e:#}");
            }
        }

        let len = converted * frame_bytes;
        debug_assert!(undersized || len < buffer_size);
        Some(Resampled::Converted { len, undersized })
    }

    fn rebuild(&mut self, signature: FormatSignature) {
        self.context = None;
        self.rebuilds += 1;
        match self.engine.build(&signature, &self.target) {
            Ok(context) => {
                tracing::debug!(
                    src_rate = signature.sample_rate,
                    src_channels = signature.channels(),
                    src_format = ?signature.sample_format,
                    dst_rate = self.target.sample_rate,
                    "resample context rebuilt"
                );
                self.context = Some(context);
            }
            Err(e) => tracing::error!("unable to initialize resample context: {e:#}"),
        }
        self.current = signature;
    }
}

/// Rubato-backed [`ResamplerEngine`].
#[derive(Clone, Copy, Debug)]
pub struct RubatoEngine {
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
}

impl Default for RubatoEngine {
    fn default() -> Self {
        Self { chunk_frames: 1024 }
    }
}

impl ResamplerEngine for RubatoEngine {
    type Context = RubatoContext;

    fn build(&self, src: &FormatSignature, dst: &FormatSignature) -> Result<RubatoContext> {
        RubatoContext::new(*src, *dst, self.chunk_frames)
    }
}

/// Conversion state for one `(source, target)` pair.
///
/// Input is mapped to the target channel count first, then resampled in fixed chunks when
/// the rates differ. Input that does not fill a chunk waits for the next frame. Each call
/// releases at most the frame's rate-scaled share of output; the rest stays in the backlog
/// for the next call.
pub struct RubatoContext {
    src: FormatSignature,
    dst: FormatSignature,
    chunk_frames: usize,
    resampler: Option<Box<dyn Resampler<f32> + Send>>,
    pending: Vec<f32>,
    backlog: VecDeque<f32>,
    chunk_out: Vec<f32>,
}

impl RubatoContext {
    pub fn new(src: FormatSignature, dst: FormatSignature, chunk_frames: usize) -> Result<Self> {
        if src.sample_rate == 0 || dst.sample_rate == 0 {
            return Err(anyhow!("sample rate must be non-zero"));
        }
        if src.channels() == 0 || dst.channels() == 0 {
            return Err(anyhow!("channel count must be non-zero"));
        }
        let mut ctx = Self {
            src,
            dst,
            chunk_frames: chunk_frames.max(1),
            resampler: None,
            pending: Vec::new(),
            backlog: VecDeque::new(),
            chunk_out: Vec::new(),
        };
        ctx.build_resampler()?;
        Ok(ctx)
    }

    fn build_resampler(&mut self) -> Result<()> {
        if self.src.sample_rate == self.dst.sample_rate {
            self.resampler = None;
            return Ok(());
        }

        let channels = self.dst.channels();
        let f_ratio = self.dst.sample_rate as f64 / self.src.sample_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            self.chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init error: {e}"))?;

        let max_out_frames = (self.chunk_frames as f64 * f_ratio * 1.1).ceil() as usize + 16;
        self.chunk_out = vec![0.0; max_out_frames * channels];
        self.resampler = Some(Box::new(resampler));
        Ok(())
    }

    /// Target frames released for `samples` source frames: `ceil(samples * dst / src)`.
    ///
    /// Whole chunks complete in bursts; releasing the rounded-up share per call keeps each
    /// call below the manager's capacity while the backlog still drains.
    fn frame_share(&self, samples: usize) -> usize {
        let src = u64::from(self.src.sample_rate);
        let dst = u64::from(self.dst.sample_rate);
        (samples as u64 * dst).div_ceil(src) as usize
    }

    /// Resample every complete chunk waiting in `pending` into `backlog`.
    fn run_chunks(&mut self) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        let channels = self.dst.channels();
        let chunk_samples = self.chunk_frames * channels;

        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk_samples {
            let input = &self.pending[consumed..consumed + chunk_samples];
            let input_adapter = InterleavedSlice::new(input, channels, self.chunk_frames)
                .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;

            let out_capacity_frames = self.chunk_out.len() / channels;
            let mut output_adapter =
                InterleavedSlice::new_mut(&mut self.chunk_out, channels, out_capacity_frames)
                    .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

            let indexing = Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            };

            let (_nbr_in, nbr_out) = resampler
                .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
                .map_err(|e| anyhow!("resampler process error: {e}"))?;

            self.backlog.extend(&self.chunk_out[..nbr_out * channels]);
            consumed += chunk_samples;
        }
        self.pending.drain(..consumed);
        Ok(())
    }
}

impl ResampleContext for RubatoContext {
    fn convert(&mut self, frame: &DecodedFrame, out: &mut [u8], capacity: usize) -> Result<usize> {
        let dst_channels = self.dst.channels();
        let samples = format::read_interleaved(
            frame.sample_format,
            frame.channels,
            frame.sample_count,
            &frame.planes,
        );
        let mapped = format::remap_channels(&samples, frame.channels, dst_channels);

        if self.resampler.is_some() {
            self.pending.extend_from_slice(&mapped);
            self.run_chunks()?;
        } else {
            self.backlog.extend(mapped);
        }

        let frames = (self.backlog.len() / dst_channels)
            .min(self.frame_share(frame.sample_count))
            .min(capacity)
            .min(out.len() / self.dst.frame_bytes());
        let ready: Vec<f32> = self.backlog.drain(..frames * dst_channels).collect();
        format::write_interleaved(self.dst.sample_format, &ready, out);
        Ok(frames)
    }

    fn reinit(&mut self) -> Result<()> {
        self.pending.clear();
        self.backlog.clear();
        self.build_resampler()
    }
}
