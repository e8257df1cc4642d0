//! Decode stage.
//!
//! [`DecodeOrchestrator`] owns the per-packet work of the audio thread:
//! - live stream switches (close, switch descriptor, reopen)
//! - packet submission and frame draining
//! - resampling each frame to the output signature
//! - drift correction, delivery to the sink and heuristic clock advance
//!
//! [`SymphoniaDecoder`] is the production [`DecoderEngine`].

use std::collections::VecDeque;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::formats::Packet;

use crate::clock::ClockSync;
use crate::engine::{AudioSink, DecoderEngine, ResamplerEngine};
use crate::format::{ChannelLayout, SampleFormat};
use crate::packet::{DecodedFrame, EncodedPacket, StreamDescriptor};
use crate::resample::{ResampleManager, Resampled};
use crate::state::CancelToken;

/// How a packet left [`DecodeOrchestrator::handle_packet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Submitted and every decoded frame was processed.
    Decoded,
    /// Zero-length packet; nothing to decode.
    FlushMarker,
    /// Stream switch or submission failed; no frames were emitted.
    Rejected,
    /// Cancellation was observed before delivering a frame.
    Interrupted,
}

impl PacketOutcome {
    /// `true` unless the packet could not be handled at all.
    pub fn is_handled(self) -> bool {
        !matches!(self, PacketOutcome::Rejected)
    }
}

pub struct DecodeOrchestrator<D: DecoderEngine, E: ResamplerEngine> {
    decoder: D,
    catalog: Vec<StreamDescriptor>,
    active: StreamDescriptor,
    resampler: ResampleManager<E>,
    sync: ClockSync,
}

impl<D: DecoderEngine, E: ResamplerEngine> DecodeOrchestrator<D, E> {
    /// Open `decoder` for the catalog entry with index `active` and take ownership of the
    /// stages it drives.
    pub fn new(
        mut decoder: D,
        catalog: Vec<StreamDescriptor>,
        active: usize,
        resampler: ResampleManager<E>,
        sync: ClockSync,
    ) -> Result<Self> {
        let active = catalog
            .iter()
            .find(|s| s.index == active)
            .cloned()
            .ok_or_else(|| anyhow!("stream {active} is not an audio stream of this input"))?;
        decoder
            .open(&active)
            .with_context(|| format!("open decoder for stream {}", active.index))?;
        Ok(Self {
            decoder,
            catalog,
            active,
            resampler,
            sync,
        })
    }

    pub fn active_stream(&self) -> &StreamDescriptor {
        &self.active
    }

    pub fn sync(&self) -> &ClockSync {
        &self.sync
    }

    pub fn resampler(&self) -> &ResampleManager<E> {
        &self.resampler
    }

    /// Timestamp of `packet` in seconds, in the time base of the stream it belongs to.
    pub fn packet_seconds(&self, packet: &EncodedPacket) -> Option<f64> {
        let pts = packet.pts?;
        let stream = self
            .catalog
            .iter()
            .find(|s| s.index == packet.stream_index)
            .unwrap_or(&self.active);
        Some(stream.pts_seconds(pts))
    }

    /// Decode `packet` and deliver its audio to `sink`.
    ///
    /// `scratch` is the reusable conversion buffer owned by the audio thread.
    pub fn handle_packet(
        &mut self,
        packet: &EncodedPacket,
        scratch: &mut Vec<u8>,
        sink: &mut dyn AudioSink,
        cancel: &CancelToken,
    ) -> PacketOutcome {
        if packet.is_flush_marker() {
            tracing::debug!(stream = packet.stream_index, "flush marker, nothing to decode");
            return PacketOutcome::FlushMarker;
        }

        if packet.stream_index != self.active.index && !self.switch_stream(packet) {
            return PacketOutcome::Rejected;
        }

        if let Err(e) = self.decoder.submit(packet) {
            tracing::debug!(stream = packet.stream_index, "packet rejected by decoder: {e:#}");
            return PacketOutcome::Rejected;
        }

        if let Some(pts) = self.packet_seconds(packet) {
            self.sync.observe_pts(pts);
        }

        while let Some(frame) = self.decoder.drain() {
            if frame.sample_count == 0 {
                continue;
            }
            if !self.deliver(&frame, scratch, sink, cancel) {
                return PacketOutcome::Interrupted;
            }
        }
        PacketOutcome::Decoded
    }

    /// Returns `false` if cancellation was observed before the write.
    fn deliver(
        &mut self,
        frame: &DecodedFrame,
        scratch: &mut Vec<u8>,
        sink: &mut dyn AudioSink,
        cancel: &CancelToken,
    ) -> bool {
        let bytes: &[u8] = match self.resampler.process(frame, scratch) {
            None => return true,
            Some(Resampled::Passthrough) => frame.first_plane(),
            Some(Resampled::Converted { len, .. }) => &scratch[..len],
        };

        self.sync.correct_drift();

        if bytes.is_empty() {
            return true;
        }
        if cancel.is_cancelled() {
            tracing::debug!("cancelled before delivery, frame abandoned");
            return false;
        }

        if !sink.write(bytes) {
            if let Some(secs) = frame.duration_secs() {
                self.sync.advance(secs);
            }
        }
        true
    }

    /// Reopen the decoder for the stream of `packet` and re-baseline the clocks on it.
    fn switch_stream(&mut self, packet: &EncodedPacket) -> bool {
        let index = packet.stream_index;
        let Some(next) = self.catalog.iter().find(|s| s.index == index).cloned() else {
            tracing::warn!(stream = index, "packet for unknown stream, skipping");
            return false;
        };

        tracing::info!(from = self.active.index, to = index, "switching audio stream");
        self.decoder.close();
        self.active = next;
        if let Err(e) = self.decoder.open(&self.active) {
            tracing::error!(stream = index, "unable to open decoder: {e:#}");
            return false;
        }
        if let Some(pts) = self.packet_seconds(packet) {
            self.sync.establish_baseline(pts);
        }
        true
    }
}

/// Symphonia-backed [`DecoderEngine`] producing interleaved `f32` frames.
#[derive(Default)]
pub struct SymphoniaDecoder {
    decoder: Option<Box<dyn Decoder>>,
    track_id: u32,
    pending: VecDeque<DecodedFrame>,
}

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DecoderEngine for SymphoniaDecoder {
    fn open(&mut self, stream: &StreamDescriptor) -> Result<()> {
        self.close();
        let decoder = symphonia::default::get_codecs()
            .make(&stream.codec_params, &DecoderOptions::default())
            .context("no decoder for codec")?;
        self.decoder = Some(decoder);
        self.track_id = stream.track_id;
        Ok(())
    }

    fn close(&mut self) {
        self.decoder = None;
        self.pending.clear();
    }

    fn submit(&mut self, packet: &EncodedPacket) -> Result<()> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| anyhow!("decoder is not open"))?;

        let ts = packet.pts.unwrap_or(0).max(0) as u64;
        let input = Packet::new_from_slice(self.track_id, ts, packet.duration, &packet.data);
        let decoded = decoder.decode(&input).context("decode packet")?;

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            return Ok(());
        }

        let mut sample_buf = SampleBuffer::<f32>::new(frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let channels = spec.channels.count();
        self.pending.push_back(DecodedFrame {
            sample_format: SampleFormat::F32,
            channels,
            layout: ChannelLayout(u64::from(spec.channels.bits())),
            sample_rate: spec.rate,
            sample_count: sample_buf.samples().len() / channels.max(1),
            planes: vec![bytemuck::cast_slice(sample_buf.samples()).to_vec()],
        });
        Ok(())
    }

    fn drain(&mut self) -> Option<DecodedFrame> {
        self.pending.pop_front()
    }
}
