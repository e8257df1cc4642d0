//! Encoded packets, decoded frames and stream descriptors.

use symphonia::core::codecs::CodecParameters;
use symphonia::core::units::TimeBase;

use crate::format::{ChannelLayout, FormatSignature, SampleFormat};

/// One compressed chunk of an audio stream.
///
/// A zero-length payload is a flush marker: it carries no audio and is never submitted to a
/// decoder.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedPacket {
    /// Index of the stream this packet belongs to (see [`StreamDescriptor::index`]).
    pub stream_index: usize,
    /// Presentation timestamp in stream time-base units.
    pub pts: Option<i64>,
    /// Duration in stream time-base units (0 when unknown).
    pub duration: u64,
    pub data: Vec<u8>,
}

impl EncodedPacket {
    pub fn new(stream_index: usize, pts: Option<i64>, data: Vec<u8>) -> Self {
        Self {
            stream_index,
            pts,
            duration: 0,
            data,
        }
    }

    /// Zero-length packet used to mark a flush.
    pub fn flush_marker(stream_index: usize, pts: Option<i64>) -> Self {
        Self::new(stream_index, pts, Vec::new())
    }

    pub fn is_flush_marker(&self) -> bool {
        self.data.is_empty()
    }
}

/// PCM output of one decode step.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    pub sample_format: SampleFormat,
    pub channels: usize,
    /// Declared layout; may disagree with `channels` (see [`ChannelLayout::resolve`]).
    pub layout: ChannelLayout,
    pub sample_rate: u32,
    /// Samples per channel.
    pub sample_count: usize,
    /// One plane for packed formats, one per channel for planar formats.
    pub planes: Vec<Vec<u8>>,
}

impl DecodedFrame {
    /// Signature used to decide whether the resample context is still valid.
    pub fn signature(&self) -> FormatSignature {
        FormatSignature::new(
            self.sample_format,
            ChannelLayout::resolve(self.layout, self.channels),
            self.sample_rate,
        )
    }

    /// Size of the decoded audio in bytes across all planes.
    pub fn byte_len(&self) -> usize {
        self.channels * self.sample_count * self.sample_format.bytes_per_sample()
    }

    /// Playback duration of the frame in seconds, or `None` when the rate is unknown.
    pub fn duration_secs(&self) -> Option<f64> {
        let denom = self.channels * self.sample_rate as usize * self.sample_format.bytes_per_sample();
        if denom == 0 {
            return None;
        }
        Some(self.byte_len() as f64 / denom as f64)
    }

    /// Raw bytes of the first plane, as handed to the sink when no conversion is possible.
    pub fn first_plane(&self) -> &[u8] {
        let plane = self.planes.first().map(Vec::as_slice).unwrap_or(&[]);
        &plane[..plane.len().min(self.byte_len())]
    }
}

/// The audio stream a packet can belong to.
#[derive(Clone, Debug)]
pub struct StreamDescriptor {
    /// Position of the stream in the input's stream list.
    pub index: usize,
    /// Container track id (what symphonia packets carry).
    pub track_id: u32,
    pub codec_params: CodecParameters,
    pub time_base: TimeBase,
}

impl StreamDescriptor {
    /// Build a descriptor, falling back to a `1 / sample_rate` time base when the container
    /// does not declare one.
    pub fn new(index: usize, track_id: u32, codec_params: CodecParameters) -> Self {
        let time_base = codec_params.time_base.unwrap_or_else(|| {
            TimeBase::new(1, codec_params.sample_rate.unwrap_or(1).max(1))
        });
        Self {
            index,
            track_id,
            codec_params,
            time_base,
        }
    }

    /// Convert a timestamp in this stream's time base into seconds.
    pub fn pts_seconds(&self, pts: i64) -> f64 {
        pts as f64 * self.time_base.numer as f64 / self.time_base.denom as f64
    }
}
