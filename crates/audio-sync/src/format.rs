//! Sample formats, channel layouts and format signatures.
//!
//! A [`FormatSignature`] is the `(sample format, channel layout, sample rate)` triple that
//! identifies how PCM samples are laid out in memory. The resample stage compares signatures
//! to decide whether a conversion context must be (re)built.
//!
//! All multi-byte samples are native-endian.

use dasp_sample::Sample;

/// In-memory encoding of a single PCM sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    F64,
    U8Planar,
    S16Planar,
    S32Planar,
    F32Planar,
    F64Planar,
}

impl SampleFormat {
    /// Size of one sample of one channel in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self.packed() {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
            _ => 8,
        }
    }

    /// Whether each channel lives in its own plane.
    pub fn is_planar(self) -> bool {
        !matches!(
            self,
            SampleFormat::U8
                | SampleFormat::S16
                | SampleFormat::S32
                | SampleFormat::F32
                | SampleFormat::F64
        )
    }

    /// The interleaved counterpart of this format.
    pub fn packed(self) -> SampleFormat {
        match self {
            SampleFormat::U8Planar => SampleFormat::U8,
            SampleFormat::S16Planar => SampleFormat::S16,
            SampleFormat::S32Planar => SampleFormat::S32,
            SampleFormat::F32Planar => SampleFormat::F32,
            SampleFormat::F64Planar => SampleFormat::F64,
            packed => packed,
        }
    }
}

/// Channel bitmask. Bit positions follow the usual speaker order
/// (front-left, front-right, front-centre, LFE, back-left, back-right, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelLayout(pub u64);

impl ChannelLayout {
    pub const FRONT_LEFT: u64 = 1 << 0;
    pub const FRONT_RIGHT: u64 = 1 << 1;
    pub const FRONT_CENTER: u64 = 1 << 2;
    pub const LFE: u64 = 1 << 3;
    pub const BACK_LEFT: u64 = 1 << 4;
    pub const BACK_RIGHT: u64 = 1 << 5;
    pub const BACK_CENTER: u64 = 1 << 8;
    pub const SIDE_LEFT: u64 = 1 << 9;
    pub const SIDE_RIGHT: u64 = 1 << 10;

    pub const MONO: ChannelLayout = ChannelLayout(Self::FRONT_CENTER);
    pub const STEREO: ChannelLayout = ChannelLayout(Self::FRONT_LEFT | Self::FRONT_RIGHT);
    pub const SURROUND: ChannelLayout = ChannelLayout(Self::STEREO.0 | Self::FRONT_CENTER);
    pub const QUAD: ChannelLayout = ChannelLayout(Self::STEREO.0 | Self::BACK_LEFT | Self::BACK_RIGHT);
    pub const FIVE_POINT_ZERO: ChannelLayout = ChannelLayout(Self::SURROUND.0 | Self::BACK_LEFT | Self::BACK_RIGHT);
    pub const FIVE_POINT_ONE: ChannelLayout = ChannelLayout(Self::FIVE_POINT_ZERO.0 | Self::LFE);
    pub const SIX_POINT_ONE: ChannelLayout = ChannelLayout(Self::FIVE_POINT_ONE.0 | Self::BACK_CENTER);
    pub const SEVEN_POINT_ONE: ChannelLayout =
        ChannelLayout(Self::FIVE_POINT_ONE.0 | Self::SIDE_LEFT | Self::SIDE_RIGHT);

    /// Number of channels described by the mask.
    pub fn channels(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Conventional layout for a bare channel count.
    pub fn default_for(channels: usize) -> ChannelLayout {
        match channels {
            0 => ChannelLayout(0),
            1 => Self::MONO,
            2 => Self::STEREO,
            3 => Self::SURROUND,
            4 => Self::QUAD,
            5 => Self::FIVE_POINT_ZERO,
            6 => Self::FIVE_POINT_ONE,
            7 => Self::SIX_POINT_ONE,
            8 => Self::SEVEN_POINT_ONE,
            n if n >= 64 => ChannelLayout(u64::MAX),
            n => ChannelLayout((1u64 << n) - 1),
        }
    }

    /// Effective layout of a frame: the declared mask if it agrees with the channel count,
    /// otherwise the default layout for that count.
    pub fn resolve(declared: ChannelLayout, channels: usize) -> ChannelLayout {
        if declared.0 != 0 && declared.channels() == channels {
            declared
        } else {
            Self::default_for(channels)
        }
    }
}

/// `(sample format, channel layout, sample rate)` of a PCM stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FormatSignature {
    pub sample_format: SampleFormat,
    pub layout: ChannelLayout,
    pub sample_rate: u32,
}

impl FormatSignature {
    pub fn new(sample_format: SampleFormat, layout: ChannelLayout, sample_rate: u32) -> Self {
        Self {
            sample_format,
            layout,
            sample_rate,
        }
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    /// Bytes occupied by one frame (one sample for every channel).
    pub fn frame_bytes(&self) -> usize {
        self.channels() * self.sample_format.bytes_per_sample()
    }
}

/// Decode `frames` frames of `channels` channels into interleaved `f32`.
///
/// Planar input is expected as one plane per channel; packed input uses `planes[0]`.
/// Missing bytes decode as silence.
pub fn read_interleaved(
    format: SampleFormat,
    channels: usize,
    frames: usize,
    planes: &[Vec<u8>],
) -> Vec<f32> {
    let bps = format.bytes_per_sample();
    let mut out = Vec::with_capacity(frames * channels);
    for frame in 0..frames {
        for ch in 0..channels {
            let (plane, offset) = if format.is_planar() {
                (planes.get(ch), frame * bps)
            } else {
                (planes.first(), (frame * channels + ch) * bps)
            };
            let sample = plane
                .and_then(|p| p.get(offset..offset + bps))
                .map(|bytes| decode_sample(format.packed(), bytes))
                .unwrap_or(0.0);
            out.push(sample);
        }
    }
    out
}

/// Encode interleaved `f32` samples into packed `format` bytes.
///
/// `out` must hold at least `samples.len() * format.bytes_per_sample()` bytes.
/// Returns the number of bytes written.
pub fn write_interleaved(format: SampleFormat, samples: &[f32], out: &mut [u8]) -> usize {
    let bps = format.bytes_per_sample();
    for (sample, dst) in samples.iter().zip(out.chunks_exact_mut(bps)) {
        encode_sample(format.packed(), *sample, dst);
    }
    samples.len().min(out.len() / bps) * bps
}

fn decode_sample(format: SampleFormat, bytes: &[u8]) -> f32 {
    match format {
        SampleFormat::U8 => bytes[0].to_sample::<f32>(),
        SampleFormat::S16 => i16::from_ne_bytes([bytes[0], bytes[1]]).to_sample::<f32>(),
        SampleFormat::S32 => {
            i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).to_sample::<f32>()
        }
        SampleFormat::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        _ => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            f64::from_ne_bytes(raw).to_sample::<f32>()
        }
    }
}

fn encode_sample(format: SampleFormat, sample: f32, dst: &mut [u8]) {
    let sample = sample.clamp(-1.0, 1.0);
    match format {
        SampleFormat::U8 => dst[0] = sample.to_sample::<u8>(),
        SampleFormat::S16 => dst.copy_from_slice(&sample.to_sample::<i16>().to_ne_bytes()),
        SampleFormat::S32 => dst.copy_from_slice(&sample.to_sample::<i32>().to_ne_bytes()),
        SampleFormat::F32 => dst.copy_from_slice(&sample.to_ne_bytes()),
        _ => dst.copy_from_slice(&sample.to_sample::<f64>().to_ne_bytes()),
    }
}

/// Map interleaved samples from `src_channels` to `dst_channels`.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - matching counts: pass-through
/// - other layouts: best-effort "clamp to available channels"
pub fn remap_channels(samples: &[f32], src_channels: usize, dst_channels: usize) -> Vec<f32> {
    if src_channels == dst_channels || src_channels == 0 {
        return samples.to_vec();
    }
    let frames = samples.len() / src_channels;
    let mut out = Vec::with_capacity(frames * dst_channels);
    for frame in samples.chunks_exact(src_channels) {
        for dst_ch in 0..dst_channels {
            let value = match (src_channels, dst_channels) {
                (2, 1) => 0.5 * (frame[0] + frame[1]),
                (1, _) => frame[0],
                _ => frame[dst_ch.min(src_channels - 1)],
            };
            out.push(value);
        }
    }
    out
}
