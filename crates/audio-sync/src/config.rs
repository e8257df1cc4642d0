/// Extra output frames reserved on top of the rate-scaled frame count when sizing the
/// resample scratch buffer. Absorbs rounding and resampler-internal buffering.
pub const RESAMPLE_HEADROOM_FRAMES: usize = 256;

/// Audio/video drift correction parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyncConfig {
    /// Drift (seconds) tolerated before the playback start clock is nudged.
    pub drift_threshold_secs: f64,
    /// Size (seconds) of a single nudge.
    pub drift_correction_secs: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_threshold_secs: 0.1,
            drift_correction_secs: 0.05,
        }
    }
}

/// Playback tuning parameters shared by the decode/resample/output stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target buffer duration of the output sample queue.
    pub buffer_seconds: f32,
    /// Capacity of the encoded packet queue, in packets.
    pub queue_packets: usize,
    pub sync: SyncConfig,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-latency playback across common devices.
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 0.25,
            queue_packets: 256,
            sync: SyncConfig::default(),
        }
    }
}
