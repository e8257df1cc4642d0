//! Thread-level outcomes of the audio thread.
//!
//! Per-frame and per-packet failures never surface here; they are logged and contained by
//! the decode and resample stages.

use thiserror::Error;

/// Why the audio thread stopped abnormally.
#[derive(Debug, Error)]
pub enum AudioThreadError {
    /// The upstream demuxer delivered a first packet without a timestamp, so no audio
    /// baseline can be established.
    #[error("first audio packet on stream {stream_index} has no presentation timestamp")]
    MissingBaselineTimestamp { stream_index: usize },

    #[error("audio sink failed to initialize: {0:#}")]
    SinkInit(anyhow::Error),

    #[error("audio thread panicked")]
    Panicked,
}

/// How the audio thread ended when it ended cleanly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadExit {
    /// Cancellation was requested and observed.
    Cancelled,
    /// The packet queue was closed and fully drained.
    EndOfStream,
}
