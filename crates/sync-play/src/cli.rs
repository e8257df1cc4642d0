use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "sync-play", version)]
pub struct Args {
    /// Path to an audio file
    #[arg(required_unless_present = "list_devices")]
    pub path: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Audio track to start on (container track index); defaults to the default track
    #[arg(long)]
    pub track: Option<usize>,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Playback callback refill cap (frames). Larger reduces lock churn but can add latency.
    #[arg(long, default_value_t = 4096)]
    pub refill_max_frames: usize,

    /// Output queue buffer target in seconds
    #[arg(long, default_value_t = 0.25)]
    pub buffer_seconds: f32,

    /// Encoded packet queue capacity
    #[arg(long, default_value_t = 256)]
    pub queue_packets: usize,

    /// Start paused
    #[arg(long)]
    pub paused: bool,
}
