use std::path::PathBuf;

use anyhow::{Result, anyhow};

pub use audio_sync::config::PlaybackConfig;

use crate::cli::Args;

#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub track: Option<usize>,
    pub start_paused: bool,
    pub playback: PlaybackConfig,
}

impl PlayConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let path = args
            .path
            .clone()
            .ok_or_else(|| anyhow!("no input file given"))?;
        Ok(Self {
            path,
            device: normalize_device_name(args.device.clone()),
            track: args.track,
            start_paused: args.paused,
            playback: PlaybackConfig {
                chunk_frames: args.chunk_frames,
                refill_max_frames: args.refill_max_frames,
                buffer_seconds: args.buffer_seconds,
                queue_packets: args.queue_packets,
                ..PlaybackConfig::default()
            },
        })
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
