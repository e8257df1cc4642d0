//! sync-play: a terminal player built on `audio-sync`.
//!
//! ## Threads
//! 1. **Demux**: reads packets of the selected track into the packet queue.
//! 2. **Audio**: decodes, converts to the output format, keeps the clocks in sync and feeds
//!    the CPAL sink.
//! 3. **Control** (this thread): reads commands from stdin and logs the playback position.
//!
//! Commands: `p`/`pause`, `r`/`resume`, `space`/`toggle`, `s <secs>`/`seek <secs>`,
//! `t <n>`/`track <n>`, `q`/`quit`.

mod cli;
mod config;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_sync=info,sync_play=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let config = config::PlayConfig::from_args(&args)?;
    runtime::run_play(config)
}
