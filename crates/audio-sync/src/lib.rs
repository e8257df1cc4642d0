//! Audio decode and A/V clock synchronization.
//!
//! The audio thread ([`pipeline`]) pulls encoded packets from a [`queue::PacketQueue`],
//! decodes them ([`decode`]), converts them to the output format ([`resample`]) and hands
//! them to an [`engine::AudioSink`], keeping the shared clocks ([`clock`]) in step.

pub mod clock;
pub mod config;
pub mod decode;
pub mod demux;
pub mod device;
pub mod engine;
pub mod error;
pub mod format;
pub mod packet;
pub mod pipeline;
pub mod playback;
pub mod queue;
pub mod resample;
pub mod state;

#[cfg(test)]
mod testing;

pub use error::{AudioThreadError, ThreadExit};
pub use pipeline::{AudioThreadHandle, AudioThreadParts, spawn_audio_thread};
