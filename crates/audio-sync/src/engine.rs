//! Contracts for the collaborators driven by the audio thread.
//!
//! The core never implements codec or resampling math itself; it drives these engines and
//! the output sink. Concrete implementations live in [`crate::decode`], [`crate::resample`]
//! and [`crate::playback`].

use anyhow::Result;

use crate::format::FormatSignature;
use crate::packet::{DecodedFrame, EncodedPacket, StreamDescriptor};

/// Packet-in, frames-out decoder.
///
/// Failures are per packet and never fatal to the audio thread.
pub trait DecoderEngine: Send {
    /// Open a decoder for `stream`, replacing any open one.
    fn open(&mut self, stream: &StreamDescriptor) -> Result<()>;

    fn close(&mut self);

    /// Feed one packet.
    fn submit(&mut self, packet: &EncodedPacket) -> Result<()>;

    /// Next decoded frame produced by earlier submissions, if any.
    fn drain(&mut self) -> Option<DecodedFrame>;
}

/// Builds conversion contexts for a `(source, target)` signature pair.
pub trait ResamplerEngine: Send {
    type Context: ResampleContext;

    fn build(&self, src: &FormatSignature, dst: &FormatSignature) -> Result<Self::Context>;
}

/// One live conversion. Dropping it frees its resources.
pub trait ResampleContext: Send {
    /// Convert `frame` into `out`, writing at most `capacity` target frames.
    ///
    /// Returns the number of target frames written. A result equal to `capacity` means the
    /// output was probably truncated.
    fn convert(&mut self, frame: &DecodedFrame, out: &mut [u8], capacity: usize) -> Result<usize>;

    /// Reset internal state after a truncated conversion.
    fn reinit(&mut self) -> Result<()>;
}

/// Playback output driven by the audio thread.
///
/// `initialize_thread`/`deinitialize_thread` are called on the audio thread itself, once at
/// start and exactly once on every exit path.
pub trait AudioSink {
    fn initialize_thread(&mut self) -> Result<()>;

    fn deinitialize_thread(&mut self);

    fn pause_output(&mut self);

    fn resume_output(&mut self);

    /// Hand a finished buffer to the output.
    ///
    /// `true` means the buffer was taken immediately; `false` means it was accepted but the
    /// device was busy. `false` is a timing signal, not an error.
    fn write(&mut self, bytes: &[u8]) -> bool;
}
