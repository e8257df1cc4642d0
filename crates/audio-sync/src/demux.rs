//! Demux stage.
//!
//! Uses Symphonia to:
//! - probe the input container and list its audio tracks as [`StreamDescriptor`]s
//! - read packets of the selected track from a background thread into the [`PacketQueue`]
//!
//! The thread is controlled over a `crossbeam-channel`: seeks, live track switches and stop.
//! At end of input the queue is closed and the thread keeps serving commands, so a seek can
//! rewind a finished input.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::packet::{EncodedPacket, StreamDescriptor};
use crate::queue::PacketQueue;

/// What probing found in the input.
#[derive(Clone, Debug)]
pub struct MediaInfo {
    /// Every decodable audio track, in container order.
    pub streams: Vec<StreamDescriptor>,
    /// Index of the container's default audio track.
    pub default_stream: usize,
}

impl MediaInfo {
    pub fn stream(&self, index: usize) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.index == index)
    }
}

/// Probe `path` and list its audio tracks.
pub fn probe_file(path: &Path) -> Result<(Box<dyn FormatReader>, MediaInfo)> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("probe input")?;
    let format = probed.format;

    let streams: Vec<StreamDescriptor> = format
        .tracks()
        .iter()
        .enumerate()
        .filter(|(_, t)| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .map(|(i, t)| StreamDescriptor::new(i, t.id, t.codec_params.clone()))
        .collect();

    let first = streams.first().ok_or_else(|| anyhow!("No audio tracks"))?;
    let default_stream = format
        .default_track()
        .and_then(|t| streams.iter().find(|s| s.track_id == t.id))
        .unwrap_or(first)
        .index;

    Ok((
        format,
        MediaInfo {
            streams,
            default_stream,
        },
    ))
}

/// Best-effort duration in milliseconds from codec metadata.
pub fn duration_ms(params: &CodecParameters) -> Option<u64> {
    let frames = params.n_frames?;
    let rate = params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label for logs.
pub fn codec_label(params: &CodecParameters) -> &'static str {
    use symphonia::core::codecs::*;
    match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => "unknown",
    }
}

enum DemuxCommand {
    Seek {
        ms: u64,
        reply: Sender<Result<()>>,
    },
    SelectTrack(usize),
    Stop,
}

/// Handle to the packet reader thread.
pub struct Demuxer {
    commands: Sender<DemuxCommand>,
    packets: Arc<PacketQueue>,
    handle: JoinHandle<()>,
}

impl Demuxer {
    /// Start forwarding packets of stream `stream_index` into `packets`.
    pub fn spawn(
        format: Box<dyn FormatReader>,
        info: &MediaInfo,
        stream_index: usize,
        packets: Arc<PacketQueue>,
    ) -> Result<Self> {
        let selected = info
            .stream(stream_index)
            .cloned()
            .ok_or_else(|| anyhow!("stream {stream_index} is not an audio stream of this input"))?;
        let (tx, rx) = crossbeam_channel::unbounded();

        let mut pump = PacketPump {
            format,
            streams: info.streams.clone(),
            selected,
            packets: packets.clone(),
            at_end: false,
        };
        let handle = thread::Builder::new()
            .name("demux".into())
            .spawn(move || pump.run(&rx))
            .context("spawn demux thread")?;

        Ok(Self {
            commands: tx,
            packets,
            handle,
        })
    }

    /// Seek to `ms` and flush queued packets. Returns once the reader has repositioned.
    ///
    /// The audio thread must be stopped first: the queue reports itself finished until
    /// the reader reopens it.
    pub fn seek(&self, ms: u64) -> Result<()> {
        // Closing unblocks a reader stuck on a full queue so it sees the command.
        self.packets.close();
        let (reply, ack) = crossbeam_channel::bounded(1);
        self.commands
            .send(DemuxCommand::Seek { ms, reply })
            .map_err(|_| anyhow!("demux thread has exited"))?;
        ack.recv().map_err(|_| anyhow!("demux thread has exited"))?
    }

    /// Forward packets of another audio stream from the current position on.
    pub fn select_track(&self, stream_index: usize) -> Result<()> {
        self.commands
            .send(DemuxCommand::SelectTrack(stream_index))
            .map_err(|_| anyhow!("demux thread has exited"))
    }

    pub fn stop(self) {
        let _ = self.commands.send(DemuxCommand::Stop);
        self.packets.close();
        if self.handle.join().is_err() {
            tracing::error!("demux thread panicked");
        }
    }
}

struct PacketPump {
    format: Box<dyn FormatReader>,
    streams: Vec<StreamDescriptor>,
    selected: StreamDescriptor,
    packets: Arc<PacketQueue>,
    at_end: bool,
}

impl PacketPump {
    fn run(&mut self, commands: &Receiver<DemuxCommand>) {
        tracing::debug!(stream = self.selected.index, "demux thread started");
        loop {
            let command = if self.at_end {
                match commands.recv() {
                    Ok(c) => Some(c),
                    Err(_) => break,
                }
            } else {
                match commands.try_recv() {
                    Ok(c) => Some(c),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            };

            match command {
                Some(DemuxCommand::Stop) => break,
                Some(DemuxCommand::Seek { ms, reply }) => {
                    let _ = reply.send(self.seek(ms));
                }
                Some(DemuxCommand::SelectTrack(index)) => self.select(index),
                None => self.pump_one(),
            }
        }
        self.packets.close();
        tracing::debug!("demux thread stopped");
    }

    fn pump_one(&mut self) {
        let packet = match self.format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::info!("end of input");
                self.finish();
                return;
            }
            Err(e) => {
                tracing::warn!("demux error, stopping input: {e}");
                self.finish();
                return;
            }
        };

        if packet.track_id() != self.selected.track_id {
            return;
        }

        let mut encoded = EncodedPacket::new(
            self.selected.index,
            i64::try_from(packet.ts()).ok(),
            packet.data.to_vec(),
        );
        encoded.duration = packet.dur();
        if encoded.is_flush_marker() {
            return;
        }
        if !self.packets.push_blocking(encoded) {
            tracing::trace!("packet queue closed, packet dropped");
        }
    }

    fn seek(&mut self, ms: u64) -> Result<()> {
        self.packets.clear();
        let time = Time::new(ms / 1000, (ms % 1000) as f64 / 1000.0);
        let seeked = match self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.selected.track_id),
            },
        ) {
            Ok(seeked) => seeked,
            Err(e) => {
                // Position is unknown now; treat the input as finished.
                self.finish();
                return Err(e).with_context(|| format!("seek to {ms} ms"));
            }
        };

        self.packets.clear();
        self.packets.reopen();
        self.at_end = false;
        tracing::debug!(ms, ts = seeked.actual_ts, "seeked");

        let marker = EncodedPacket::flush_marker(self.selected.index, i64::try_from(seeked.actual_ts).ok());
        self.packets.push_blocking(marker);
        Ok(())
    }

    fn select(&mut self, index: usize) {
        match self.streams.iter().find(|s| s.index == index) {
            Some(stream) => {
                tracing::info!(from = self.selected.index, to = index, "selecting audio track");
                self.selected = stream.clone();
            }
            None => tracing::warn!(stream = index, "no such audio track"),
        }
    }

    fn finish(&mut self) {
        self.at_end = true;
        self.packets.close();
    }
}
