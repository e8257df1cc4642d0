//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use symphonia::core::codecs::CodecParameters;
use symphonia::core::units::TimeBase;

use crate::clock::ClockListener;
use crate::engine::{AudioSink, DecoderEngine};
use crate::format::{ChannelLayout, FormatSignature, SampleFormat};
use crate::packet::{DecodedFrame, EncodedPacket, StreamDescriptor};
use crate::state::CancelToken;

pub const TARGET: FormatSignature = FormatSignature {
    sample_format: SampleFormat::F32,
    layout: ChannelLayout::STEREO,
    sample_rate: 48_000,
};

/// Stream with a millisecond time base.
pub fn stream(index: usize) -> StreamDescriptor {
    let mut params = CodecParameters::new();
    params.sample_rate = Some(TARGET.sample_rate);
    params.time_base = Some(TimeBase::new(1, 1000));
    StreamDescriptor::new(index, index as u32, params)
}

pub fn packet(stream_index: usize, pts_ms: i64, len: usize) -> EncodedPacket {
    EncodedPacket::new(stream_index, Some(pts_ms), vec![1; len])
}

/// Frame in `signature` with `samples` samples of silence per channel.
pub fn silent_frame(signature: FormatSignature, samples: usize) -> DecodedFrame {
    let channels = signature.channels();
    DecodedFrame {
        sample_format: signature.sample_format,
        channels,
        layout: signature.layout,
        sample_rate: signature.sample_rate,
        sample_count: samples,
        planes: vec![vec![0; channels * samples * signature.sample_format.bytes_per_sample()]],
    }
}

pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[derive(Default)]
pub struct RecordingListener {
    baselines: Mutex<Vec<f64>>,
}

impl RecordingListener {
    pub fn baselines(&self) -> Vec<f64> {
        self.baselines.lock().unwrap().clone()
    }
}

impl ClockListener for RecordingListener {
    fn notify_baseline(&self, pts: f64) {
        self.baselines.lock().unwrap().push(pts);
    }
}

#[derive(Default)]
pub struct DecoderLog {
    pub opens: Mutex<Vec<usize>>,
    pub closes: AtomicUsize,
    pub submits: AtomicUsize,
}

/// Decoder that turns a packet of `n` bytes into one frame of `n` samples in `signature`.
pub struct ScriptedDecoder {
    pub log: Arc<DecoderLog>,
    pub signature: FormatSignature,
    pub unopenable: Vec<usize>,
    pub reject_submit: bool,
    pub frames_per_packet: usize,
    open: bool,
    pending: VecDeque<DecodedFrame>,
}

impl ScriptedDecoder {
    pub fn new(log: Arc<DecoderLog>) -> Self {
        Self {
            log,
            signature: TARGET,
            unopenable: Vec::new(),
            reject_submit: false,
            frames_per_packet: 1,
            open: true,
            pending: VecDeque::new(),
        }
    }
}

impl DecoderEngine for ScriptedDecoder {
    fn open(&mut self, stream: &StreamDescriptor) -> Result<()> {
        self.log.opens.lock().unwrap().push(stream.index);
        if self.unopenable.contains(&stream.index) {
            return Err(anyhow!("no decoder for stream {}", stream.index));
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        self.open = false;
        self.pending.clear();
    }

    fn submit(&mut self, packet: &EncodedPacket) -> Result<()> {
        self.log.submits.fetch_add(1, Ordering::SeqCst);
        if !self.open || self.reject_submit {
            return Err(anyhow!("packet rejected"));
        }
        for _ in 0..self.frames_per_packet {
            self.pending
                .push_back(silent_frame(self.signature, packet.data.len()));
        }
        Ok(())
    }

    fn drain(&mut self) -> Option<DecodedFrame> {
        self.pending.pop_front()
    }
}

#[derive(Default)]
pub struct SinkLog {
    pub inits: AtomicUsize,
    pub deinits: AtomicUsize,
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
    pub writes: Mutex<Vec<usize>>,
}

impl SinkLog {
    pub fn write_sizes(&self) -> Vec<usize> {
        self.writes.lock().unwrap().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Sink that records every call. Optionally cancels `token` while handling the n-th write.
pub struct RecordingSink {
    pub log: Arc<SinkLog>,
    pub accept: bool,
    pub fail_init: bool,
    pub cancel_on_write: Option<(usize, CancelToken)>,
}

impl RecordingSink {
    pub fn new(log: Arc<SinkLog>) -> Self {
        Self {
            log,
            accept: true,
            fail_init: false,
            cancel_on_write: None,
        }
    }
}

impl AudioSink for RecordingSink {
    fn initialize_thread(&mut self) -> Result<()> {
        self.log.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(anyhow!("no output device"));
        }
        Ok(())
    }

    fn deinitialize_thread(&mut self) {
        self.log.deinits.fetch_add(1, Ordering::SeqCst);
    }

    fn pause_output(&mut self) {
        self.log.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume_output(&mut self) {
        self.log.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn write(&mut self, bytes: &[u8]) -> bool {
        let mut writes = self.log.writes.lock().unwrap();
        writes.push(bytes.len());
        if let Some((nth, token)) = &self.cancel_on_write {
            if writes.len() == *nth {
                token.cancel();
            }
        }
        self.accept
    }
}
