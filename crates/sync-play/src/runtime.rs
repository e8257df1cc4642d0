//! Player runtime: wires the demuxer, the audio thread and the output device together and
//! runs the interactive command loop.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use audio_sync::clock::{ClockListener, ClockSync, SharedClocks, hires_time};
use audio_sync::decode::{DecodeOrchestrator, SymphoniaDecoder};
use audio_sync::demux::{self, Demuxer, MediaInfo};
use audio_sync::device::{self, OutputTarget};
use audio_sync::playback::CpalSink;
use audio_sync::queue::PacketQueue;
use audio_sync::resample::{ResampleManager, RubatoEngine};
use audio_sync::state::{AudioControl, CancelToken, PlayerState};
use audio_sync::{AudioThreadHandle, AudioThreadParts, ThreadExit, spawn_audio_thread};

use crate::config::{PlayConfig, PlaybackConfig};

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Pause,
    Resume,
    Toggle,
    Seek(f64),
    Track(usize),
    Quit,
}

/// Parse one line of user input. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line == " " {
        return Ok(Some(Command::Toggle));
    }
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let command = match verb.to_ascii_lowercase().as_str() {
        "p" | "pause" => Command::Pause,
        "r" | "resume" => Command::Resume,
        "space" | "toggle" => Command::Toggle,
        "q" | "quit" => Command::Quit,
        "s" | "seek" => {
            let arg = arg.ok_or_else(|| anyhow!("usage: seek <seconds>"))?;
            let secs: f64 = arg.parse().with_context(|| format!("bad seek position {arg:?}"))?;
            if !secs.is_finite() || secs < 0.0 {
                bail!("seek position must be a non-negative number of seconds");
            }
            Command::Seek(secs)
        }
        "t" | "track" => {
            let arg = arg.ok_or_else(|| anyhow!("usage: track <n>"))?;
            Command::Track(arg.parse().with_context(|| format!("bad track {arg:?}"))?)
        }
        other => bail!("unknown command {other:?}"),
    };
    Ok(Some(command))
}

/// Re-anchors the playback start clock on every new audio baseline so that
/// `now - playback_start` equals the baseline position.
struct WallClockAnchor {
    clocks: Arc<SharedClocks>,
}

impl ClockListener for WallClockAnchor {
    fn notify_baseline(&self, pts: f64) {
        let target = hires_time() - pts;
        let start = self
            .clocks
            .shift_playback_start(target - self.clocks.playback_start());
        tracing::debug!(pts, playback_start = start, "clock re-anchored");
    }
}

/// Probe, open the output and play `config.path` until the end or `quit`.
pub fn run_play(config: PlayConfig) -> Result<()> {
    let host = cpal::default_host();
    let (format, info) = demux::probe_file(&config.path)?;

    let stream_index = config.track.unwrap_or(info.default_stream);
    let stream = info
        .stream(stream_index)
        .ok_or_else(|| anyhow!("no audio track {stream_index}"))?;
    tracing::info!(
        path = ?config.path,
        codec = demux::codec_label(&stream.codec_params),
        rate_hz = ?stream.codec_params.sample_rate,
        channels = ?stream.codec_params.channels.map(|c| c.count()),
        duration_ms = ?demux::duration_ms(&stream.codec_params),
        tracks = info.streams.len(),
        "source"
    );

    let output = OutputTarget::open(
        &host,
        config.device.as_deref(),
        stream.codec_params.sample_rate,
    )?;

    let packets = PacketQueue::shared(config.playback.queue_packets);
    let demuxer = Demuxer::spawn(format, &info, stream_index, packets.clone())?;

    let state = PlayerState::shared();
    let clocks = SharedClocks::shared();
    let mut session = Session {
        anchor: Arc::new(WallClockAnchor {
            clocks: clocks.clone(),
        }),
        control: AudioControl::new(state.clone(), packets.clone()),
        info,
        output,
        playback: config.playback,
        packets,
        state,
        clocks,
        demuxer: Some(demuxer),
        audio: None,
        stream_index,
        paused_at: None,
    };

    let (tx, rx) = crossbeam_channel::unbounded();
    spawn_stdin_reader(tx.clone())?;
    ctrlc::set_handler(move || {
        let _ = tx.send(Command::Quit);
    })
    .context("install Ctrl-C handler")?;

    if config.start_paused {
        session.pause();
    }
    let result = session.start_audio().and_then(|_| session.run(&rx));
    session.shutdown();
    result
}

fn spawn_stdin_reader(tx: Sender<Command>) -> Result<()> {
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Ok(Some(command)) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("{e:#}"),
                }
            }
        })
        .context("spawn stdin reader")?;
    Ok(())
}

struct Session {
    info: MediaInfo,
    output: OutputTarget,
    playback: PlaybackConfig,
    packets: Arc<PacketQueue>,
    state: Arc<PlayerState>,
    control: AudioControl,
    clocks: Arc<SharedClocks>,
    anchor: Arc<WallClockAnchor>,
    demuxer: Option<Demuxer>,
    audio: Option<AudioThreadHandle>,
    stream_index: usize,
    paused_at: Option<f64>,
}

impl Session {
    fn run(&mut self, commands: &Receiver<Command>) -> Result<()> {
        loop {
            match commands.recv_timeout(STATUS_INTERVAL) {
                Ok(Command::Quit) | Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!("quit");
                    return Ok(());
                }
                Ok(command) => {
                    if let Err(e) = self.apply(command) {
                        tracing::warn!("{e:#}");
                    }
                }
                Err(RecvTimeoutError::Timeout) => self.log_position(),
            }

            if self.audio.as_ref().is_some_and(|a| a.is_finished()) {
                if let Some(audio) = self.audio.take() {
                    match audio.join()? {
                        ThreadExit::EndOfStream => tracing::info!("playback finished"),
                        ThreadExit::Cancelled => tracing::info!("playback stopped"),
                    }
                }
                return Ok(());
            }
        }
    }

    fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Toggle => {
                if self.state.is_paused() {
                    self.resume()
                } else {
                    self.pause()
                }
            }
            Command::Seek(secs) => return self.seek(secs),
            Command::Track(index) => return self.select_track(index),
            Command::Quit => {}
        }
        Ok(())
    }

    fn start_audio(&mut self) -> Result<()> {
        let listener: Arc<dyn ClockListener> = self.anchor.clone();
        let sync = ClockSync::new(self.clocks.clone(), Some(listener), self.playback.sync);
        let orchestrator = DecodeOrchestrator::new(
            SymphoniaDecoder::new(),
            self.info.streams.clone(),
            self.stream_index,
            ResampleManager::new(
                RubatoEngine {
                    chunk_frames: self.playback.chunk_frames,
                },
                self.output.signature,
            ),
            sync,
        )?;

        let cancel = CancelToken::new();
        let parts = AudioThreadParts {
            orchestrator,
            packets: self.packets.clone(),
            state: self.state.clone(),
            cancel: cancel.clone(),
        };
        let output = self.output.clone();
        let playback = self.playback.clone();
        self.audio = Some(spawn_audio_thread(parts, move || {
            CpalSink::new(&output, playback, cancel)
        })?);
        Ok(())
    }

    fn stop_audio(&mut self) {
        if let Some(audio) = self.audio.take() {
            audio.cancel();
            match audio.join() {
                Ok(exit) => tracing::debug!(?exit, "audio thread stopped"),
                Err(e) => tracing::warn!("audio thread: {e}"),
            }
        }
    }

    fn pause(&mut self) {
        if self.state.is_paused() {
            return;
        }
        self.control.pause();
        self.paused_at = Some(hires_time());
        tracing::info!(position = self.clocks.audio_pts(), "paused");
    }

    fn resume(&mut self) {
        if !self.state.is_paused() {
            return;
        }
        self.control.resume();
        if let Some(at) = self.paused_at.take() {
            self.clocks.shift_playback_start(hires_time() - at);
        }
        tracing::info!("resumed");
    }

    fn seek(&mut self, secs: f64) -> Result<()> {
        let ms = (secs * 1000.0).round() as u64;
        tracing::info!(ms, "seeking");
        self.stop_audio();

        let seeked = match &self.demuxer {
            Some(demuxer) => demuxer.seek(ms),
            None => Err(anyhow!("demuxer is not running")),
        };

        if self.state.is_paused() {
            self.control.begin_seek_while_paused();
            self.paused_at = Some(hires_time());
        }
        self.start_audio()?;
        seeked
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if self.info.stream(index).is_none() {
            bail!("no audio track {index}");
        }
        if let Some(demuxer) = &self.demuxer {
            demuxer.select_track(index)?;
        }
        self.stream_index = index;
        Ok(())
    }

    fn log_position(&self) {
        let pts = self.clocks.audio_pts();
        if self.state.is_paused() {
            tracing::info!(audio_pts = %format_args!("{pts:.2}"), "paused");
        } else {
            let clock = hires_time() - self.clocks.playback_start();
            tracing::info!(
                audio_pts = %format_args!("{pts:.2}"),
                clock = %format_args!("{clock:.2}"),
                queued = self.packets.len(),
                "position"
            );
        }
    }

    fn shutdown(&mut self) {
        self.stop_audio();
        if let Some(demuxer) = self.demuxer.take() {
            demuxer.stop();
        }
    }
}
