//! Output device discovery and selection.
//!
//! Picks a CPAL output device and stream config, and derives the output
//! [`FormatSignature`] every decoded frame is converted to.

use std::cmp::Reverse;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::format::{ChannelLayout, FormatSignature, SampleFormat};

/// A selected device plus the config the sink will open it with.
#[derive(Clone)]
pub struct OutputTarget {
    pub device: cpal::Device,
    pub config: cpal::SupportedStreamConfig,
    /// Signature of the bytes handed to the sink (always `F32`).
    pub signature: FormatSignature,
}

impl OutputTarget {
    /// Select a device (by name substring, or the default one) and a config close to
    /// `preferred_rate`.
    pub fn open(host: &cpal::Host, needle: Option<&str>, preferred_rate: Option<u32>) -> Result<Self> {
        let device = pick_device(host, needle)?;
        let config = pick_output_config(&device, preferred_rate)?;
        let signature = target_signature(&config);
        tracing::info!(
            device = %device_name(&device),
            rate_hz = signature.sample_rate,
            channels = signature.channels(),
            format = ?config.sample_format(),
            "output selected"
        );
        Ok(Self {
            device,
            config,
            signature,
        })
    }
}

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("No output devices")?
        .find(|d| matches_device_name(&device_name(d), needle))
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Choose the output config to open.
///
/// An exact `preferred_rate` wins, then the lowest rate above it, then the highest rate
/// below it. Ties go to the sample format the callback converts to most cheaply.
pub fn pick_output_config(
    device: &cpal::Device,
    preferred_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    device
        .supported_output_configs()
        .context("query output configs")?
        .filter(|range| sample_format_rank(range.sample_format()).is_some())
        .map(|range| {
            let rate = match preferred_rate {
                Some(p) => p.clamp(range.min_sample_rate(), range.max_sample_rate()),
                None => range.max_sample_rate(),
            };
            range.with_sample_rate(rate)
        })
        .max_by_key(|cfg| config_score(cfg.sample_rate(), cfg.sample_format(), preferred_rate))
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Output signature for a device config: interleaved `f32` in the device's channel count
/// and rate.
pub fn target_signature(config: &cpal::SupportedStreamConfig) -> FormatSignature {
    let channels = config.channels() as usize;
    FormatSignature::new(
        SampleFormat::F32,
        ChannelLayout::default_for(channels),
        config.sample_rate(),
    )
}

/// Print available output devices to stdout (`--list-devices`).
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_default()
}

type ConfigScore = (bool, bool, u32, Reverse<u8>);

fn config_score(rate: u32, format: cpal::SampleFormat, preferred: Option<u32>) -> ConfigScore {
    let rank = Reverse(sample_format_rank(format).unwrap_or(u8::MAX));
    match preferred {
        Some(p) => {
            let above = rate >= p;
            let closeness = if above { u32::MAX - (rate - p) } else { rate };
            (rate == p, above, closeness, rank)
        }
        None => (true, true, rate, rank),
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> Option<u8> {
    match format {
        cpal::SampleFormat::F32 => Some(0),
        cpal::SampleFormat::I32 => Some(1),
        cpal::SampleFormat::I16 => Some(2),
        cpal::SampleFormat::U16 => Some(3),
        _ => None,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
