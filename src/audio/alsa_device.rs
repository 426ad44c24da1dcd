//! ALSA PCM setup shared by the capture source and the playback loop.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// What the caller asks the hardware for.
#[derive(Debug, Clone)]
pub struct PcmRequest<'a> {
    pub device: &'a str,
    pub sample_rate: u32,
    pub channels: u32,
    /// Preferred period in frames; `None` leaves it to the driver
    pub period_frames: Option<usize>,
}

/// Parameters the hardware actually agreed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlsaParams {
    pub sample_rate: u32,
    pub channels: u32,
    /// Period size in frames (one frame = channels × 2 bytes)
    pub period_size: usize,
}

/// Open a PCM device for capture (recording).
pub fn open_capture(request: &PcmRequest<'_>) -> Result<(PCM, AlsaParams)> {
    open_pcm(request, Direction::Capture)
}

/// Open a PCM device for playback.
pub fn open_playback(request: &PcmRequest<'_>) -> Result<(PCM, AlsaParams)> {
    open_pcm(request, Direction::Playback)
}

fn open_pcm(request: &PcmRequest<'_>, direction: Direction) -> Result<(PCM, AlsaParams)> {
    let dir_name = match direction {
        Direction::Capture => "capture",
        Direction::Playback => "playback",
    };

    let pcm = PCM::new(request.device, direction, false).with_context(|| {
        format!("Failed to open PCM device '{}' for {}", request.device, dir_name)
    })?;

    {
        let hwp = HwParams::any(&pcm).context("Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(request.channels).with_context(|| {
            format!("{} device does not support {} channels", dir_name, request.channels)
        })?;
        hwp.set_rate_near(request.sample_rate, ValueOr::Nearest)?;
        if let Some(frames) = request.period_frames {
            hwp.set_period_size_near(frames as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)
            .with_context(|| format!("Failed to apply {} hw params", dir_name))?;
    }

    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    if params.sample_rate != request.sample_rate {
        log::warn!(
            "ALSA {}: requested {} Hz, device runs at {} Hz",
            dir_name,
            request.sample_rate,
            params.sample_rate
        );
    }

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        request.device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}
