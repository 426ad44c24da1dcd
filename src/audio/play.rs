//! Looped playback of a raw PCM buffer: write the whole buffer to the
//! playback device, log, pause, repeat.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use alsa::pcm::PCM;
use anyhow::{Context, Result};

use super::alsa_device::{self, PcmRequest};
use super::recovery::RetryLimit;
use crate::settings::PlaybackSettings;

/// Write errors in a row before a pass drops its remaining frames.
const MAX_WRITE_RETRIES: u32 = 3;

/// Interleaved i16 frame writer; the ALSA device in production.
pub trait FrameWriter {
    fn channels(&self) -> usize;
    /// Write as many frames as the device takes, returning the frame count.
    fn write_frames(&mut self, samples: &[i16]) -> Result<usize>;
    /// Bring the device back after an underrun or similar error.
    fn recover(&mut self) -> Result<()>;
}

pub struct AlsaWriter {
    pcm: PCM,
    channels: usize,
}

impl AlsaWriter {
    pub fn open(settings: &PlaybackSettings) -> Result<Self> {
        let request = PcmRequest {
            device: &settings.device,
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            period_frames: None,
        };
        let (pcm, params) = alsa_device::open_playback(&request)?;
        if params.channels != settings.channels {
            anyhow::bail!(
                "playback device '{}' negotiated {} channels, need {}",
                settings.device,
                params.channels,
                settings.channels
            );
        }
        Ok(Self {
            pcm,
            channels: params.channels as usize,
        })
    }

    /// Block until queued frames have been played.
    pub fn drain(&self) {
        if let Err(e) = self.pcm.drain() {
            log::warn!("Failed to drain playback device: {}", e);
        }
    }
}

impl FrameWriter for AlsaWriter {
    fn channels(&self) -> usize {
        self.channels
    }

    fn write_frames(&mut self, samples: &[i16]) -> Result<usize> {
        Ok(self.pcm.io_i16()?.writei(samples)?)
    }

    fn recover(&mut self) -> Result<()> {
        Ok(self.pcm.prepare()?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub passes: u32,
    pub failed_passes: u32,
    pub bytes_written: u64,
}

/// Read a raw S16LE file, dropping any trailing partial frame.
pub fn load_pcm(path: &Path, channels: u32) -> Result<Vec<i16>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read PCM file {}", path.display()))?;
    Ok(pcm_from_bytes(&bytes, channels as usize))
}

fn pcm_from_bytes(bytes: &[u8], channels: usize) -> Vec<i16> {
    let frame_bytes = channels * 2;
    let whole = bytes.len() / frame_bytes * frame_bytes;
    if whole != bytes.len() {
        log::warn!(
            "PCM data has {} trailing bytes that do not form a frame; ignoring them",
            bytes.len() - whole
        );
    }
    bytes[..whole]
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Write every frame of `pcm`, retrying short writes and recovering from
/// device errors. Returns the number of bytes written.
///
/// After [`MAX_WRITE_RETRIES`] errors without a successful write in between
/// the rest of the buffer is dropped and the pass fails.
pub fn write_pass<W: FrameWriter + ?Sized>(writer: &mut W, pcm: &[i16]) -> Result<usize> {
    let channels = writer.channels();
    let total_frames = pcm.len() / channels;
    let mut frames_written = 0;
    let mut retries = RetryLimit::new(MAX_WRITE_RETRIES);

    while frames_written < total_frames {
        let offset = frames_written * channels;
        match writer.write_frames(&pcm[offset..total_frames * channels]) {
            Ok(0) => anyhow::bail!("playback device accepted no frames"),
            Ok(n) => {
                frames_written += n;
                retries.succeed();
            }
            Err(e) => {
                log::warn!("ALSA playback error: {}, recovering...", e);
                writer
                    .recover()
                    .context("Failed to recover PCM playback")?;
                if !retries.fail() {
                    anyhow::bail!(
                        "giving up after {} write errors in a row, dropping {} unwritten frames",
                        retries.consecutive(),
                        total_frames - frames_written
                    );
                }
            }
        }
    }

    Ok(frames_written * channels * 2)
}

/// Play `pcm` repeatedly with `pause` between passes until `passes` is
/// reached (if set) or `running` is cleared. A failed pass is logged and the
/// loop moves on.
pub fn play_loop<W: FrameWriter + ?Sized>(
    writer: &mut W,
    pcm: &[i16],
    pause: Duration,
    passes: Option<u32>,
    running: &AtomicBool,
) -> PlaybackReport {
    let mut report = PlaybackReport::default();

    while running.load(Ordering::Relaxed) && passes.is_none_or(|max| report.passes < max) {
        match write_pass(writer, pcm) {
            Ok(bytes) => {
                log::info!("Wrote {} bytes of audio data", bytes);
                report.bytes_written += bytes as u64;
            }
            Err(e) => {
                log::error!("Failed to write audio data: {:#}", e);
                report.failed_passes += 1;
            }
        }
        report.passes += 1;

        if passes != Some(report.passes) {
            sleep_while_running(pause, running);
        }
    }

    report
}

fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::Relaxed) {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        thread::sleep(left.min(Duration::from_millis(50)));
    }
}

/// Open the playback device, load the configured file and loop over it.
/// Blocking; run it on its own thread.
pub fn play_file(settings: &PlaybackSettings, running: &AtomicBool) -> Result<PlaybackReport> {
    let pcm = load_pcm(&settings.file, settings.channels)?;
    if pcm.is_empty() {
        anyhow::bail!("PCM file {} holds no complete frame", settings.file.display());
    }

    let mut writer = AlsaWriter::open(settings)?;
    log::info!(
        "Playback started: file={}, frames={}, pause={}ms, passes={}",
        settings.file.display(),
        pcm.len() / settings.channels as usize,
        settings.pause_ms,
        settings
            .passes
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string()),
    );

    let report = play_loop(
        &mut writer,
        &pcm,
        Duration::from_millis(settings.pause_ms),
        settings.passes,
        running,
    );
    writer.drain();

    log::info!("Playback stopped");
    Ok(report)
}
