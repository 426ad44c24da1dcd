//! Blocking audio sources that fill a caller-supplied buffer with
//! interleaved 16-bit stereo PCM.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use alsa::pcm::PCM;
use anyhow::{Context, Result};
use thiserror::Error;

use super::alsa_device::{self, PcmRequest};
use super::pcm::STEREO_FRAME_BYTES;
use super::recovery::RetryLimit;

/// Channel count every source delivers.
pub const CAPTURE_CHANNELS: u32 = 2;

/// Read errors in a row, each cleared by `prepare()`, before capture gives up.
pub const MAX_CAPTURE_RECOVERIES: u32 = 5;

/// Unrecoverable failure of the audio path.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture read failed and the device could not be re-prepared: {read} (prepare: {prepare})")]
    Device {
        read: alsa::Error,
        #[source]
        prepare: alsa::Error,
    },
    #[error("capture failed {attempts} times in a row despite recovery: {last}")]
    Stalled {
        attempts: u32,
        #[source]
        last: alsa::Error,
    },
    #[error("capture format check failed: {0}")]
    Format(#[source] alsa::Error),
    #[error("raw capture file read failed: {0}")]
    File(#[from] io::Error),
}

/// A blocking "read one chunk" primitive.
///
/// `read_block` waits without timeout until at least some data is available
/// and returns the number of **bytes** written into `buf`. Zero is allowed and
/// means "nothing this time".
pub trait AudioSource {
    fn read_block(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError>;
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn read_block(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError> {
        (**self).read_block(buf)
    }
}

/// ALSA capture device opened once as S16LE interleaved stereo.
pub struct AlsaSource {
    pcm: PCM,
    retries: RetryLimit,
}

impl AlsaSource {
    pub fn open(device: &str, sample_rate: u32, block_size: usize) -> Result<Self> {
        let request = PcmRequest {
            device,
            sample_rate,
            channels: CAPTURE_CHANNELS,
            period_frames: Some(block_size / STEREO_FRAME_BYTES),
        };
        let (pcm, params) = alsa_device::open_capture(&request)?;
        if params.channels != CAPTURE_CHANNELS {
            anyhow::bail!(
                "capture device '{}' negotiated {} channels, need {}",
                device,
                params.channels,
                CAPTURE_CHANNELS
            );
        }
        pcm.prepare().context("Failed to prepare capture device")?;
        Ok(Self {
            pcm,
            retries: RetryLimit::new(MAX_CAPTURE_RECOVERIES),
        })
    }
}

impl AudioSource for AlsaSource {
    fn read_block(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError> {
        let io = self.pcm.io_i16().map_err(CaptureError::Format)?;
        match io.readi(buf) {
            Ok(frames) => {
                self.retries.succeed();
                Ok(frames * STEREO_FRAME_BYTES)
            }
            Err(read) => {
                // Overruns are routine on a busy host; anything prepare() can't fix is fatal.
                log::warn!("ALSA capture error: {}, recovering...", read);
                if let Err(prepare) = self.pcm.prepare() {
                    return Err(CaptureError::Device { read, prepare });
                }
                if !self.retries.fail() {
                    return Err(CaptureError::Stalled {
                        attempts: self.retries.consecutive(),
                        last: read,
                    });
                }
                Ok(0)
            }
        }
    }
}

/// Replays a raw interleaved S16LE stereo file, rewinding at end of file.
pub struct RawFileSource<R> {
    reader: R,
    scratch: Vec<u8>,
}

impl RawFileSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open raw capture file {}", path.display()))?;
        let len = file.metadata()?.len();
        if len < STEREO_FRAME_BYTES as u64 {
            anyhow::bail!(
                "raw capture file {} holds no complete stereo frame ({} bytes)",
                path.display(),
                len
            );
        }
        log::info!("Replaying {} ({} bytes, looped)", path.display(), len);
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read + Seek> RawFileSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            scratch: Vec::new(),
        }
    }
}

impl<R: Read + Seek> AudioSource for RawFileSource<R> {
    fn read_block(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError> {
        self.scratch.resize(buf.len() * 2, 0);
        let mut n = self.reader.read(&mut self.scratch)?;
        if n == 0 {
            self.reader.seek(SeekFrom::Start(0))?;
            n = self.reader.read(&mut self.scratch)?;
        }
        for (dst, src) in buf.iter_mut().zip(self.scratch[..n].chunks_exact(2)) {
            *dst = i16::from_le_bytes([src[0], src[1]]);
        }
        Ok(n)
    }
}
