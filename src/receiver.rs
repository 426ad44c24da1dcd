//! Peer side of the stream: collect mono PCM datagrams until the
//! end-of-stream marker and store them as a 16-bit mono WAV file.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use tokio::net::UdpSocket;

use crate::audio::pcm::le_bytes_to_samples;
use crate::transport::is_end_of_stream;

/// Larger than any UDP payload.
const RECV_BUFFER_SIZE: usize = 65536;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub datagrams: u64,
    pub samples: u64,
    /// False if reception was interrupted before the marker arrived
    pub completed: bool,
    pub output: PathBuf,
}

pub struct Receiver {
    socket: UdpSocket,
}

impl Receiver {
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind UDP receiver on {}", addr))?;
        let receiver = Self { socket };
        log::info!("Listening on {}", receiver.local_addr()?);
        Ok(receiver)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until the end-of-stream marker or until `shutdown` resolves.
    /// The WAV header is finalised either way.
    pub async fn receive_to_wav(
        &self,
        output: &Path,
        sample_rate: u32,
        shutdown: impl Future<Output = ()>,
    ) -> Result<ReceiveSummary> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(output, spec)
            .with_context(|| format!("Failed to create WAV file {}", output.display()))?;

        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut summary = ReceiveSummary {
            datagrams: 0,
            samples: 0,
            completed: false,
            output: output.to_path_buf(),
        };
        let mut sender: Option<SocketAddr> = None;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::warn!("Reception interrupted before end of stream");
                    break;
                }
                res = self.socket.recv_from(&mut buf) => {
                    let (len, from) = res?;
                    let payload = &buf[..len];

                    if sender != Some(from) {
                        log::info!("Receiving from {}", from);
                        sender = Some(from);
                    }

                    if is_end_of_stream(payload) {
                        log::info!("End of stream from {}", from);
                        summary.completed = true;
                        break;
                    }

                    if len % 2 != 0 {
                        log::warn!("Datagram of {} bytes has a trailing odd byte, dropping it", len);
                    }
                    let samples = le_bytes_to_samples(payload);
                    for &s in &samples {
                        writer.write_sample(s)?;
                    }
                    summary.datagrams += 1;
                    summary.samples += samples.len() as u64;
                }
            }
        }

        writer.finalize().context("Failed to finalize WAV file")?;
        log::info!(
            "Saved {} samples from {} datagrams to {}",
            summary.samples,
            summary.datagrams,
            output.display()
        );
        Ok(summary)
    }
}
