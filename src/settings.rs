//! Runtime configuration.
//!
//! Layering, lowest to highest: built-in defaults, the TOML file
//! (`config.toml` in the working directory unless `--config`
//! says otherwise), `MIC_STREAM__<SECTION>__<KEY>` environment variables,
//! then command-line flags applied by `main`.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::pcm::{MONO_SAMPLE_BYTES, STEREO_FRAME_BYTES};

/// Looked up without extension; any format the `config` crate knows works.
pub const DEFAULT_CONFIG_FILE: &str = "config";
pub const ENV_PREFIX: &str = "MIC_STREAM";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("stream.sample_rate must be greater than zero")]
    ZeroSampleRate,
    #[error("stream.duration_seconds must be greater than zero")]
    ZeroDuration,
    #[error("stream.block_size must be a non-zero multiple of 4 bytes, got {0}")]
    BlockSize(usize),
    #[error("cannot resolve peer {addr}:{port}: {reason}")]
    Peer {
        addr: String,
        port: u16,
        reason: String,
    },
    #[error("playback.channels must be 1 or 2, got {0}")]
    PlaybackChannels(u32),
}

/// How the progress counter treats a datagram the transport rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressAccounting {
    /// Only bytes the transport accepted count toward the target.
    #[default]
    Delivered,
    /// Every block counts whether or not the send succeeded.
    Attempted,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub stream: StreamSettings,
    pub capture: CaptureSettings,
    pub playback: PlaybackSettings,
    pub receiver: ReceiverSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamSettings {
    pub sample_rate: u32,
    pub duration_seconds: u32,
    /// Stereo bytes requested per read; must hold whole frames
    pub block_size: usize,
    pub peer_address: String,
    pub peer_port: u16,
    /// Pause between opening the device and the first read
    pub settle_delay_ms: u64,
    pub progress_accounting: ProgressAccounting,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            duration_seconds: 20,
            block_size: 1024,
            peer_address: "127.0.0.1".to_string(),
            peer_port: 12345,
            settle_delay_ms: 100,
            progress_accounting: ProgressAccounting::Delivered,
        }
    }
}

impl StreamSettings {
    /// Mono bytes to send before stopping.
    pub fn target_bytes(&self) -> u64 {
        u64::from(self.sample_rate) * MONO_SAMPLE_BYTES as u64 * u64::from(self.duration_seconds)
    }

    /// Mono bytes in one second of audio.
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate) * MONO_SAMPLE_BYTES as u64
    }

    pub fn peer(&self) -> Result<SocketAddr, SettingsError> {
        let peer_err = |reason: String| SettingsError::Peer {
            addr: self.peer_address.clone(),
            port: self.peer_port,
            reason,
        };
        // Obviously malformed hosts never reach the resolver.
        if self.peer_address.is_empty() || self.peer_address.contains(char::is_whitespace) {
            return Err(peer_err("not a host name or IP address".to_string()));
        }
        (self.peer_address.as_str(), self.peer_port)
            .to_socket_addrs()
            .map_err(|e| peer_err(e.to_string()))?
            .next()
            .ok_or_else(|| peer_err("no addresses".to_string()))
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.sample_rate == 0 {
            return Err(SettingsError::ZeroSampleRate);
        }
        if self.duration_seconds == 0 {
            return Err(SettingsError::ZeroDuration);
        }
        if self.block_size == 0 || self.block_size % STEREO_FRAME_BYTES != 0 {
            return Err(SettingsError::BlockSize(self.block_size));
        }
        self.peer().map(|_| ())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub device: String,
    /// Replay a raw S16LE stereo file instead of opening the device
    pub input_file: Option<PathBuf>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            input_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub device: String,
    /// Raw interleaved S16LE PCM to play
    pub file: PathBuf,
    pub sample_rate: u32,
    pub channels: u32,
    pub pause_ms: u64,
    /// Number of passes over the file; unset plays until interrupted
    pub passes: Option<u32>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            file: PathBuf::from("canon.pcm"),
            sample_rate: 48000,
            channels: 2,
            pause_ms: 1000,
            passes: None,
        }
    }
}

impl PlaybackSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.sample_rate == 0 {
            return Err(SettingsError::ZeroSampleRate);
        }
        if !(1..=2).contains(&self.channels) {
            return Err(SettingsError::PlaybackChannels(self.channels));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReceiverSettings {
    pub bind: String,
    /// WAV file the received mono stream is written to
    pub output: PathBuf,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:12345".to_string(),
            output: PathBuf::from("received.wav"),
        }
    }
}

impl Settings {
    /// Load defaults, then the config file, then environment overrides.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(p) => ::config::File::from(p).required(true),
            None => ::config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = ::config::Config::builder()
            .add_source(file)
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize::<Settings>()
            .context("Invalid configuration")?;

        Ok(settings)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}
