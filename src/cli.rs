//! Command-line interface: argument parsing, settings overrides and logging setup.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::settings::{ProgressAccounting, Settings};

/// Stream a stereo capture device to a UDP peer as mono 16-bit PCM
#[derive(Parser, Debug)]
#[command(name = "mic-udp-stream")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to ./config.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture, downmix and send audio to the peer, then send the end marker
    Stream(StreamArgs),
    /// Play a raw PCM file on the playback device in a loop
    Play(PlayArgs),
    /// Receive a stream and write it to a WAV file
    Receive(ReceiveArgs),
    /// Print the effective configuration as TOML
    ShowConfig,
}

#[derive(clap::Args, Debug, Default)]
pub struct StreamArgs {
    /// Peer as HOST:PORT
    #[arg(long)]
    pub peer: Option<String>,

    /// Seconds of audio to send
    #[arg(short, long)]
    pub duration: Option<u32>,

    /// Capture sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// ALSA capture device
    #[arg(long)]
    pub device: Option<String>,

    /// Replay a raw S16LE stereo file instead of capturing
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Count blocks toward the target even when their send failed
    #[arg(long)]
    pub count_failed_sends: bool,
}

#[derive(clap::Args, Debug, Default)]
pub struct PlayArgs {
    /// Raw interleaved S16LE file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// ALSA playback device
    #[arg(long)]
    pub device: Option<String>,

    /// Stop after this many passes
    #[arg(short, long)]
    pub passes: Option<u32>,

    /// Pause between passes in milliseconds
    #[arg(long)]
    pub pause_ms: Option<u64>,
}

#[derive(clap::Args, Debug, Default)]
pub struct ReceiveArgs {
    /// Local address to listen on
    #[arg(short, long)]
    pub bind: Option<String>,

    /// WAV file to write
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Sample rate recorded in the WAV header
    #[arg(long)]
    pub sample_rate: Option<u32>,
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

impl StreamArgs {
    pub fn apply(&self, settings: &mut Settings) -> anyhow::Result<()> {
        if let Some(peer) = &self.peer {
            let (host, port) = split_host_port(peer)?;
            settings.stream.peer_address = host;
            settings.stream.peer_port = port;
        }
        if let Some(d) = self.duration {
            settings.stream.duration_seconds = d;
        }
        if let Some(rate) = self.sample_rate {
            settings.stream.sample_rate = rate;
        }
        if let Some(device) = &self.device {
            settings.capture.device = device.clone();
        }
        if let Some(input) = &self.input {
            settings.capture.input_file = Some(input.clone());
        }
        if self.count_failed_sends {
            settings.stream.progress_accounting = ProgressAccounting::Attempted;
        }
        Ok(())
    }
}

impl PlayArgs {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(file) = &self.file {
            settings.playback.file = file.clone();
        }
        if let Some(device) = &self.device {
            settings.playback.device = device.clone();
        }
        if self.passes.is_some() {
            settings.playback.passes = self.passes;
        }
        if let Some(ms) = self.pause_ms {
            settings.playback.pause_ms = ms;
        }
    }
}

impl ReceiveArgs {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(bind) = &self.bind {
            settings.receiver.bind = bind.clone();
        }
        if let Some(output) = &self.output {
            settings.receiver.output = output.clone();
        }
        if let Some(rate) = self.sample_rate {
            settings.stream.sample_rate = rate;
        }
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts (`[::1]:9000`).
fn split_host_port(s: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = s
        .rsplit_once(':')
        .with_context(|| format!("peer '{}' is not HOST:PORT", s))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid port in peer '{}'", s))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        anyhow::bail!("peer '{}' has an empty host", s);
    }
    Ok((host.to_string(), port))
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Keep dependencies quiet unless RUST_LOG asks otherwise
    builder.filter_level(LevelFilter::Warn);
    builder.filter_module("mic_udp_stream", args.log_level());
    builder.parse_default_env();

    builder.format_timestamp_millis().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_parsing() {
        assert_eq!(
            split_host_port("172.24.7.86:12345").unwrap(),
            ("172.24.7.86".to_string(), 12345)
        );
        assert_eq!(split_host_port("[::1]:9000").unwrap(), ("::1".to_string(), 9000));
        assert!(split_host_port("localhost").is_err());
        assert!(split_host_port("host:99999").is_err());
        assert!(split_host_port(":80").is_err());
    }

    #[test]
    fn stream_flags_override_settings() {
        let args = Args::try_parse_from([
            "mic-udp-stream",
            "stream",
            "--peer",
            "10.0.0.2:5000",
            "-d",
            "3",
            "--count-failed-sends",
        ])
        .unwrap();

        let mut settings = Settings::default();
        match &args.command {
            Command::Stream(s) => s.apply(&mut settings).unwrap(),
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(settings.stream.peer_address, "10.0.0.2");
        assert_eq!(settings.stream.peer_port, 5000);
        assert_eq!(settings.stream.duration_seconds, 3);
        assert_eq!(settings.stream.sample_rate, 48000);
        assert_eq!(settings.stream.progress_accounting, ProgressAccounting::Attempted);
    }

    #[test]
    fn verbosity_levels() {
        let quiet = Args::try_parse_from(["mic-udp-stream", "-q", "show-config"]).unwrap();
        assert_eq!(quiet.log_level(), LevelFilter::Error);
        let loud = Args::try_parse_from(["mic-udp-stream", "show-config", "-vv"]).unwrap();
        assert_eq!(loud.log_level(), LevelFilter::Trace);
    }

    #[test]
    fn receive_and_play_flags() {
        let mut settings = Settings::default();
        ReceiveArgs {
            bind: Some("127.0.0.1:7000".into()),
            output: Some("out.wav".into()),
            sample_rate: Some(16000),
        }
        .apply(&mut settings);
        PlayArgs {
            passes: Some(2),
            ..Default::default()
        }
        .apply(&mut settings);

        assert_eq!(settings.receiver.bind, "127.0.0.1:7000");
        assert_eq!(settings.receiver.output, PathBuf::from("out.wav"));
        assert_eq!(settings.stream.sample_rate, 16000);
        assert_eq!(settings.playback.passes, Some(2));
        assert_eq!(settings.playback.file, PathBuf::from("canon.pcm"));
    }
}
