mod audio;
mod cli;
mod receiver;
mod settings;
mod stream;
mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use audio::{AlsaSource, AudioSource, RawFileSource, play};
use cli::Command;
use receiver::Receiver;
use settings::{ProgressAccounting, Settings};
use stream::StreamPlan;
use transport::UdpSink;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    cli::init_logging(&args);

    let mut settings = Settings::load(args.config.as_deref())?;

    match &args.command {
        Command::Stream(a) => {
            a.apply(&mut settings)?;
            run_stream(settings).await
        }
        Command::Play(a) => {
            a.apply(&mut settings);
            run_play(settings).await
        }
        Command::Receive(a) => {
            a.apply(&mut settings);
            run_receive(settings).await
        }
        Command::ShowConfig => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

/// Run blocking audio work on a dedicated named OS thread and wait for it.
async fn run_on_audio_thread<T, F>(name: &str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let _ = tx.send(work());
        })
        .with_context(|| format!("Failed to spawn {} thread", name))?;

    rx.await
        .with_context(|| format!("{} thread exited without a result", name))?
}

async fn run_stream(settings: Settings) -> Result<()> {
    settings.stream.validate()?;
    let peer = settings.stream.peer()?;
    if settings.stream.progress_accounting == ProgressAccounting::Attempted {
        log::warn!("Failed sends count toward the target; the recording may come up short");
    }

    // Capture blocks the calling thread; keep it off the async workers.
    let report = run_on_audio_thread("audio-stream", move || -> Result<stream::StreamReport> {
        let mut source: Box<dyn AudioSource> = match &settings.capture.input_file {
            Some(path) => Box::new(RawFileSource::open(path)?),
            None => Box::new(AlsaSource::open(
                &settings.capture.device,
                settings.stream.sample_rate,
                settings.stream.block_size,
            )?),
        };
        let sink = UdpSink::connect(peer)
            .with_context(|| format!("Failed to open UDP transport to {}", peer))?;
        let plan = StreamPlan::from_settings(&settings.stream);

        stream::run(&mut source, sink, &plan).context("Audio capture failed")
    })
    .await?;

    if !report.sentinel_sent {
        log::warn!("Peer {} never got the end-of-stream marker", peer);
    }
    Ok(())
}

async fn run_play(settings: Settings) -> Result<()> {
    settings.playback.validate()?;
    let running = Arc::new(AtomicBool::new(true));

    let stopper = {
        let running = running.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                log::info!("Received Ctrl+C, stopping playback...");
                running.store(false, Ordering::SeqCst);
            }
        })
    };

    let playback = settings.playback;
    let worker_flag = running.clone();
    let report =
        run_on_audio_thread("audio-play", move || play::play_file(&playback, &worker_flag)).await?;
    stopper.abort();

    log::info!(
        "{} passes, {} failed, {} bytes written",
        report.passes,
        report.failed_passes,
        report.bytes_written
    );
    Ok(())
}

async fn run_receive(settings: Settings) -> Result<()> {
    if settings.stream.sample_rate == 0 {
        anyhow::bail!("stream.sample_rate must be greater than zero");
    }
    let receiver = Receiver::bind(&settings.receiver.bind).await?;
    let summary = receiver
        .receive_to_wav(&settings.receiver.output, settings.stream.sample_rate, async {
            let _ = signal::ctrl_c().await;
        })
        .await?;

    if !summary.completed {
        log::warn!("{} is incomplete", summary.output.display());
    }
    Ok(())
}
