//! Roomcast: paced video publishing from a file, capture device or test pattern

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use roomcast::capture::{self, CaptureDriver, CaptureSettings};
use roomcast::pipeline::{PacingBuffer, Shutdown};
use roomcast::publish::{FrameSink, LogSink, PublishDriver};
use roomcast::{Config, SinkKind, SourceKind};

#[derive(Parser, Debug)]
#[command(version, about = "Publish paced video frames to a real-time sink")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "ROOMCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source: synthetic, file or device
    #[arg(long, value_parser = parse_source)]
    source: Option<SourceKind>,

    /// Video file or device path
    #[arg(long)]
    uri: Option<String>,

    /// Sink: log or gstreamer
    #[arg(long, value_parser = parse_sink)]
    sink: Option<SinkKind>,
}

fn parse_source(s: &str) -> Result<SourceKind, String> {
    match s {
        "synthetic" => Ok(SourceKind::Synthetic),
        "file" => Ok(SourceKind::File),
        "device" => Ok(SourceKind::Device),
        other => Err(format!("unknown source '{other}'")),
    }
}

fn parse_sink(s: &str) -> Result<SinkKind, String> {
    match s {
        "log" => Ok(SinkKind::Log),
        "gstreamer" => Ok(SinkKind::Gstreamer),
        other => Err(format!("unknown sink '{other}'")),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    let args = Args::parse();
    info!("Roomcast launching...");

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(source) = args.source {
        config.capture.source = source;
    }
    if let Some(uri) = args.uri {
        config.capture.uri = uri;
    }
    if let Some(sink) = args.sink {
        config.publish.sink = sink;
    }
    config.validate()?;
    info!("Configuration: {:?}", config);

    let buffer = Arc::new(PacingBuffer::new(config.pipeline.buffer_capacity)?);
    let shutdown = Shutdown::new();

    // Opening can block (file preroll, device negotiation); nothing else is running yet
    let source = capture::open_source(&config.capture)?;
    let driver = CaptureDriver::new(
        source,
        Arc::clone(&buffer),
        shutdown.listener(),
        CaptureSettings::from(&config.capture),
    );
    let framerate = driver.framerate();

    let sink = open_sink(&config)?;
    let publisher = tokio::spawn(
        PublishDriver::new(Arc::clone(&buffer), sink, framerate, shutdown.listener()).run(),
    );

    let capture = driver.spawn()?;
    let mut capture_done = tokio::task::spawn_blocking(move || capture.join());

    let capture_result = tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            info!("Shutdown signal received");
            shutdown.trigger();
            capture_done.await?
        }
        result = &mut capture_done => {
            let result = result?;
            // Let the publisher drain what is left before stopping it
            tokio::select! {
                _ = drain(&buffer, &publisher) => {}
                _ = shutdown_signal() => info!("Shutdown signal received while draining"),
            }
            shutdown.trigger();
            result
        }
    };

    let report = publisher.await?;
    let stats = buffer.stats();
    info!(
        published = report.frames_published,
        empty_cycles = report.empty_cycles,
        sink_errors = report.sink_errors,
        pushed = stats.pushed,
        evicted = stats.evicted,
        "Roomcast shutting down"
    );

    match capture_result {
        Ok(capture) => {
            info!("Capture ended: {:?} after {} frames", capture.end, capture.frames_captured);
            Ok(())
        }
        Err(e) => {
            error!("Capture failed: {}", e);
            Err(e.into())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roomcast=info"));

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::prelude::*;
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()))
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }

    #[cfg(not(feature = "profiling"))]
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

fn open_sink(config: &Config) -> Result<Box<dyn FrameSink>> {
    match config.publish.sink {
        SinkKind::Log => Ok(Box::new(LogSink::new())),
        SinkKind::Gstreamer => {
            #[cfg(feature = "gstreamer-pipeline")]
            {
                let sink = roomcast::publish::GstSink::new(
                    &config.publish,
                    config.capture.width,
                    config.capture.height,
                )?;
                Ok(Box::new(sink))
            }
            #[cfg(not(feature = "gstreamer-pipeline"))]
            {
                Err(eyre!("the gstreamer sink requires the gstreamer-pipeline feature"))
            }
        }
    }
}

/// Wait until the buffer is empty or the publisher has already exited.
async fn drain<T>(buffer: &PacingBuffer, publisher: &tokio::task::JoinHandle<T>) {
    while !buffer.is_empty() && !publisher.is_finished() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    if !buffer.is_empty() {
        warn!("Publisher exited with {} frames undelivered", buffer.len());
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
