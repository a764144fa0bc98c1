//! audit-streamd - real-time audit event streaming daemon
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (subscribers on 127.0.0.1:8765, producers on 127.0.0.1:8766)
//! audit-streamd
//! audit-streamd --config configs/streamd.toml --log-level debug
//! ```

mod server;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use audit_config::{Config, LogConfig, LogFormat, LogOutput};
use audit_stream::AuditStreamer;

/// audit-streamd - real-time audit event streaming daemon
#[derive(Parser, Debug)]
#[command(name = "audit-streamd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    init_logging(&config.log, cli.log_level.as_deref())?;
    run(config).await
}

/// Initialize the tracing subscriber from the `[log]` section
fn init_logging(config: &LogConfig, level_override: Option<&str>) -> Result<()> {
    let directive = config.filter_directive(level_override);
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| anyhow::anyhow!("invalid log filter '{}': {}", directive, e))?;

    let (writer, ansi) = match &config.output {
        LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
        LogOutput::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
    };

    let layer = match config.format {
        LogFormat::Console => fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    Ok(())
}

/// Start the streamer and both listeners, then wait for Ctrl-C
async fn run(config: Config) -> Result<()> {
    let streamer = Arc::new(AuditStreamer::new(config.streamer.clone()));
    streamer.start()?;

    let subscribers = TcpListener::bind(&config.server.subscriber_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.subscriber_address))?;
    let ingest = TcpListener::bind(&config.server.ingest_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.ingest_address))?;

    let cancel = CancellationToken::new();
    let max_frame_size = config.server.max_frame_size;
    let listeners = [
        tokio::spawn(server::run_subscriber_listener(
            subscribers,
            Arc::clone(&streamer),
            max_frame_size,
            cancel.clone(),
        )),
        tokio::spawn(server::run_ingest_listener(
            ingest,
            Arc::clone(&streamer),
            max_frame_size,
            cancel.clone(),
        )),
    ];

    info!(
        subscribers = %config.server.subscriber_address,
        ingest = %config.server.ingest_address,
        "audit-streamd ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    cancel.cancel();
    for listener in listeners {
        let _ = listener.await;
    }
    streamer.stop().await;

    let metrics = streamer.metrics();
    info!(
        events_streamed = metrics.events_streamed,
        messages_sent = metrics.messages_sent,
        peak_connections = metrics.peak_connections,
        "audit-streamd stopped"
    );
    Ok(())
}
