use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::signal;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use worksafe_rs::Gateway;
use worksafe_lib::ingest::INGEST_PATH;

/// Gateway host for the worker safety monitor. Reads the relay's serial stream
/// and writes one ingest record per received packet as a JSON line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial device or capture file to read from, `-` for stdin.
    /// The line must already be configured (e.g. `stty -F /dev/ttyUSB0 115200 raw`).
    #[arg(default_value = "-")]
    input: String,
    /// Write records here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Send a time sync to the relay after every packet. Needs a writable device.
    #[arg(short, long)]
    time_sync: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn setup_logging(
    log_file_path: Option<PathBuf>,
    verbosity: &Verbosity<InfoLevel>,
) -> Result<Option<WorkerGuard>> {
    // stdout carries the records
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path)
            .with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    tokio::select! {
        res = run(cli) => {
            if let Err(e) = res {
                error!("Gateway failed: {:?}", e);
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down gracefully.");
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let records: Box<dyn AsyncWrite + Unpin + Send> = match &cli.output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create {:?}", path))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };
    let mut gateway = Gateway::new(records);
    info!("Writing records for the {} endpoint", INGEST_PATH);

    let (mut serial, mut reply): (
        Box<dyn AsyncRead + Unpin + Send>,
        Option<tokio::fs::File>,
    ) = if cli.input == "-" {
        info!("Reading relay stream from stdin");
        (Box::new(tokio::io::stdin()), None)
    } else {
        let device = tokio::fs::OpenOptions::new()
            .read(true)
            .write(cli.time_sync)
            .open(&cli.input)
            .await
            .with_context(|| format!("Failed to open serial input {}", cli.input))?;
        let reply = if cli.time_sync {
            Some(device.try_clone().await.context("Failed to clone serial handle")?)
        } else {
            None
        };
        info!("Reading relay stream from {}", cli.input);
        (Box::new(device), reply)
    };
    if cli.time_sync && reply.is_none() {
        info!("Time sync needs a serial device, not stdin; disabled");
    }

    let stats = gateway
        .run(&mut serial, reply.as_mut(), || {
            chrono::Local::now().naive_local()
        })
        .await?;
    info!(
        "Done: {} records, {} time syncs sent",
        stats.records_written, stats.time_syncs_sent
    );
    Ok(())
}
