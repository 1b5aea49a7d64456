use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use worksafe_lib::clock::SystemClock;
use worksafe_lib::config::{
    DetectorConfig, RadioConfig, SensitivityProfile, TelemetrySchedule, VitalThresholds, load_json,
};
use worksafe_lib::constants::GRAVITY;
use worksafe_lib::fusion::SensorSample;
use worksafe_lib::host::HostReceiver;
use worksafe_lib::packet::DeviceId;
use worksafe_lib::radio::{MemoryRadio, RadioTx};
use worksafe_lib::relay::{Relay, RelayOptions};
use worksafe_lib::serial::TimeSync;
use worksafe_lib::vitals::Environment;
use worksafe_lib::wearable::Wearable;

const TICK_MS: u64 = 20;
const ECG_PERIOD_MS: u64 = 10;

/// Run a wearable, a relay and the gateway host in memory and print the ingest records.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// CSV of motion samples (timestamp_ms, accel_x..z in m/s², gyro_x..z in °/s).
    /// Without it a built-in fall scenario is played.
    #[arg(short, long)]
    motion: Option<PathBuf>,
    /// Detector config JSON; missing fields use the device defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Sensitivity preset applied on top of the config.
    #[arg(short, long, value_enum)]
    profile: Option<Profile>,
    #[arg(long, default_value = "WS-SIM-01")]
    device_id: String,
    /// Simulated heart rate for the synthetic ECG, 0 for leads off.
    #[arg(long, default_value_t = 72)]
    heart_rate: u16,
    #[arg(long, default_value_t = 36.7)]
    body_temp: f32,
    #[arg(long, default_value_t = 65.0)]
    noise_db: f32,
    /// Replay at wall-clock speed instead of as fast as possible.
    #[arg(long)]
    pace: bool,
    /// Write ingest records (JSON lines) here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Profile {
    Conservative,
    Balanced,
    Sensitive,
}

impl From<Profile> for SensitivityProfile {
    fn from(p: Profile) -> Self {
        match p {
            Profile::Conservative => SensitivityProfile::Conservative,
            Profile::Balanced => SensitivityProfile::Balanced,
            Profile::Sensitive => SensitivityProfile::Sensitive,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::builder()
        .with_default_directive(cli.verbose.tracing_level_filter().into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .init();

    tokio::select! {
        res = run(cli) => {
            if let Err(e) = res {
                error!("Simulation failed: {:?}", e);
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl+C received, stopping simulation.");
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut detector = match &cli.config {
        Some(path) => load_json::<DetectorConfig>(path)
            .with_context(|| format!("Failed to load detector config {:?}", path))?,
        None => DetectorConfig::default(),
    };
    if let Some(profile) = cli.profile {
        detector.apply_profile(profile.into());
        info!("Sensitivity profile: {}", SensitivityProfile::from(profile));
    }
    detector.validate()?;

    let samples = match &cli.motion {
        Some(path) => read_motion(path)?,
        None => fall_scenario(),
    };
    info!("Playing {} motion samples", samples.len());

    let radio_config = RadioConfig::default();
    let air = MemoryRadio::new().with_signal(-78, 8.5);
    let tx = RadioTx::init(air.clone(), &radio_config, DeviceId::from_name(&cli.device_id))?;
    let mut wearable = Wearable::new(
        tx,
        detector,
        TelemetrySchedule::default(),
        VitalThresholds::default(),
    );
    let mut relay = Relay::init(
        air,
        &radio_config,
        Vec::new(),
        SystemClock::new(),
        RelayOptions::default(),
    )?;
    let mut host = HostReceiver::new();

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        ),
        None => Box::new(std::io::stdout()),
    };

    let env = Environment {
        body_temp_c: Some(cli.body_temp),
        ambient_temp_c: Some(24.0),
        noise_db: cli.noise_db,
    };
    let mut ecg_ms = samples.first().map_or(0, |s| s.timestamp_ms);
    let mut previous_ms = None;

    for sample in &samples {
        while ecg_ms <= sample.timestamp_ms {
            wearable.push_ecg(synthetic_ecg(cli.heart_rate, ecg_ms), ecg_ms);
            ecg_ms += ECG_PERIOD_MS;
        }

        if cli.pace {
            if let Some(prev) = previous_ms {
                let wait = sample.timestamp_ms.saturating_sub(prev);
                tokio::time::sleep(Duration::from_millis(wait)).await;
            }
            previous_ms = Some(sample.timestamp_ms);
        }

        let report = wearable.step(sample, env);
        for failed in &report.failed {
            warn!("{} packet was not sent", failed);
        }

        while relay.poll()?.is_some() {}
        host.push(&std::mem::take(relay.serial_mut()));

        while let Some(frame) = host.next_frame() {
            let now = chrono::Local::now().naive_local();
            writeln!(out, "{}", frame.to_record(now).to_json()?)?;
            relay.handle_host_input(&TimeSync::from_datetime(&now).encode());
        }
    }
    out.flush()?;

    let relay_stats = relay.stats();
    let host_stats = host.stats();
    info!(
        "Final state {}, relay received {} (repeats {}, skipped {}), host decoded {}",
        wearable.detector().state(),
        relay_stats.received,
        relay_stats.repeats,
        relay_stats.skipped,
        host_stats.packets_received
    );
    if let Some(wall) = relay.wall_time() {
        info!("Relay clock synced to {}", wall);
    }
    Ok(())
}

fn read_motion(path: &Path) -> Result<Vec<SensorSample>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut samples = Vec::new();
    for (row, record) in reader.deserialize().enumerate() {
        let sample: SensorSample =
            record.with_context(|| format!("Bad motion sample on row {}", row + 1))?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Flat trace with one R spike per beat.
fn synthetic_ecg(bpm: u16, t_ms: u64) -> Option<u16> {
    if bpm == 0 {
        return None;
    }
    let period = 60_000 / bpm as u64;
    Some(if t_ms % period < ECG_PERIOD_MS { 3000 } else { 2048 })
}

/// Standing, a fall with rotation, lying still, then getting up.
fn fall_scenario() -> Vec<SensorSample> {
    let phases: [(u64, [f32; 3], [f32; 3]); 6] = [
        (3000, [0.0, 0.0, GRAVITY], [0.0; 3]),
        (200, [0.0, 0.0, 0.2 * GRAVITY], [0.0; 3]),
        (20, [0.0, 0.0, 2.6 * GRAVITY], [160.0, 0.0, 0.0]),
        (300, [0.0, GRAVITY, 0.5], [160.0, 0.0, 0.0]),
        (8000, [0.0, GRAVITY, 0.5], [0.0; 3]),
        (7000, [0.0, 0.0, GRAVITY], [0.0; 3]),
    ];
    let mut samples = Vec::new();
    let mut t = 0;
    for (duration, accel, gyro) in phases {
        for _ in 0..duration / TICK_MS {
            samples.push(SensorSample::new(t, accel, gyro));
            t += TICK_MS;
        }
    }
    samples
}
