use anyhow::{Context, Result, bail};
use bytes::Bytes;
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use worksafe_lib::packet::{Packet, PacketType};
use worksafe_lib::payload::{ECG_SCHEMA, FALL_EVENT_SCHEMA, REALTIME_SCHEMA};
use worksafe_lib::schema::{Endian, FieldKind, Schema};
use worksafe_lib::serial::{SerialDecoder, SerialEvent, TimeSync};

/// Inspect worker safety monitor traffic: radio packets, serial frames and payload layouts.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a radio packet (13-byte header + payload).
    Packet {
        hex: String,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Decode a captured serial stream between relay and host.
    Serial { hex: String },
    /// Print the byte layout of a payload type.
    Schema {
        #[arg(value_enum)]
        kind: SchemaKind,
    },
    /// Print the time sync message for a local time (default: now).
    TimeSync {
        /// e.g. 2025-03-14T09:30:00
        #[arg(long)]
        at: Option<NaiveDateTime>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SchemaKind {
    Realtime,
    Ecg,
    FallEvent,
}

impl SchemaKind {
    fn schema(self) -> &'static Schema {
        match self {
            SchemaKind::Realtime => &REALTIME_SCHEMA,
            SchemaKind::Ecg => &ECG_SCHEMA,
            SchemaKind::FallEvent => &FALL_EVENT_SCHEMA,
        }
    }
}

fn main() -> Result<()> {
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

    match cli.command {
        Command::Packet { hex, json } => inspect_packet(&parse_hex(&hex)?, json),
        Command::Serial { hex } => inspect_serial(&parse_hex(&hex)?),
        Command::Schema { kind } => {
            print_schema(kind.schema());
            Ok(())
        }
        Command::TimeSync { at } => {
            let at = at.unwrap_or_else(|| chrono::Local::now().naive_local());
            let sync = TimeSync::from_datetime(&at);
            println!("{}  {}", hex::encode(sync.encode()), sync);
            Ok(())
        }
    }
}

fn inspect_packet(data: &[u8], json: bool) -> Result<()> {
    debug!(len = data.len(), "Decoding radio packet");
    let packet = Packet::try_from(Bytes::copy_from_slice(data)).context("Invalid radio header")?;
    let payload = packet
        .decode_payload()
        .with_context(|| format!("Invalid {} payload", packet.packet_type))?;

    if json {
        let value = serde_json::json!({
            "device_id": packet.device_id.to_string(),
            "frame_counter": packet.frame_counter,
            "packet_type": packet.packet_type,
            "payload": payload,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Device:        {}", packet.device_id);
    println!("Frame counter: {}", packet.frame_counter);
    println!(
        "Type:          {} ({} byte payload)",
        packet.packet_type,
        packet.packet_type.payload_size()
    );
    println!("{}", serde_json::to_string_pretty(&payload)?);
    if let Some(alerts) = payload.alerts().filter(|a| a.any()) {
        let names: Vec<String> = alerts.categories().iter().map(|c| c.to_string()).collect();
        println!("Alerts:        {}", names.join(", "));
    }
    Ok(())
}

fn inspect_serial(data: &[u8]) -> Result<()> {
    let mut decoder = SerialDecoder::new();
    decoder.push(data);

    let mut events = 0;
    for event in decoder.by_ref() {
        events += 1;
        match event {
            SerialEvent::Frame(frame) => {
                println!(
                    "Frame: {} bytes, RSSI {} dBm, SNR {} dB",
                    frame.payload().len(),
                    frame.rssi(),
                    frame.snr()
                );
                match Packet::try_from(frame.payload().clone()) {
                    Ok(packet) => println!(
                        "  {} #{} from {}",
                        packet.packet_type, packet.frame_counter, packet.device_id
                    ),
                    Err(e) => println!("  not a radio packet: {}", e),
                }
            }
            SerialEvent::TimeSync(sync) => println!("Time sync: {}", sync),
        }
    }

    println!(
        "{} event(s), {} byte(s) skipped, {} framing error(s), {} byte(s) incomplete",
        events,
        decoder.skipped_bytes(),
        decoder.frame_errors(),
        decoder.buffered()
    );
    if events == 0 {
        bail!("No complete frames in input");
    }
    Ok(())
}

fn print_schema(schema: &Schema) {
    let packet_type = match schema.name {
        "realtime" => Some(PacketType::Realtime),
        "ecg" => Some(PacketType::Ecg),
        "fall_event" => Some(PacketType::FallEvent),
        _ => None,
    };
    match packet_type {
        Some(t) => println!("{} payload, type byte {:#04x}, {} bytes", t, u8::from(t), schema.size),
        None => println!("{} payload, {} bytes", schema.name, schema.size),
    }
    println!("{:<8}{:<20}{:<8}type", "offset", "field", "size");
    for field in schema.fields {
        let kind = match field.kind {
            FieldKind::U8 => "u8".to_string(),
            FieldKind::I8 => "i8".to_string(),
            FieldKind::U16(e) => format!("u16 {}", endian(e)),
            FieldKind::I16(e) => format!("i16 {}", endian(e)),
            FieldKind::U32(e) => format!("u32 {}", endian(e)),
            FieldKind::F32(e) => format!("f32 {}", endian(e)),
            FieldKind::Bytes(_) => "bytes".to_string(),
        };
        println!("{:<8}{:<20}{:<8}{}", field.offset, field.name, field.kind.width(), kind);
    }
}

fn endian(e: Endian) -> &'static str {
    match e {
        Endian::Little => "LE",
        Endian::Big => "BE",
    }
}

/// Accepts plain hex, or hex with spaces, colons and a 0x prefix.
fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&cleaned).with_context(|| format!("Not a hex string: {:?}", input))
}
