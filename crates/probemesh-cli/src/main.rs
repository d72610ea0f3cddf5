//! Probe Mesh Command-Line Interface
//!
//! This CLI provides tools for:
//! - Decoding captured frames, advertisements and status notifications
//! - Computing frame CRCs
//! - Printing and validating engine configuration
//! - Running the engine against a simulated mesh of probes and repeaters

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use probemesh_core::sim::{SimulatedNetwork, SimulatedProbe, SimulatedRepeater};
use probemesh_core::wire::{
    crc16_ccitt, decode_advertisement, decode_status, Frame, FrameFormat, FrameKind, Inbound,
    MessageClass, Request,
};
use probemesh_core::{
    runtime, ChannelTransport, Engine, EngineConfig, EngineEvent, EngineHandle, LinkId,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

/// Serial numbers handed to simulated probes start here
const SIM_SERIAL_BASE: u32 = 0x1000_0001;

/// Simulated repeaters get link ids from here up
const SIM_REPEATER_LINK_BASE: u64 = 100;

#[derive(Parser)]
#[command(name = "probemesh")]
#[command(author, version, about = "Probe mesh protocol engine CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one hex-encoded frame
    DecodeFrame {
        /// Frame bytes as hex (spaces allowed)
        hex: String,

        /// Layout to expect
        #[arg(short, long, value_enum, default_value = "mesh")]
        format: FormatArg,
    },

    /// Decode advertisement manufacturer data (vendor id stripped)
    DecodeAdv {
        /// Advertisement bytes as hex
        hex: String,
    },

    /// Decode a status notification
    DecodeStatus {
        /// Status bytes as hex
        hex: String,
    },

    /// Compute the CRC-16/CCITT of hex input
    Crc {
        /// Bytes as hex
        hex: String,
    },

    /// Print the effective configuration as JSON
    Config,

    /// Run the engine against a simulated mesh
    Simulate {
        /// Number of probes
        #[arg(long, default_value = "1")]
        probes: u32,

        /// Probes (from the first) that also get a direct link
        #[arg(long, default_value = "1")]
        direct: u32,

        /// Number of repeaters
        #[arg(long, default_value = "2")]
        repeaters: u32,

        /// Frame loss probability per repeater (0.0-1.0)
        #[arg(long, default_value = "0.1")]
        loss: f64,

        /// Records already logged by each probe
        #[arg(long, default_value = "100")]
        history: u32,

        /// Probe sample period in milliseconds
        #[arg(long, default_value = "250")]
        interval_ms: u16,

        /// Run time in seconds
        #[arg(short, long, default_value = "20")]
        duration: u64,

        /// Drop all direct links after this many seconds
        #[arg(long)]
        drop_direct_after: Option<u64>,

        /// RNG seed for repeater loss
        #[arg(long, default_value = "1")]
        seed: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    /// Controller to probe over a direct link
    DirectRequest,
    /// Probe to controller over a direct link
    DirectResponse,
    /// Anything through a repeater
    Mesh,
}

impl From<FormatArg> for FrameFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::DirectRequest => FrameFormat::DirectRequest,
            FormatArg::DirectResponse => FrameFormat::DirectResponse,
            FormatArg::Mesh => FrameFormat::Mesh,
        }
    }
}

/// Settings for the `simulate` command
struct SimulationParams {
    probes: u32,
    direct: u32,
    repeaters: u32,
    loss: f64,
    history: u32,
    interval_ms: u16,
    duration: u64,
    drop_direct_after: Option<u64>,
    seed: u64,
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let cleaned = cleaned.trim_start_matches("0x");
    hex::decode(cleaned).with_context(|| format!("invalid hex input: {}", input))
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn cmd_decode_frame(input: String, format: FormatArg) -> Result<()> {
    let bytes = parse_hex(&input)?;
    let format = FrameFormat::from(format);
    let Some(frame) = Frame::from_bytes(&bytes, format) else {
        bail!("not a valid {:?} frame (sync, length or CRC mismatch)", format);
    };

    let class = MessageClass::from_byte(frame.message_type);
    println!("=== Frame ===");
    println!();
    match class {
        Some(class) => println!("  Type:        0x{:02x} ({:?})", frame.message_type, class),
        None => println!("  Type:        0x{:02x} (unknown)", frame.message_type),
    }
    match frame.kind {
        FrameKind::DirectRequest => println!("  Kind:        direct request"),
        FrameKind::DirectResponse { success } => {
            println!("  Kind:        direct response");
            println!("  Success:     {}", success);
        }
        FrameKind::MeshRequest { request_id } => {
            println!("  Kind:        mesh request");
            println!("  Request id:  {}", request_id);
        }
        FrameKind::MeshResponse {
            request_id,
            response_to,
            success,
        } => {
            println!("  Kind:        mesh response");
            println!("  Request id:  {}", request_id);
            println!("  Answering:   {}", response_to);
            println!("  Success:     {}", success);
        }
    }
    println!("  Payload:     {} bytes", frame.payload.len());
    println!("  Hex:         {}", hex::encode(&frame.payload));
    println!();

    let Some(class) = class else {
        return Ok(());
    };
    match frame.kind {
        FrameKind::DirectRequest => match Request::decode(class, &frame.payload) {
            Some(request) => println!("Request: {:?}", request),
            None => warn!("payload does not decode as {:?}", class),
        },
        FrameKind::MeshRequest { .. } if !class.is_unsolicited() => {
            let serial = frame.payload.get(..4).map(|s| {
                u32::from_le_bytes([s[0], s[1], s[2], s[3]])
            });
            let request = frame
                .payload
                .get(4..)
                .and_then(|payload| Request::decode(class, payload));
            match (serial, request) {
                (Some(serial), Some(request)) => {
                    println!("Request to {:08x}: {:?}", serial, request)
                }
                _ => warn!("payload does not decode as {:?}", class),
            }
        }
        _ => match Inbound::from_frame(&frame) {
            Some(Inbound::ProbeStatus {
                serial,
                hop_count,
                telemetry,
            }) => {
                println!("Status from {:08x} at hop {}", serial, hop_count);
                print_json(&telemetry)?;
            }
            Some(Inbound::Heartbeat { serials }) => {
                let list: Vec<String> = serials.iter().map(|s| format!("{:08x}", s)).collect();
                println!("Heartbeat: {}", list.join(", "));
            }
            Some(Inbound::Reply {
                serial, response, ..
            }) => {
                if let Some(serial) = serial {
                    println!("Reply from {:08x}", serial);
                }
                match response {
                    Some(response) => println!("Response: {:?}", response),
                    None => println!("Response: (none)"),
                }
            }
            None => warn!("payload does not decode as {:?}", class),
        },
    }
    Ok(())
}

fn cmd_decode_adv(input: String) -> Result<()> {
    let bytes = parse_hex(&input)?;
    let adv = decode_advertisement(&bytes).context("not a valid advertisement")?;
    print_json(&adv)
}

fn cmd_decode_status(input: String) -> Result<()> {
    let bytes = parse_hex(&input)?;
    let telemetry = decode_status(&bytes).context("not a valid status notification")?;
    print_json(&telemetry)?;
    if let Some(core) = telemetry.core_temperature() {
        println!();
        println!("Core: {:.2} °C", core);
    }
    Ok(())
}

fn cmd_crc(input: String) -> Result<()> {
    let bytes = parse_hex(&input)?;
    let crc = crc16_ccitt(&bytes);
    println!("CRC-16/CCITT: 0x{:04x} (wire order: {})", crc, hex::encode(crc.to_le_bytes()));
    Ok(())
}

fn cmd_config(config: &EngineConfig) -> Result<()> {
    let json = config.to_json_pretty().context("failed to serialize config")?;
    println!("{}", json);
    Ok(())
}

fn cmd_simulate(config: EngineConfig, params: SimulationParams) -> Result<()> {
    if !(0.0..=1.0).contains(&params.loss) {
        bail!("loss must be between 0.0 and 1.0, got {}", params.loss);
    }
    if params.probes == 0 {
        bail!("at least one probe is required");
    }
    if params.direct == 0 && params.repeaters == 0 {
        bail!("probes need a direct link or at least one repeater");
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(run_simulation(config, params))
}

async fn run_simulation(config: EngineConfig, params: SimulationParams) -> Result<()> {
    let mut network = SimulatedNetwork::new(Duration::from_millis(params.interval_ms as u64));
    let mut direct_links = Vec::new();
    for n in 0..params.probes {
        let serial = SIM_SERIAL_BASE + n;
        let probe = SimulatedProbe::new(serial, 1000 + n, params.interval_ms)
            .with_history(params.history);
        let index = network.add_probe(probe);
        if n < params.direct {
            let link = LinkId(n as u64 + 1);
            network.connect_direct(index, link);
            direct_links.push(link);
        }
    }
    for n in 0..params.repeaters {
        let link = LinkId(SIM_REPEATER_LINK_BASE + n as u64);
        let hop = (n % 4) as u8 + 1;
        network.add_repeater(SimulatedRepeater::new(
            link,
            hop,
            params.loss,
            params.seed.wrapping_add(n as u64),
        ));
    }

    println!("=== Probe Mesh Simulation ===");
    println!();
    println!("Configuration:");
    println!("  Probes:            {}", params.probes);
    println!("  Direct links:      {}", direct_links.len());
    println!("  Repeaters:         {}", params.repeaters);
    println!("  Repeater loss:     {:.1}%", params.loss * 100.0);
    println!("  History:           {} records", params.history);
    println!("  Sample period:     {} ms", params.interval_ms);
    println!("  Duration:          {} s", params.duration);
    println!();

    let (transport, outbound) = ChannelTransport::new();
    let (events_tx, events_rx) = mpsc::channel(256);
    let network_task = tokio::spawn(network.run(events_tx, outbound));
    let handle = runtime::spawn(Engine::new(config, transport), events_rx);
    let printer = tokio::spawn(print_events(handle.subscribe()));

    let total = Duration::from_secs(params.duration);
    match params.drop_direct_after.map(Duration::from_secs) {
        Some(at) if at < total => {
            tokio::time::sleep(at).await;
            info!("dropping {} direct link(s)", direct_links.len());
            for link in &direct_links {
                handle
                    .disconnect(*link)
                    .await
                    .context("engine stopped before the direct links dropped")?;
            }
            tokio::time::sleep(total - at).await;
        }
        _ => tokio::time::sleep(total).await,
    }

    print_summary(&handle).await?;

    handle.shutdown().await;
    printer.abort();
    network_task.abort();
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::TelemetryUpdated { .. }) => {}
            Ok(EngineEvent::LogSyncProgress { serial, percent }) if percent % 10 != 0 => {
                tracing::debug!("{:08x}: {}% synced", serial, percent);
            }
            Ok(event) => println!("  {:?}", event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("event printer lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn print_summary(handle: &EngineHandle) -> Result<()> {
    let probes = handle.probes().await.context("engine stopped")?;
    let repeaters = handle.repeaters().await.context("engine stopped")?;

    println!();
    println!("Results:");
    for probe in &probes {
        let route = match (probe.direct_link, probe.hop_count) {
            (Some(link), _) => format!("direct {}", link),
            (None, Some(hop)) => format!("mesh hop {}", hop),
            (None, None) => "unreachable".to_string(),
        };
        let range = probe
            .log_range
            .map(|r| format!("{}..={}", r.min, r.max))
            .unwrap_or_else(|| "-".to_string());
        let core = probe
            .telemetry
            .as_ref()
            .and_then(|t| t.core_temperature())
            .map(|c| format!("{:.1} °C", c))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:08x}  {:<14} log {:<12} {:>3}% synced  core {}{}",
            probe.serial,
            route,
            range,
            probe.percent_synced,
            core,
            if probe.stale { "  (stale)" } else { "" },
        );
    }
    for repeater in &repeaters {
        println!(
            "  repeater {}  score {:.2}  rssi {:.0} dBm ({} samples)  reaches {} probe(s)",
            repeater.link,
            repeater.quality.quality_score(),
            repeater.quality.rssi,
            repeater.quality.samples,
            repeater.reachable.len()
        );
    }
    println!();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::DecodeFrame { hex, format } => cmd_decode_frame(hex, format),

        Commands::DecodeAdv { hex } => cmd_decode_adv(hex),

        Commands::DecodeStatus { hex } => cmd_decode_status(hex),

        Commands::Crc { hex } => cmd_crc(hex),

        Commands::Config => cmd_config(&load_config(cli.config.as_ref())?),

        Commands::Simulate {
            probes,
            direct,
            repeaters,
            loss,
            history,
            interval_ms,
            duration,
            drop_direct_after,
            seed,
        } => cmd_simulate(
            load_config(cli.config.as_ref())?,
            SimulationParams {
                probes,
                direct,
                repeaters,
                loss,
                history,
                interval_ms,
                duration,
                drop_direct_after,
                seed,
            },
        ),
    }
}
