//! IMM-DAQ - machine and sensor data acquisition
//!
//! Command-line front end over the machine facade. Every subcommand connects
//! to the controller, logs in, does its work and logs out again.
//!
//! # Usage
//!
//! ```bash
//! # Check connectivity and read the configured parameters once
//! imm-daq --host 192.168.0.20 probe
//!
//! # Log for one minute, one JSON line of samples per second
//! imm-daq --config cell3.toml log --seconds 60
//!
//! # Write a process parameter and read it back
//! imm-daq set --name holding_pressure --value 450
//! ```
//!
//! # Environment Variables
//!
//! - `IMM_DAQ_CONFIG`: Path to the TOML config (default: ./imm_daq.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use imm_daq::{DaqConfig, ImmDevice, ProcessValue};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "imm-daq")]
#[command(about = "Injection molding machine data acquisition over EMI")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config (overrides IMM_DAQ_CONFIG and ./imm_daq.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Controller address (overrides [machine].host)
    #[arg(long)]
    host: Option<String>,

    /// Controller EMI port (overrides [machine].port)
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Connect, log in, read the message log and one sample
    Probe,

    /// Sample at the configured rate and print one JSON line per second
    Log {
        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Print the detail attributes of one parameter
    Details {
        #[arg(long)]
        uri: String,
    },

    /// Print the descriptive text of one parameter
    Text {
        #[arg(long)]
        uri: String,
    },

    /// Write a process parameter (set value, or low bound with --high)
    Set {
        #[arg(long)]
        name: String,
        #[arg(long)]
        value: String,
        /// Upper bound for threshold parameters; `--value` is then the lower one
        #[arg(long)]
        high: Option<String>,
    },

    /// Read a process parameter
    Get {
        #[arg(long)]
        name: String,
    },

    /// Print the effective configuration as TOML
    Config,
}

// ============================================================================
// Configuration
// ============================================================================

fn load_config(args: &CliArgs) -> Result<DaqConfig> {
    let mut config = match &args.config {
        Some(path) => DaqConfig::load_from_file(path)
            .with_context(|| format!("Loading config {}", path.display()))?,
        None => DaqConfig::load(),
    };
    if let Some(host) = &args.host {
        config.machine.host = host.clone();
    }
    if let Some(port) = args.port {
        config.machine.port = port;
    }
    Ok(config)
}

// ============================================================================
// Commands
// ============================================================================

async fn open_device(device: &ImmDevice, config: &DaqConfig) -> Result<()> {
    if !device.connect().await {
        anyhow::bail!(
            "Could not connect to {}:{}",
            config.machine.host,
            config.machine.port
        );
    }
    let session_id = device.login().await.context("EMI login failed")?;
    info!(device = %device.name(), session = %session_id, "Logged in");
    Ok(())
}

/// Log out and disconnect. After an interrupted exchange the stream is not
/// trusted for a logout, so the connection is only closed.
async fn close_device(device: &ImmDevice, interrupted: bool) {
    device.idle();
    if !interrupted {
        if let Err(e) = device.logout().await {
            warn!(error = %e, "Logout failed");
        }
    }
    device.close().await;
    device.shutdown().await;
}

async fn run_log(device: &ImmDevice, seconds: Option<u64>, cancel: CancellationToken) -> Result<()> {
    let deadline = seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    device.reset();
    device.start_logging();
    info!(device = %device.name(), "Logging started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let batch = device.get_samples();
        if !batch.is_empty() {
            println!("{}", serde_json::to_string(&batch)?);
        }
        if let imm_daq::WorkerStatus::Unreachable { reason } = device.status() {
            anyhow::bail!("Device became unreachable: {}", reason);
        }
        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            break;
        }
    }

    device.idle();
    let rest = device.get_samples();
    if !rest.is_empty() {
        println!("{}", serde_json::to_string(&rest)?);
    }
    let stats = device.stats();
    info!(
        acquired = stats.samples_acquired,
        dropped = stats.samples_dropped,
        "Logging stopped"
    );
    Ok(())
}

async fn run_command(device: &ImmDevice, command: SubCommand, cancel: CancellationToken) -> Result<()> {
    match command {
        SubCommand::Probe => {
            let messages = device.info_log().await?;
            info!(response = %messages.name, entries = messages.children.len(), "Message log read");
            let sample = device.get_value(None).await?;
            println!("{}", serde_json::to_string_pretty(&sample.to_record())?);
        }
        SubCommand::Log { seconds } => run_log(device, seconds, cancel).await?,
        SubCommand::Details { uri } => {
            let details = device.parameter_details(&uri).await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        SubCommand::Text { uri } => {
            println!("{}", device.parameter_text(&uri).await?);
        }
        SubCommand::Set { name, value, high } => {
            let value = match high {
                Some(high) => ProcessValue::Bounds { low: value, high },
                None => ProcessValue::Single(value),
            };
            let readback = device.set_process_param(&name, &value).await?;
            println!("{}", serde_json::to_string(&readback)?);
        }
        SubCommand::Get { name } => {
            let values = device.get_process_param(&name).await?;
            println!("{}", serde_json::to_string(&values)?);
        }
        // Printed before connecting
        SubCommand::Config => {}
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    config.validate()?;

    if matches!(args.command, SubCommand::Config) {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!(
        device = %config.machine.name,
        address = %format!("{}:{}", config.machine.host, config.machine.port),
        parameters = config.parameters.len(),
        "Starting IMM-DAQ"
    );

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, shutting down");
        shutdown_token.cancel();
    });

    let device = ImmDevice::from_config(&config);
    let work = {
        let (device, config) = (&device, &config);
        let (command, cancel) = (args.command, cancel_token.clone());
        async move {
            open_device(device, config).await?;
            run_command(device, command, cancel).await
        }
    };

    // `log` finishes on its own when cancelled; everything else (including a
    // login that keeps retrying) is abandoned.
    let (result, interrupted) = tokio::select! {
        biased;
        result = work => (result, false),
        _ = cancel_token.cancelled() => {
            warn!("Interrupted before the command completed");
            (Ok(()), true)
        }
    };
    close_device(&device, interrupted).await;
    result
}
