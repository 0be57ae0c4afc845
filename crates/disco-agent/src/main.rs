//! disco-agent
//!
//! Exposes a Linux board's sensors, outputs and buttons to Home Assistant
//! through MQTT discovery.

mod setup;
mod sysfs;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use disco_config::AgentConfig;
use disco_core::{SharedClock, SystemClock};
use disco_runtime::{
    ExitProcess, MemoryBus, MessageBus, RestartHandler, RumqttBus, Scheduler,
};

/// How often trigger lines are sampled
const INTERRUPT_POLL: Duration = Duration::from_millis(10);

/// MQTT discovery agent
#[derive(Parser, Debug)]
#[command(name = "disco-agent", version, about)]
struct Cli {
    /// Directory holding configuration.yaml and secrets.yaml
    #[arg(short, long, env = "DISCO_CONFIG_DIR", default_value = "/etc/disco")]
    config_dir: PathBuf,

    /// Log publishes instead of connecting to the broker
    #[arg(long)]
    dry_run: bool,

    /// Clear this device's discovery configs from the broker and exit
    #[arg(long, conflicts_with = "dry_run")]
    retract: bool,

    /// File the device UID is derived from when none is configured
    #[arg(long, default_value = setup::MACHINE_ID)]
    machine_id: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn setup_tracing(cli: &Cli) -> Result<()> {
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(&cli)?;

    info!(config_dir = %cli.config_dir.display(), "Starting disco-agent");
    let config = AgentConfig::load(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir.display()))?;
    let uid = setup::resolve_uid(&config, &cli.machine_id)?;

    let bus: Box<dyn MessageBus> = if cli.dry_run {
        warn!("Dry run, nothing is sent to the broker");
        Box::new(MemoryBus::echoing())
    } else {
        Box::new(RumqttBus::new(setup::mqtt_settings(&config, &uid)))
    };
    let clock: SharedClock = Arc::new(SystemClock::new());

    let assembly = setup::assemble(&config, &uid, bus, clock)?;
    let mut device = assembly.device;

    if cli.retract {
        device.connection_mut().connect();
        let cleared = device.retract_discovery();
        info!(cleared, "Discovery configs cleared");
        return Ok(());
    }

    let _poller = assembly
        .interrupts
        .start(INTERRUPT_POLL)
        .context("starting interrupt poller")?;

    let exit = Scheduler::new(device).run();
    ExitProcess::default().restart(exit);
    Ok(())
}
