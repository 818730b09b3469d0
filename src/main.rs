pub mod agent;
pub mod cli;
pub mod config;
pub mod led;
pub mod mqtt;
pub mod network;
pub mod persistence;
pub mod sensor;
pub mod telemetry;

use crate::agent::SensorAgent;
use crate::cli::{AddDeviceArgs, Cli, Command, DevicesAction, MonitorArgs};
use crate::config::{parse_level, AgentConfig};
use crate::mqtt::{MqttConfig, MqttHandler};
use crate::persistence::{DeviceKind, DeviceRecord, DeviceRegistry, SwitchState};
use crate::telemetry::Monitor;
use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup()?;

    // Loading may create the default file or warn about the level, before the real level is known.
    let (config, level) = load_config(cli.config.as_deref(), cli.log_level.as_deref())
        .with_subscriber(log_subscriber(Level::INFO))
        .await?;
    tracing::subscriber::set_global_default(log_subscriber(level))?;

    let registry_path = cli.registry.unwrap_or_else(DeviceRegistry::default_path);

    match cli.command {
        Command::Run => run_agent(config).await,
        Command::Devices { action } => manage_devices(action, registry_path).await,
        Command::Switch { name, state } => switch_device(&config, registry_path, &name, state).await,
        Command::Monitor(args) => monitor(&config, registry_path, args).await,
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn log_subscriber(level: Level) -> FmtSubscriber {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish()
}

/// Loads the config and resolves the log level, `--log-level` first.
async fn load_config(
    path: Option<&Path>,
    log_level: Option<&str>,
) -> Result<(AgentConfig, Level)> {
    let config = AgentConfig::load(path)
        .await
        .wrap_err("Failed to load configuration")?;
    let level = match log_level {
        Some(name) => parse_level(name).unwrap_or_else(|| {
            warn!("Unknown log level {}, using INFO", name);
            Level::INFO
        }),
        None => config.logging.level_filter(),
    };
    Ok((config, level))
}

/// Cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Interrupt received");
        trigger.cancel();
    });
    token
}

async fn run_agent(config: AgentConfig) -> Result<()> {
    info!("Starting iotsensor agent");

    let agent = SensorAgent::from_config(config).wrap_err("Failed to set up sensor agent")?;
    let running = agent
        .initialize()
        .await
        .wrap_err("Sensor agent initialization failed")?;

    let stopping = running.run(shutdown_token()).await;
    stopping.cleanup().await;

    info!("Agent stopped");
    Ok(())
}

async fn manage_devices(action: DevicesAction, registry_path: PathBuf) -> Result<()> {
    let mut registry = DeviceRegistry::load(registry_path).await?;

    match action {
        DevicesAction::List => {
            if registry.is_empty() {
                println!("No devices registered in {}", registry.path().display());
            }
            for device in registry.list() {
                println!(
                    "{:<20} {:<7} {:<32} {}",
                    device.name,
                    device.kind,
                    device.topic,
                    device.unit.as_deref().unwrap_or("")
                );
            }
            for device in registry.rejected() {
                println!("{:<20} {:<7} {:<32} (invalid)", device.name, device.kind, device.topic);
            }
        }
        DevicesAction::Show { name } => {
            let device = registry.get(&name)?;
            print!("{}", toml::to_string_pretty(device)?);
        }
        DevicesAction::Add(args) => {
            let record = device_from_args(args);
            let name = record.name.clone();
            let replaced = registry.upsert(record)?;
            registry.save().await?;
            info!(
                "{} device {}",
                if replaced { "Updated" } else { "Added" },
                name
            );
        }
        DevicesAction::Remove { name } => {
            registry.remove(&name)?;
            registry.save().await?;
            info!("Removed device {}", name);
        }
    }
    Ok(())
}

fn device_from_args(args: AddDeviceArgs) -> DeviceRecord {
    let defaults = match args.kind {
        DeviceKind::Light => DeviceRecord::led_light(&args.name, &args.topic),
        _ => DeviceRecord {
            name: args.name.clone(),
            kind: args.kind,
            topic: args.topic.clone(),
            on_command: None,
            off_command: None,
            unit: None,
        },
    };
    DeviceRecord {
        on_command: args.on_command.or(defaults.on_command),
        off_command: args.off_command.or(defaults.off_command),
        unit: args.unit.or(defaults.unit),
        ..defaults
    }
}

/// Broker settings for a short-lived CLI client.
///
/// The suffix keeps the broker from dropping a running agent that uses the same client id.
fn cli_mqtt_config(config: &AgentConfig, suffix: &str) -> MqttConfig {
    let mut mqtt = config.mqtt.clone();
    mqtt.client_id = format!("{}-{}", mqtt.client_id, suffix);
    mqtt
}

async fn switch_device(
    config: &AgentConfig,
    registry_path: PathBuf,
    name: &str,
    state: SwitchState,
) -> Result<()> {
    let registry = DeviceRegistry::load(registry_path).await?;
    let device = registry.get(name)?;
    let payload = device.command_payload(state)?.as_bytes().to_vec();

    let (inbound_tx, _inbound_rx) = mpsc::channel(1);
    let handler = MqttHandler::spawn(cli_mqtt_config(config, "cli"), Vec::new(), inbound_tx)?;
    handler
        .wait_connected(Duration::from_secs(config.mqtt.connect_timeout_secs))
        .await
        .wrap_err("Could not reach the broker")?;
    handler.publish(&device.topic, payload).await?;
    info!("Sent {} to {} on {}", state, device.name, device.topic);

    handler.disconnect().await;
    Ok(())
}

async fn monitor(config: &AgentConfig, registry_path: PathBuf, args: MonitorArgs) -> Result<()> {
    let topic = match &args.device {
        Some(name) => {
            let registry = DeviceRegistry::load(registry_path).await?;
            registry.get(name)?.topic.clone()
        }
        None => config.mqtt.temperature_topic.clone(),
    };

    let sample_ms = args.sample_ms.unwrap_or(config.sampling.interval_ms);
    Monitor::new(
        topic,
        args.period,
        Duration::from_millis(sample_ms),
        Duration::from_secs(args.report_secs.max(1)),
    )
    .run(cli_mqtt_config(config, "monitor"), shutdown_token())
    .await
}
