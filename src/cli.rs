use crate::persistence::{DeviceKind, SwitchState};
use crate::telemetry::ChartPeriod;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "iotsensor", version, about = "MQTT temperature sensor agent and device tools")]
pub struct Cli {
    /// Agent config file (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Device registry file (defaults to devices.toml next to the config)
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    /// Overrides logging.level from the config
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the sensor agent until interrupted
    Run,
    /// Manage the device registry
    Devices {
        #[command(subcommand)]
        action: DevicesAction,
    },
    /// Send the on or off command of a registered switch or light
    Switch {
        name: String,
        #[arg(value_parser = parse_switch_state)]
        state: SwitchState,
    },
    /// Watch a telemetry topic and report chart buckets
    Monitor(MonitorArgs),
}

#[derive(Debug, Subcommand)]
pub enum DevicesAction {
    List,
    Show {
        name: String,
    },
    Add(AddDeviceArgs),
    Remove {
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct AddDeviceArgs {
    pub name: String,
    #[arg(long, value_parser = parse_device_kind)]
    pub kind: DeviceKind,
    #[arg(long)]
    pub topic: String,
    /// Payload sent for "on"; lights default to full white
    #[arg(long)]
    pub on_command: Option<String>,
    /// Payload sent for "off"; lights default to brightness 0
    #[arg(long)]
    pub off_command: Option<String>,
    #[arg(long)]
    pub unit: Option<String>,
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Registered sensor to watch instead of the configured temperature topic
    #[arg(long)]
    pub device: Option<String>,
    #[arg(long, default_value = "hour", value_parser = parse_chart_period)]
    pub period: ChartPeriod,
    #[arg(long, default_value_t = 60)]
    pub report_secs: u64,
    /// Expected publish interval of the watched devices (defaults to sampling.interval_ms)
    #[arg(long)]
    pub sample_ms: Option<u64>,
}

fn parse_switch_state(s: &str) -> Result<SwitchState, String> {
    s.parse()
}

fn parse_device_kind(s: &str) -> Result<DeviceKind, String> {
    s.parse()
}

fn parse_chart_period(s: &str) -> Result<ChartPeriod, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_switch_command() {
        let cli = Cli::try_parse_from(["iotsensor", "switch", "desk", "off"]).unwrap();
        match cli.command {
            Command::Switch { name, state } => {
                assert_eq!(name, "desk");
                assert_eq!(state, SwitchState::Off);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_device_add_with_globals() {
        let cli = Cli::try_parse_from([
            "iotsensor",
            "devices",
            "add",
            "kitchen",
            "--kind",
            "sensor",
            "--topic",
            "home/kitchen/temp",
            "--registry",
            "/tmp/devices.toml",
        ])
        .unwrap();
        assert_eq!(cli.registry, Some(PathBuf::from("/tmp/devices.toml")));
        match cli.command {
            Command::Devices {
                action: DevicesAction::Add(args),
            } => {
                assert_eq!(args.kind, DeviceKind::Sensor);
                assert_eq!(args.topic, "home/kitchen/temp");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn monitor_defaults() {
        let cli = Cli::try_parse_from(["iotsensor", "monitor"]).unwrap();
        match cli.command {
            Command::Monitor(args) => {
                assert_eq!(args.period, ChartPeriod::Hour);
                assert_eq!(args.report_secs, 60);
                assert!(args.device.is_none());
                assert!(args.sample_ms.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["iotsensor", "monitor", "--period", "year"]).is_err());
    }
}
